// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Platform-wide view of every active application.
//!
//! The super model is an immutable snapshot: activations, removals, and the
//! completeness mark each build a new snapshot with a bumped generation and
//! swap it in atomically, then notify listeners. Listeners always observe the
//! published state, never an intermediate one, and the listener list is
//! snapshotted before notification so a listener may (de)register other
//! listeners from inside its callback.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use crate::application::{ApplicationId, ApplicationInfo, ApplicationSet};

/// One immutable super model state.
#[derive(Debug, Clone, Serialize)]
pub struct SuperModelSnapshot {
    /// Super model generation, bumped on every published change.
    pub generation: i64,
    /// Whether bootstrap redeployment has finished.
    pub complete: bool,
    /// Active applications keyed by serialized application id.
    pub applications: BTreeMap<String, ApplicationInfo>,
}

impl SuperModelSnapshot {
    /// Info for one application, if active.
    pub fn application(&self, id: &ApplicationId) -> Option<&ApplicationInfo> {
        self.applications.get(&id.serialized())
    }
}

/// Observer of super model changes.
///
/// Callbacks run outside the manager lock, after the new snapshot is
/// published.
#[allow(missing_docs)]
pub trait SuperModelListener: Send + Sync {
    fn application_activated(&self, snapshot: &Arc<SuperModelSnapshot>, info: &ApplicationInfo) {
        let _ = (snapshot, info);
    }

    fn application_removed(&self, snapshot: &Arc<SuperModelSnapshot>, application: &ApplicationId) {
        let _ = (snapshot, application);
    }

    fn notify_of_completeness(&self, snapshot: &Arc<SuperModelSnapshot>) {
        let _ = snapshot;
    }
}

struct Inner {
    snapshot: Arc<SuperModelSnapshot>,
    listeners: Vec<Arc<dyn SuperModelListener>>,
}

/// Owns the current super model snapshot and fans out change notifications.
pub struct SuperModelManager {
    inner: Mutex<Inner>,
}

impl SuperModelManager {
    /// Create a manager starting at `generation`.
    ///
    /// The seed comes from the shared super model counter so generations stay
    /// monotonic across server restarts.
    pub fn new(generation: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                snapshot: Arc::new(SuperModelSnapshot {
                    generation,
                    complete: false,
                    applications: BTreeMap::new(),
                }),
                listeners: Vec::new(),
            }),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<SuperModelSnapshot> {
        self.inner.lock().unwrap().snapshot.clone()
    }

    /// Register a listener for future changes.
    pub fn register_listener(&self, listener: Arc<dyn SuperModelListener>) {
        self.inner.lock().unwrap().listeners.push(listener);
    }

    /// Publish an activation and notify listeners.
    pub fn application_activated(&self, set: &ApplicationSet) {
        let info = set.info();
        let (snapshot, listeners) = {
            let mut inner = self.inner.lock().unwrap();
            let mut applications = inner.snapshot.applications.clone();
            applications.insert(set.application().serialized(), info.clone());
            let snapshot = Arc::new(SuperModelSnapshot {
                generation: inner.snapshot.generation + 1,
                complete: inner.snapshot.complete,
                applications,
            });
            inner.snapshot = snapshot.clone();
            (snapshot, inner.listeners.clone())
        };
        debug!(
            application = %set.application(),
            generation = snapshot.generation,
            "Super model updated with activation"
        );
        for listener in &listeners {
            listener.application_activated(&snapshot, &info);
        }
    }

    /// Publish a removal and notify listeners.
    ///
    /// Removing an application that is not in the model publishes nothing.
    pub fn application_removed(&self, application: &ApplicationId) {
        let published = {
            let mut inner = self.inner.lock().unwrap();
            let mut applications = inner.snapshot.applications.clone();
            if applications.remove(&application.serialized()).is_none() {
                None
            } else {
                let snapshot = Arc::new(SuperModelSnapshot {
                    generation: inner.snapshot.generation + 1,
                    complete: inner.snapshot.complete,
                    applications,
                });
                inner.snapshot = snapshot.clone();
                Some((snapshot, inner.listeners.clone()))
            }
        };
        if let Some((snapshot, listeners)) = published {
            debug!(
                application = %application,
                generation = snapshot.generation,
                "Super model updated with removal"
            );
            for listener in &listeners {
                listener.application_removed(&snapshot, application);
            }
        }
    }

    /// Mark the super model complete after bootstrap redeployment.
    pub fn mark_complete(&self) {
        let (snapshot, listeners) = {
            let mut inner = self.inner.lock().unwrap();
            let snapshot = Arc::new(SuperModelSnapshot {
                generation: inner.snapshot.generation + 1,
                complete: true,
                applications: inner.snapshot.applications.clone(),
            });
            inner.snapshot = snapshot.clone();
            (snapshot, inner.listeners.clone())
        };
        info!(
            generation = snapshot.generation,
            applications = snapshot.applications.len(),
            "Super model complete"
        );
        for listener in &listeners {
            listener.notify_of_completeness(&snapshot);
        }
    }

    /// Canonical JSON payload served for the applications config.
    pub fn applications_payload(&self) -> Bytes {
        let snapshot = self.snapshot();
        Bytes::from(serde_json::to_vec(&*snapshot).unwrap_or_default())
    }
}

impl std::fmt::Debug for SuperModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("SuperModelManager")
            .field("generation", &inner.snapshot.generation)
            .field("complete", &inner.snapshot.complete)
            .field("applications", &inner.snapshot.applications.len())
            .field("listeners", &inner.listeners.len())
            .finish()
    }
}

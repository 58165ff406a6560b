// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request-side view of activated applications.
//!
//! The handler owns the map from application id to the currently served
//! [`ApplicationSet`]. Activation swaps the set in atomically and only then
//! wakes long-polling subscribers through per-application generation
//! watches, so a woken subscriber always resolves against the new model.
//! Super model lifecycle events are forwarded from here as well, keeping
//! one code path for the publish-then-notify ordering.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info};

use gantry_protocol::checksum::PayloadChecksums;
use gantry_protocol::request::ConfigKey;

use crate::application::{ApplicationId, ApplicationSet};
use crate::cache::{CacheKey, CachedConfig, ServerCache};
use crate::error::CoreError;
use crate::supermodel::SuperModelManager;

/// Namespace of the config listing all active applications.
pub const SUPERMODEL_NAMESPACE: &str = "platform";
/// Name of the config listing all active applications.
pub const SUPERMODEL_NAME: &str = "applications";

/// Whether a key addresses the super model rather than one application.
pub fn is_supermodel_key(key: &ConfigKey) -> bool {
    key.namespace == SUPERMODEL_NAMESPACE && key.name == SUPERMODEL_NAME
}

/// Routes config requests to application models and serves resolved
/// payloads through the shared cache.
pub struct RequestHandler {
    applications: DashMap<ApplicationId, Arc<ApplicationSet>>,
    generations: DashMap<ApplicationId, watch::Sender<i64>>,
    hosts: DashMap<String, ApplicationId>,
    cache: Arc<ServerCache>,
    supermodel: Arc<SuperModelManager>,
    supermodel_generation: watch::Sender<i64>,
}

impl RequestHandler {
    /// Create a handler over the given cache and super model.
    pub fn new(cache: Arc<ServerCache>, supermodel: Arc<SuperModelManager>) -> Self {
        let (supermodel_generation, _) = watch::channel(supermodel.snapshot().generation);
        Self {
            applications: DashMap::new(),
            generations: DashMap::new(),
            hosts: DashMap::new(),
            cache,
            supermodel,
            supermodel_generation,
        }
    }

    /// The shared config cache.
    pub fn cache(&self) -> &Arc<ServerCache> {
        &self.cache
    }

    /// The super model manager fed by this handler.
    pub fn supermodel(&self) -> &Arc<SuperModelManager> {
        &self.supermodel
    }

    /// Serve `set` for its application.
    ///
    /// Publishes the set, rebinds the application's hosts, updates the super
    /// model, and finally wakes generation subscribers.
    pub fn application_activated(&self, set: Arc<ApplicationSet>) {
        let id = set.application().clone();
        let generation = set.generation();

        let previous = self.applications.insert(id.clone(), set.clone());
        if let Some(previous) = previous {
            for host in previous.hosts() {
                if !set.hosts().contains(host) {
                    self.hosts.remove_if(host, |_, owner| *owner == id);
                }
            }
        }
        for host in set.hosts() {
            self.hosts.insert(host.clone(), id.clone());
        }

        self.supermodel.application_activated(&set);
        self.supermodel_generation
            .send_replace(self.supermodel.snapshot().generation);

        self.generations
            .entry(id.clone())
            .or_insert_with(|| watch::channel(generation).0)
            .send_replace(generation);

        info!(application = %id, generation, "Serving new application generation");
    }

    /// Stop serving an application.
    ///
    /// Closes its generation watch so parked subscribers wake and observe
    /// the removal. Returns whether the application was being served.
    pub fn application_removed(&self, application: &ApplicationId) -> bool {
        let removed = self.applications.remove(application).is_some();
        if removed {
            self.hosts
                .retain(|_, owner| owner != application);
            self.generations.remove(application);
            self.supermodel.application_removed(application);
            self.supermodel_generation
                .send_replace(self.supermodel.snapshot().generation);
            info!(application = %application, "Application no longer served");
        }
        removed
    }

    /// The set served for `application`, if any.
    pub fn application_set(&self, application: &ApplicationId) -> Option<Arc<ApplicationSet>> {
        self.applications
            .get(application)
            .map(|entry| entry.value().clone())
    }

    /// Applications currently served.
    pub fn active_applications(&self) -> Vec<ApplicationId> {
        self.applications
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Find the application a client belongs to.
    ///
    /// Resolution order: the host registry by client hostname, then the only
    /// active application when exactly one exists. `None` means the client
    /// cannot be attributed to any application.
    pub fn resolve_application(&self, client_hostname: &str) -> Option<Arc<ApplicationSet>> {
        if !client_hostname.is_empty()
            && let Some(owner) = self.hosts.get(client_hostname)
            && let Some(set) = self.applications.get(owner.value())
        {
            return Some(set.value().clone());
        }
        if self.applications.len() == 1 {
            return self.applications.iter().next().map(|e| e.value().clone());
        }
        debug!(client_hostname, "No application matches client");
        None
    }

    /// Subscribe to generation changes for an application.
    ///
    /// The channel closes when the application is removed.
    pub fn generation_watch(&self, application: &ApplicationId) -> Option<watch::Receiver<i64>> {
        self.generations
            .get(application)
            .map(|entry| entry.value().subscribe())
    }

    /// Subscribe to super model generation changes.
    pub fn supermodel_watch(&self) -> watch::Receiver<i64> {
        self.supermodel_generation.subscribe()
    }

    /// Resolve one config from an application set, through the cache.
    pub fn resolve_config(
        &self,
        set: &ApplicationSet,
        key: &ConfigKey,
        def_md5: &str,
    ) -> Result<Arc<CachedConfig>, CoreError> {
        let cache_key = CacheKey {
            def_name: key.name.clone(),
            def_namespace: key.namespace.clone(),
            def_md5: def_md5.to_string(),
            config_id: key.config_id.clone(),
            generation: set.generation(),
        };
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let payload = set
            .resolve(key)
            .ok_or_else(|| CoreError::ConfigNotFound {
                key: key.to_string(),
            })?;
        let checksums = PayloadChecksums::from_payload(&payload.data);
        let generation = set.generation();
        self.cache.compute_if_absent(cache_key, checksums.clone(), move || {
            Ok(Arc::new(CachedConfig {
                generation,
                checksums,
                payload: payload.data,
                apply_on_restart: payload.apply_on_restart,
            }))
        })
    }

    /// Resolve the super model applications config, through the cache.
    pub fn resolve_supermodel(
        &self,
        key: &ConfigKey,
        def_md5: &str,
    ) -> Result<Arc<CachedConfig>, CoreError> {
        let snapshot = self.supermodel.snapshot();
        let cache_key = CacheKey {
            def_name: key.name.clone(),
            def_namespace: key.namespace.clone(),
            def_md5: def_md5.to_string(),
            config_id: key.config_id.clone(),
            generation: snapshot.generation,
        };
        if let Some(hit) = self.cache.get(&cache_key) {
            return Ok(hit);
        }

        let payload = self.supermodel.applications_payload();
        let checksums = PayloadChecksums::from_payload(&payload);
        let generation = snapshot.generation;
        self.cache.compute_if_absent(cache_key, checksums.clone(), move || {
            Ok(Arc::new(CachedConfig {
                generation,
                checksums,
                payload,
                apply_on_restart: false,
            }))
        })
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("applications", &self.applications.len())
            .field("hosts", &self.hosts.len())
            .field("cache", &self.cache)
            .finish()
    }
}

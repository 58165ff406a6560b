// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment sessions and the activation critical section.
//!
//! Every deployment is a session: a monotonically increasing id drawn from
//! the tenant's counter, the application package it carries, and a status
//! that moves NEW → PREPARE → ACTIVATE → DEACTIVATE. The session id doubles
//! as the config generation once activated. Activation runs under a
//! per-application exclusive lock and commits one atomic transaction that
//! deactivates the previous session, activates the new one, and moves the
//! active-session pointer.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::application::ApplicationId;
use crate::coordination::{CoordinationError, Coordinator, TxOp};
use crate::error::CoreError;
use crate::model::{ApplicationPackage, ConfigChangeActions, ConfigModel, HostProvisioner, ProvisionError};

/// Lifecycle status of a session.
///
/// `DELETE` is reachable from any non-terminal status; the others move
/// strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    /// Created, package stored, model not yet built.
    New,
    /// Model built and validated, ready to activate.
    Prepare,
    /// Serving config; the session id is the live generation.
    Activate,
    /// Superseded by a newer activated session.
    Deactivate,
    /// Marked for removal.
    Delete,
}

impl SessionStatus {
    /// Status name as persisted and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Prepare => "PREPARE",
            Self::Activate => "ACTIVATE",
            Self::Deactivate => "DEACTIVATE",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    /// Session id, unique and monotonic within the tenant.
    pub session_id: i64,
    /// The application this session deploys.
    pub application: ApplicationId,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// When the session was created.
    pub create_time: DateTime<Utc>,
    /// When the session was activated, if it ever was.
    pub activated_time: Option<DateTime<Utc>>,
    /// The session id that was active for the application when this session
    /// was created, 0 when none was.
    pub active_session_at_create: i64,
    /// Content hash of the stored package.
    pub package_checksum: String,
    /// The application package this session deploys.
    pub package: ApplicationPackage,
}

/// Tenant metadata stamped on every activation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantMeta {
    /// Timestamp of the last deployment, milliseconds since epoch.
    pub last_deployed_ms: i64,
}

/// Compiled model kept in-process between prepare and activate.
#[derive(Clone)]
pub struct PreparedSession {
    /// The compiled model.
    pub model: Arc<dyn ConfigModel>,
    /// Actions consumers must take when this session activates.
    pub actions: ConfigChangeActions,
}

/// Result of a successful activation.
#[derive(Debug, Clone)]
pub struct ActivationOutcome {
    /// The new live generation (the activated session id).
    pub generation: i64,
    /// Barrier path other servers acknowledge on once they serve the
    /// activated generation.
    pub barrier: String,
    /// The previously active session, now DEACTIVATE.
    pub previous_active: Option<i64>,
}

/// Result of deleting an application.
#[derive(Debug, Clone)]
pub struct DeletedApplication {
    /// The session that was active at deletion time, now DELETE.
    pub active_session: Option<i64>,
    /// Barrier path other servers acknowledge on once they dropped the
    /// application.
    pub barrier: String,
}

/// Why an activation was refused or failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivationError {
    /// Another session activated after this one was created.
    #[error(
        "session {session_id} is based on session {expected}, but session {active_session} \
         is now active"
    )]
    Conflict {
        /// The session that was refused.
        session_id: i64,
        /// The currently active session.
        active_session: i64,
        /// The session the refused one was based on.
        expected: i64,
    },

    /// The session is older than the active one and can never activate.
    #[error("session {session_id} is older than the active session {active_session}")]
    StaleOrdering {
        /// The session that was refused.
        session_id: i64,
        /// The currently active session.
        active_session: i64,
    },

    /// The session does not exist.
    #[error("session {session_id} not found")]
    NotFound {
        /// The missing session id.
        session_id: i64,
    },

    /// Temporary failure; a retry is expected to help.
    #[error("transient activation failure: {0}")]
    Transient(String),

    /// Activation failed for a non-retryable reason.
    #[error("activation failed: {0}")]
    Internal(String),
}

impl ActivationError {
    /// Whether a retry is expected to help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<CoordinationError> for ActivationError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::LockTimeout(_) | CoordinationError::BarrierTimeout(_) => {
                Self::Transient(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<ProvisionError> for ActivationError {
    fn from(err: ProvisionError) -> Self {
        if err.is_transient() {
            Self::Transient(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

// ============================================================================
// Coordination paths
// ============================================================================

pub(crate) fn sessions_root(tenant: &str) -> String {
    format!("/gantry/tenants/{}/sessions", tenant)
}

pub(crate) fn session_path(tenant: &str, session_id: i64) -> String {
    format!("{}/{}", sessions_root(tenant), session_id)
}

pub(crate) fn applications_root(tenant: &str) -> String {
    format!("/gantry/tenants/{}/applications", tenant)
}

pub(crate) fn application_path(application: &ApplicationId) -> String {
    format!(
        "{}/{}",
        applications_root(&application.tenant),
        application.node_name()
    )
}

pub(crate) fn tenant_meta_path(tenant: &str) -> String {
    format!("/gantry/tenants/{}/meta", tenant)
}

pub(crate) fn session_counter(tenant: &str) -> String {
    format!("/gantry/counters/sessions/{}", tenant)
}

pub(crate) fn lock_path(application: &ApplicationId) -> String {
    format!(
        "/gantry/locks/{}/{}",
        application.tenant,
        application.node_name()
    )
}

pub(crate) fn activation_barrier(application: &ApplicationId, session_id: i64) -> String {
    format!("/gantry/barriers/{}/{}", application.serialized(), session_id)
}

fn removal_barrier(application: &ApplicationId) -> String {
    format!(
        "/gantry/barriers/{}/removed-{}",
        application.serialized(),
        Utc::now().timestamp_millis()
    )
}

// ============================================================================
// Session store
// ============================================================================

/// Stores sessions in the coordination store and runs the activation and
/// deletion critical sections.
pub struct SessionStore {
    coordinator: Arc<dyn Coordinator>,
    provisioner: Arc<dyn HostProvisioner>,
    prepared: DashMap<(String, i64), PreparedSession>,
    lock_timeout: Duration,
}

impl SessionStore {
    /// Create a store over the given coordination backend.
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        provisioner: Arc<dyn HostProvisioner>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            provisioner,
            prepared: DashMap::new(),
            lock_timeout,
        }
    }

    /// The coordination backend this store writes to.
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// The provisioner committed during activations.
    pub fn provisioner(&self) -> &Arc<dyn HostProvisioner> {
        &self.provisioner
    }

    /// Create a NEW session carrying `package`.
    ///
    /// Draws the next id from the tenant counter and records which session
    /// was active for the application at creation time (0 when none).
    #[instrument(skip(self, package), fields(application = %application))]
    pub async fn create_session(
        &self,
        application: &ApplicationId,
        package: ApplicationPackage,
    ) -> Result<SessionData, CoreError> {
        package.validate()?;

        let session_id = self
            .coordinator
            .increment_and_get(&session_counter(&application.tenant))
            .await?;
        let active_session_at_create = self
            .active_session(application)
            .await?
            .unwrap_or(0);

        let data = SessionData {
            session_id,
            application: application.clone(),
            status: SessionStatus::New,
            create_time: Utc::now(),
            activated_time: None,
            active_session_at_create,
            package_checksum: package.checksum(),
            package,
        };

        self.coordinator
            .create(
                &session_path(&application.tenant, session_id),
                &serde_json::to_vec(&data)?,
            )
            .await?;

        info!(
            session_id,
            active_session_at_create, "Session created"
        );
        Ok(data)
    }

    /// Load a session, or None when it does not exist.
    pub async fn load_session(
        &self,
        tenant: &str,
        session_id: i64,
    ) -> Result<Option<SessionData>, CoreError> {
        let raw = self
            .coordinator
            .get(&session_path(tenant, session_id))
            .await?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a session that must exist.
    pub async fn require_session(
        &self,
        tenant: &str,
        session_id: i64,
    ) -> Result<SessionData, CoreError> {
        self.load_session(tenant, session_id)
            .await?
            .ok_or(CoreError::SessionNotFound {
                tenant: tenant.to_string(),
                session_id,
            })
    }

    /// Mark a session PREPARE and remember its compiled model in-process.
    ///
    /// Re-preparing an already prepared session replaces the stored model.
    pub async fn mark_prepared(
        &self,
        tenant: &str,
        session_id: i64,
        prepared: PreparedSession,
    ) -> Result<SessionData, CoreError> {
        let mut data = self.require_session(tenant, session_id).await?;
        match data.status {
            SessionStatus::New | SessionStatus::Prepare => {}
            other => {
                return Err(CoreError::InvalidSessionState {
                    session_id,
                    expected: SessionStatus::New.to_string(),
                    actual: other.to_string(),
                });
            }
        }
        data.status = SessionStatus::Prepare;
        self.write_session(&data).await?;
        self.prepared
            .insert((tenant.to_string(), session_id), prepared);
        Ok(data)
    }

    /// The compiled model stored by a prepare on this server, if any.
    pub fn prepared_session(&self, tenant: &str, session_id: i64) -> Option<PreparedSession> {
        self.prepared
            .get(&(tenant.to_string(), session_id))
            .map(|entry| entry.value().clone())
    }

    /// The id of the session currently active for the application.
    pub async fn active_session(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<i64>, CoreError> {
        let raw = self.coordinator.get(&application_path(application)).await?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Activate a prepared session.
    ///
    /// Runs under the application's exclusive lock. The staleness check
    /// (another session activated since this one was created) can be
    /// overridden with `force`; the ordering check (this session is older
    /// than the active one) never can, because generations must not move
    /// backwards.
    #[instrument(skip(self), fields(application = %application, session_id, force))]
    pub async fn activate(
        &self,
        application: &ApplicationId,
        session_id: i64,
        force: bool,
    ) -> Result<ActivationOutcome, ActivationError> {
        let tenant = application.tenant.clone();
        let session = self
            .load_session(&tenant, session_id)
            .await
            .map_err(|err| ActivationError::Internal(err.to_string()))?
            .ok_or(ActivationError::NotFound { session_id })?;

        match session.status {
            SessionStatus::Prepare | SessionStatus::Activate => {}
            other => {
                return Err(ActivationError::Internal(format!(
                    "session {} must be prepared before activation, is {}",
                    session_id, other
                )));
            }
        }

        let _lock = self
            .coordinator
            .lock(&lock_path(application), self.lock_timeout)
            .await?;

        let current = self
            .active_session(application)
            .await
            .map_err(|err| ActivationError::Internal(err.to_string()))?;

        // Staleness check: someone else activated after this session was
        // created. Skipped when nothing was active at create time, and
        // overridable with force.
        if session.active_session_at_create != 0
            && let Some(active) = current
            && active != session.active_session_at_create
            && active != session.session_id
        {
            if force {
                warn!(
                    active_session = active,
                    based_on = session.active_session_at_create,
                    "Activation conflict overridden by force"
                );
            } else {
                return Err(ActivationError::Conflict {
                    session_id,
                    active_session: active,
                    expected: session.active_session_at_create,
                });
            }
        }

        // Ordering check: a session older than the active one would move the
        // generation backwards. Force never bypasses this.
        if let Some(active) = current
            && session.session_id < active
        {
            return Err(ActivationError::StaleOrdering {
                session_id,
                active_session: active,
            });
        }

        // Host commit happens inside the lock, before state changes, so a
        // provisioning failure aborts the whole activation.
        self.provisioner.activate(application).await?;

        let now = Utc::now();
        let mut ops = Vec::new();

        if let Some(active) = current
            && active != session.session_id
            && let Some(mut previous) = self
                .load_session(&tenant, active)
                .await
                .map_err(|err| ActivationError::Internal(err.to_string()))?
        {
            previous.status = SessionStatus::Deactivate;
            ops.push(TxOp::Set {
                path: session_path(&tenant, active),
                data: serde_json::to_vec(&previous)
                    .map_err(|err| ActivationError::Internal(err.to_string()))?,
            });
        }

        let mut activated = session;
        activated.status = SessionStatus::Activate;
        activated.activated_time = Some(now);
        ops.push(TxOp::Set {
            path: session_path(&tenant, session_id),
            data: serde_json::to_vec(&activated)
                .map_err(|err| ActivationError::Internal(err.to_string()))?,
        });
        ops.push(TxOp::Set {
            path: application_path(application),
            data: serde_json::to_vec(&session_id)
                .map_err(|err| ActivationError::Internal(err.to_string()))?,
        });
        ops.push(TxOp::Set {
            path: tenant_meta_path(&tenant),
            data: serde_json::to_vec(&TenantMeta {
                last_deployed_ms: now.timestamp_millis(),
            })
            .map_err(|err| ActivationError::Internal(err.to_string()))?,
        });

        self.coordinator.transaction(ops).await?;

        info!(
            generation = session_id,
            previous_active = ?current,
            "Session activated"
        );

        Ok(ActivationOutcome {
            generation: session_id,
            barrier: activation_barrier(application, session_id),
            previous_active: current.filter(|active| *active != session_id),
        })
    }

    /// Delete an application and mark its active session DELETE.
    ///
    /// Returns `None` when the application is unknown; deleting something
    /// that is already gone is not an error. Secondary cleanup failures
    /// (host deprovisioning) are logged and do not abort the removal.
    #[instrument(skip(self), fields(application = %application))]
    pub async fn delete_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<DeletedApplication>, CoreError> {
        let _lock = self
            .coordinator
            .lock(&lock_path(application), self.lock_timeout)
            .await?;

        let current = self.active_session(application).await?;
        if current.is_none()
            && !self
                .coordinator
                .exists(&application_path(application))
                .await?
        {
            return Ok(None);
        }

        if let Err(err) = self.provisioner.remove(application).await {
            warn!(
                error = %err,
                "Host cleanup failed during application delete; continuing"
            );
        }

        let mut ops = vec![TxOp::Delete {
            path: application_path(application),
        }];
        if let Some(active) = current
            && let Some(mut session) = self.load_session(&application.tenant, active).await?
        {
            session.status = SessionStatus::Delete;
            ops.push(TxOp::Set {
                path: session_path(&application.tenant, active),
                data: serde_json::to_vec(&session)?,
            });
        }
        self.coordinator.transaction(ops).await?;

        info!(active_session = ?current, "Application deleted");

        Ok(Some(DeletedApplication {
            active_session: current,
            barrier: removal_barrier(application),
        }))
    }

    /// Remove sessions past their lifetime.
    ///
    /// Active sessions are never collected. Returns the removed ids.
    pub async fn delete_expired_sessions(
        &self,
        tenant: &str,
        lifetime: Duration,
    ) -> Result<Vec<i64>, CoreError> {
        let now = Utc::now();
        let mut removed = Vec::new();
        for name in self.coordinator.children(&sessions_root(tenant)).await? {
            let Ok(session_id) = name.parse::<i64>() else {
                continue;
            };
            let Some(data) = self.load_session(tenant, session_id).await? else {
                continue;
            };
            if data.status == SessionStatus::Activate {
                continue;
            }
            let age = now
                .signed_duration_since(data.create_time)
                .to_std()
                .unwrap_or_default();
            if age > lifetime {
                self.coordinator
                    .delete(&session_path(tenant, session_id))
                    .await?;
                self.prepared.remove(&(tenant.to_string(), session_id));
                removed.push(session_id);
            }
        }
        if !removed.is_empty() {
            info!(tenant, count = removed.len(), "Expired sessions removed");
        }
        Ok(removed)
    }

    /// Every application with an active-session pointer, across tenants.
    pub async fn list_applications(&self) -> Result<Vec<ApplicationId>, CoreError> {
        let mut applications = Vec::new();
        for tenant in self.coordinator.children("/gantry/tenants").await? {
            for name in self
                .coordinator
                .children(&applications_root(&tenant))
                .await?
            {
                if let Some(id) = ApplicationId::from_node_name(&tenant, &name) {
                    applications.push(id);
                }
            }
        }
        Ok(applications)
    }

    async fn write_session(&self, data: &SessionData) -> Result<(), CoreError> {
        self.coordinator
            .set(
                &session_path(&data.application.tenant, data.session_id),
                &serde_json::to_vec(data)?,
            )
            .await?;
        Ok(())
    }
}

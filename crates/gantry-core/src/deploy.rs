// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployment orchestration.
//!
//! [`ApplicationRepo`] ties the pieces together: sessions come from the
//! [`SessionStore`], models from the [`ModelFactory`], and a successful
//! activation is pushed into the [`RequestHandler`] so config traffic moves
//! to the new generation. After the local swap the repo acknowledges the
//! activation barrier and waits until every server in the cluster has done
//! the same.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::application::{ApplicationId, ApplicationSet};
use crate::error::CoreError;
use crate::model::{ApplicationPackage, ConfigChangeActions, ModelContext, ModelFactory};
use crate::request_handler::RequestHandler;
use crate::session::{ActivationError, PreparedSession, SessionData, SessionStore};

/// What a finished deployment produced.
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// The new active generation.
    pub generation: i64,
    /// Actions consumers must take to pick the new config up.
    pub actions: ConfigChangeActions,
}

/// Orchestrates deployments against one coordination store.
pub struct ApplicationRepo {
    session_store: Arc<SessionStore>,
    model_factory: Arc<dyn ModelFactory>,
    request_handler: Arc<RequestHandler>,
    server_id: String,
    server_count: usize,
    activation_timeout: Duration,
}

impl ApplicationRepo {
    /// Create a repo.
    ///
    /// `server_count` is how many servers must acknowledge an activation
    /// barrier before it counts as propagated.
    pub fn new(
        session_store: Arc<SessionStore>,
        model_factory: Arc<dyn ModelFactory>,
        request_handler: Arc<RequestHandler>,
        server_id: impl Into<String>,
        server_count: usize,
        activation_timeout: Duration,
    ) -> Self {
        Self {
            session_store,
            model_factory,
            request_handler,
            server_id: server_id.into(),
            server_count,
            activation_timeout,
        }
    }

    /// The session store this repo deploys through.
    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.session_store
    }

    /// The request handler activations are pushed into.
    pub fn request_handler(&self) -> &Arc<RequestHandler> {
        &self.request_handler
    }

    /// Create a NEW session for `package`.
    pub async fn create_session(
        &self,
        application: &ApplicationId,
        package: ApplicationPackage,
    ) -> Result<SessionData, CoreError> {
        self.session_store.create_session(application, package).await
    }

    /// Build and validate the session's model, marking it PREPARE.
    ///
    /// Returns the config-change actions the new model requires relative to
    /// the currently served one. Cluster-visible activation state is not
    /// touched.
    #[instrument(skip(self))]
    pub async fn prepare(
        &self,
        tenant: &str,
        session_id: i64,
    ) -> Result<ConfigChangeActions, CoreError> {
        let session = self.session_store.require_session(tenant, session_id).await?;
        let previous = self
            .request_handler
            .application_set(&session.application)
            .map(|set| set.model().clone());
        let built = self
            .model_factory
            .build(&ModelContext {
                application: session.application.clone(),
                generation: session_id,
                package: session.package.clone(),
                previous,
            })
            .await?;

        let actions = built.actions.clone();
        self.session_store
            .mark_prepared(
                tenant,
                session_id,
                PreparedSession {
                    model: built.model,
                    actions: built.actions,
                },
            )
            .await?;

        if actions.restart_required() {
            info!(session_id, "Session prepared; activation will require restarts");
        }
        Ok(actions)
    }

    /// Activate a prepared session and wait for cluster-wide propagation.
    ///
    /// Conflicts and ordering violations surface as distinct
    /// [`ActivationError`] variants so deployment tooling can tell "someone
    /// else deployed first" from a real failure.
    #[instrument(skip(self), fields(application = %application, session_id, force))]
    pub async fn activate(
        &self,
        application: &ApplicationId,
        session_id: i64,
        force: bool,
    ) -> Result<i64, ActivationError> {
        let session = self
            .session_store
            .load_session(&application.tenant, session_id)
            .await
            .map_err(|err| ActivationError::Internal(err.to_string()))?
            .ok_or(ActivationError::NotFound { session_id })?;
        let prepared = self
            .model_for_activation(&session)
            .await
            .map_err(|err| ActivationError::Internal(err.to_string()))?;

        let outcome = self
            .session_store
            .activate(application, session_id, force)
            .await?;

        let set = Arc::new(ApplicationSet::new(
            application.clone(),
            outcome.generation,
            prepared.model,
            session.package.hostnames(),
        ));
        self.request_handler.application_activated(set);

        let coordinator = self.session_store.coordinator();
        coordinator
            .notify_completion(&outcome.barrier, &self.server_id)
            .await?;
        coordinator
            .await_completion(&outcome.barrier, self.server_count, self.activation_timeout)
            .await?;

        info!(
            generation = outcome.generation,
            "Activation propagated to all servers"
        );
        Ok(outcome.generation)
    }

    /// Create, prepare, and activate a package in one go.
    pub async fn deploy(
        &self,
        application: &ApplicationId,
        package: ApplicationPackage,
    ) -> Result<DeployOutcome, CoreError> {
        let session = self.create_session(application, package).await?;
        let actions = self.prepare(&application.tenant, session.session_id).await?;
        let generation = self
            .activate(application, session.session_id, false)
            .await?;
        Ok(DeployOutcome { generation, actions })
    }

    /// Redeploy an application from its currently active package.
    ///
    /// Used by bootstrap to rebuild models after a server upgrade; the
    /// package content does not change, the generation does.
    #[instrument(skip(self), fields(application = %application))]
    pub async fn redeploy(&self, application: &ApplicationId) -> Result<i64, CoreError> {
        let active = self
            .session_store
            .active_session(application)
            .await?
            .ok_or_else(|| CoreError::ApplicationNotFound {
                application: application.to_string(),
            })?;
        let session = self
            .session_store
            .require_session(&application.tenant, active)
            .await?;
        let new_session = self
            .create_session(application, session.package)
            .await?;
        self.prepare(&application.tenant, new_session.session_id)
            .await?;
        let generation = self
            .activate(application, new_session.session_id, false)
            .await?;
        Ok(generation)
    }

    /// Build and serve an application's active session without redeploying.
    ///
    /// Used by bootstrap when the server version has not changed. Returns
    /// the served generation, or `None` when the application has no active
    /// session.
    #[instrument(skip(self), fields(application = %application))]
    pub async fn load_application(
        &self,
        application: &ApplicationId,
    ) -> Result<Option<i64>, CoreError> {
        let Some(active) = self.session_store.active_session(application).await? else {
            return Ok(None);
        };
        let session = self
            .session_store
            .require_session(&application.tenant, active)
            .await?;
        let built = self
            .model_factory
            .build(&ModelContext {
                application: application.clone(),
                generation: active,
                package: session.package.clone(),
                previous: None,
            })
            .await?;
        let set = Arc::new(ApplicationSet::new(
            application.clone(),
            active,
            built.model,
            session.package.hostnames(),
        ));
        self.request_handler.application_activated(set);
        Ok(Some(active))
    }

    /// Delete an application and stop serving it.
    ///
    /// Returns false when the application is unknown. The removal barrier
    /// wait is best-effort: the primary transaction has already committed,
    /// so a propagation timeout is logged rather than surfaced.
    #[instrument(skip(self), fields(application = %application))]
    pub async fn remove(&self, application: &ApplicationId) -> Result<bool, CoreError> {
        let Some(deleted) = self.session_store.delete_application(application).await? else {
            return Ok(false);
        };
        self.request_handler.application_removed(application);

        let coordinator = self.session_store.coordinator();
        coordinator
            .notify_completion(&deleted.barrier, &self.server_id)
            .await?;
        if let Err(err) = coordinator
            .await_completion(&deleted.barrier, self.server_count, self.activation_timeout)
            .await
        {
            warn!(error = %err, "Removal committed but propagation wait failed");
        }
        Ok(true)
    }

    /// Every application known to the cluster.
    pub async fn list_applications(&self) -> Result<Vec<ApplicationId>, CoreError> {
        self.session_store.list_applications().await
    }

    async fn model_for_activation(
        &self,
        session: &SessionData,
    ) -> Result<PreparedSession, CoreError> {
        if let Some(prepared) = self
            .session_store
            .prepared_session(&session.application.tenant, session.session_id)
        {
            return Ok(prepared);
        }
        // Prepared on another server: rebuild the model from the stored
        // package.
        let previous = self
            .request_handler
            .application_set(&session.application)
            .map(|set| set.model().clone());
        let built = self
            .model_factory
            .build(&ModelContext {
                application: session.application.clone(),
                generation: session.session_id,
                package: session.package.clone(),
                previous,
            })
            .await?;
        Ok(PreparedSession {
            model: built.model,
            actions: built.actions,
        })
    }
}

impl std::fmt::Debug for ApplicationRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRepo")
            .field("server_id", &self.server_id)
            .field("server_count", &self.server_count)
            .field("activation_timeout", &self.activation_timeout)
            .finish()
    }
}

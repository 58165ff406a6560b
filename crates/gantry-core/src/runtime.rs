// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for gantry-core.
//!
//! This module provides [`CoreRuntime`] which allows embedding gantry-core
//! into an existing tokio application instead of running it as a standalone
//! server.
//!
//! # Example
//!
//! ```rust,ignore
//! use gantry_core::config::Config;
//! use gantry_core::runtime::CoreRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = CoreRuntime::builder()
//!         .config(Config::from_env()?)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... run your application ...
//!
//!     // Graceful shutdown
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gantry_protocol::server::GantryServer;

use crate::bootstrap::Bootstrapper;
use crate::cache::ServerCache;
use crate::config::Config;
use crate::coordination::{Coordinator, MemoryCoordinator};
use crate::deploy::ApplicationRepo;
use crate::model::{HostProvisioner, ModelFactory, PackageModelFactory, StaticProvisioner};
use crate::request_handler::RequestHandler;
use crate::server::ConfigServerState;
use crate::session::SessionStore;
use crate::supermodel::SuperModelManager;

/// Counter seeding the super model generation across restarts.
const SUPERMODEL_COUNTER: &str = "/gantry/counters/supermodel";

/// How often expired sessions are garbage collected.
const SESSION_GC_INTERVAL: Duration = Duration::from_secs(60);

/// Builder for creating a [`CoreRuntime`].
#[derive(Default)]
pub struct CoreRuntimeBuilder {
    coordinator: Option<Arc<dyn Coordinator>>,
    model_factory: Option<Arc<dyn ModelFactory>>,
    provisioner: Option<Arc<dyn HostProvisioner>>,
    config: Option<Config>,
}

impl std::fmt::Debug for CoreRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntimeBuilder")
            .field("coordinator", &self.coordinator.as_ref().map(|_| "..."))
            .field("model_factory", &self.model_factory.as_ref().map(|_| "..."))
            .field("provisioner", &self.provisioner.as_ref().map(|_| "..."))
            .field("config", &self.config)
            .finish()
    }
}

impl CoreRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cluster coordination backend.
    ///
    /// Default: in-process [`MemoryCoordinator`], suitable for a single
    /// server and for tests.
    pub fn coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Set the model factory used to build application models.
    ///
    /// Default: [`PackageModelFactory`].
    pub fn model_factory(mut self, model_factory: Arc<dyn ModelFactory>) -> Self {
        self.model_factory = Some(model_factory);
        self
    }

    /// Set the host provisioner committed during activations.
    ///
    /// Default: [`StaticProvisioner`].
    pub fn provisioner(mut self, provisioner: Arc<dyn HostProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the server configuration (required).
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<CoreRuntimeConfig> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("config is required"))?;

        Ok(CoreRuntimeConfig {
            coordinator: self
                .coordinator
                .unwrap_or_else(|| Arc::new(MemoryCoordinator::new())),
            model_factory: self
                .model_factory
                .unwrap_or_else(|| Arc::new(PackageModelFactory::new())),
            provisioner: self.provisioner.unwrap_or_else(|| Arc::new(StaticProvisioner)),
            config,
        })
    }
}

/// Configuration for a [`CoreRuntime`].
pub struct CoreRuntimeConfig {
    coordinator: Arc<dyn Coordinator>,
    model_factory: Arc<dyn ModelFactory>,
    provisioner: Arc<dyn HostProvisioner>,
    config: Config,
}

impl std::fmt::Debug for CoreRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntimeConfig")
            .field("coordinator", &"...")
            .field("model_factory", &"...")
            .field("provisioner", &"...")
            .field("config", &self.config)
            .finish()
    }
}

impl CoreRuntimeConfig {
    /// Start the runtime.
    ///
    /// The QUIC server starts accepting connections immediately, but
    /// getConfig requests are held until bootstrap has redeployed or loaded
    /// every known application. `start` returns once the server is ready to
    /// answer; a failed bootstrap in EXIT mode is returned as an error.
    pub async fn start(self) -> Result<CoreRuntime> {
        let config = self.config;

        // Generation of the super model must keep growing across restarts,
        // otherwise subscribers would ignore the first snapshot.
        let supermodel_seed = self.coordinator.increment_and_get(SUPERMODEL_COUNTER).await?;

        let cache = Arc::new(ServerCache::new());
        let supermodel = Arc::new(SuperModelManager::new(supermodel_seed));
        let request_handler = Arc::new(RequestHandler::new(cache, supermodel));
        let session_store = Arc::new(SessionStore::new(
            self.coordinator.clone(),
            self.provisioner,
            config.lock_timeout,
        ));
        let repo = Arc::new(ApplicationRepo::new(
            session_store.clone(),
            self.model_factory,
            request_handler.clone(),
            config.server_id.clone(),
            config.server_count,
            config.activation_timeout,
        ));

        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(ConfigServerState::new(request_handler, ready_rx));

        let server = GantryServer::localhost(config.rpc_addr)?;
        let bind_addr = server.local_addr()?;
        let server_handle = tokio::spawn(run_config_server_with_shutdown(
            server,
            state.clone(),
            shutdown_rx.clone(),
        ));

        info!(addr = %bind_addr, "Config server accepting connections, starting bootstrap");

        let bootstrapper = Bootstrapper::new(
            repo.clone(),
            self.coordinator,
            env!("CARGO_PKG_VERSION"),
            config.redeploy_threads,
            config.max_bootstrap_duration,
            config.redeploy_retry_base,
            config.exit_mode,
        );
        if let Err(e) = bootstrapper.run().await {
            error!("Bootstrap failed: {}", e);
            let _ = shutdown_tx.send(true);
            let _ = server_handle.await;
            return Err(e.into());
        }
        let _ = ready_tx.send(true);

        let gc_handle = tokio::spawn(run_session_gc(
            session_store,
            config.session_lifetime,
            shutdown_rx,
        ));

        info!(addr = %bind_addr, "CoreRuntime started");

        Ok(CoreRuntime {
            server_handle,
            gc_handle,
            shutdown_tx,
            ready_tx,
            state,
            repo,
            bind_addr,
        })
    }
}

/// A running gantry-core instance that can be embedded in an application.
///
/// The runtime manages:
/// - QUIC server for config subscriptions (getConfig long-polling)
/// - Bootstrap redeployment on startup
/// - Periodic garbage collection of expired sessions
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct CoreRuntime {
    server_handle: JoinHandle<Result<()>>,
    gc_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    ready_tx: watch::Sender<bool>,
    state: Arc<ConfigServerState>,
    repo: Arc<ApplicationRepo>,
    bind_addr: SocketAddr,
}

impl CoreRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> CoreRuntimeBuilder {
        CoreRuntimeBuilder::new()
    }

    /// The address the QUIC server is bound to.
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Get a reference to the shared config handler state.
    pub fn state(&self) -> &Arc<ConfigServerState> {
        &self.state
    }

    /// Get the application repository for deployments.
    pub fn repo(&self) -> &Arc<ApplicationRepo> {
        &self.repo
    }

    /// Gracefully shut down the runtime.
    ///
    /// This stops answering getConfig requests, signals the QUIC server to
    /// stop accepting new connections, and waits for it to complete.
    pub async fn shutdown(self) -> Result<()> {
        info!("CoreRuntime shutting down...");

        // Stop answering, then stop accepting
        let _ = self.ready_tx.send(false);
        let _ = self.shutdown_tx.send(true);

        let _ = self.gc_handle.await;
        match self.server_handle.await {
            Ok(Ok(())) => {
                info!("CoreRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("CoreRuntime server error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("CoreRuntime server task panicked: {}", e);
                Err(anyhow::anyhow!("server task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.server_handle.is_finished()
    }
}

/// Run the config QUIC server with shutdown support.
async fn run_config_server_with_shutdown(
    server: GantryServer,
    state: Arc<ConfigServerState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    use tracing::debug;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Config QUIC server received shutdown signal");
                    server.close();
                    break;
                }
            }

            incoming = server.accept() => {
                match incoming {
                    Some(incoming) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            match incoming.await {
                                Ok(connection) => {
                                    let remote_addr = connection.remote_address();
                                    debug!(%remote_addr, "accepted connection");

                                    let conn_handler = gantry_protocol::server::ConnectionHandler::new(connection);
                                    crate::server::config_server::handle_connection(conn_handler, state).await;
                                }
                                Err(e) => {
                                    debug!("failed to accept connection: {}", e);
                                }
                            }
                        });
                    }
                    None => {
                        // Endpoint closed
                        break;
                    }
                }
            }
        }
    }

    info!("Config QUIC server stopped");
    Ok(())
}

/// Periodically delete inactive sessions past their lifetime.
async fn run_session_gc(
    store: Arc<SessionStore>,
    lifetime: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(SESSION_GC_INTERVAL);
    // The first tick fires immediately; skip it so startup stays quiet.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }

            _ = ticker.tick() => {
                let tenants = match store.coordinator().children("/gantry/tenants").await {
                    Ok(tenants) => tenants,
                    Err(e) => {
                        warn!("Failed to list tenants for session garbage collection: {}", e);
                        continue;
                    }
                };
                for tenant in tenants {
                    match store.delete_expired_sessions(&tenant, lifetime).await {
                        Ok(deleted) if !deleted.is_empty() => {
                            info!(tenant = %tenant, sessions = ?deleted, "Deleted expired sessions");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(tenant = %tenant, "Session garbage collection failed: {}", e);
                        }
                    }
                }
            }
        }
    }
}

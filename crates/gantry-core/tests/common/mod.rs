// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for gantry-core E2E tests.
//!
//! Provides TestContext for wiring a deployment repo, a config QUIC server,
//! and a subscriber client together over an in-memory coordination store.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use gantry_core::application::ApplicationId;
use gantry_core::cache::ServerCache;
use gantry_core::coordination::{Coordinator, MemoryCoordinator};
use gantry_core::deploy::ApplicationRepo;
use gantry_core::model::{
    ApplicationPackage, ConfigDocument, HostSpec, PackageModelFactory, StaticProvisioner,
};
use gantry_core::request_handler::RequestHandler;
use gantry_core::server::{ConfigServerState, config_server};
use gantry_core::session::SessionStore;
use gantry_core::supermodel::SuperModelManager;
use gantry_protocol::client::{GantryClient, GantryClientConfig};
use gantry_protocol::request::{ConfigKey, ConfigRequestBuilder};
use gantry_protocol::server::GantryServer;

/// Hostname every test package assigns its single node, and the hostname
/// the test client presents in its requests.
pub const TEST_HOSTNAME: &str = "node1.example.com";

/// Test context that manages repo, server, and client for E2E tests.
pub struct TestContext {
    pub coordinator: Arc<dyn Coordinator>,
    pub repo: Arc<ApplicationRepo>,
    pub state: Arc<ConfigServerState>,
    pub client: GantryClient,
    pub server_addr: SocketAddr,
    pub ready_tx: watch::Sender<bool>,
}

impl TestContext {
    /// Create a test context on a fresh in-memory coordination store.
    pub async fn new() -> Option<Self> {
        Self::with_coordinator(Arc::new(MemoryCoordinator::new()), "cfg1.example.com").await
    }

    /// Create a test context over a shared coordination store, e.g. to
    /// simulate a second server or a restart.
    ///
    /// This sets up:
    /// 1. A deployment repo and request handler over the store
    /// 2. A config QUIC server on an available port, marked ready
    /// 3. A QUIC client pointed at it
    pub async fn with_coordinator(
        coordinator: Arc<dyn Coordinator>,
        server_id: &str,
    ) -> Option<Self> {
        // 1. Deployment side: session store, model factory, request handler
        let session_store = Arc::new(SessionStore::new(
            coordinator.clone(),
            Arc::new(StaticProvisioner),
            Duration::from_secs(5),
        ));
        let request_handler = Arc::new(RequestHandler::new(
            Arc::new(ServerCache::new()),
            Arc::new(SuperModelManager::new(0)),
        ));
        let repo = Arc::new(ApplicationRepo::new(
            session_store,
            Arc::new(PackageModelFactory::new()),
            request_handler.clone(),
            server_id,
            1,
            Duration::from_secs(5),
        ));

        // 2. Serving side: handler state with the ready gate already open
        let (ready_tx, ready_rx) = watch::channel(true);
        let state = Arc::new(ConfigServerState::new(request_handler, ready_rx));

        let server = GantryServer::localhost("127.0.0.1:0".parse().unwrap()).ok()?;
        let server_addr = server.local_addr().ok()?;

        // 3. Accept connections in the background
        let server_state = state.clone();
        tokio::spawn(async move {
            let result = server
                .run(move |conn| {
                    let state = server_state.clone();
                    async move {
                        config_server::handle_connection(conn, state).await;
                    }
                })
                .await;
            if let Err(e) = result {
                eprintln!("Test config server error: {}", e);
            }
        });

        // 4. Wait for the server to start accepting
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 5. Client with certificate verification disabled (self-signed cert)
        let client = GantryClient::new(GantryClientConfig {
            server_addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
        .ok()?;

        Some(Self {
            coordinator,
            repo,
            state,
            client,
            server_addr,
            ready_tx,
        })
    }

    /// A second client against the same server, for concurrent requests.
    pub fn extra_client(&self) -> Option<GantryClient> {
        GantryClient::new(GantryClientConfig {
            server_addr: self.server_addr,
            dangerous_skip_cert_verification: true,
            ..Default::default()
        })
        .ok()
    }
}

/// The application every test deploys.
pub fn app() -> ApplicationId {
    ApplicationId::from_application("acme", "shop")
}

/// A single-document package; `max_hits` parameterizes the payload.
pub fn sample_package(max_hits: i64) -> ApplicationPackage {
    ApplicationPackage {
        documents: vec![ConfigDocument {
            name: "query-limits".to_string(),
            namespace: "platform.search".to_string(),
            restart_on_change: false,
            default: json!({"max-hits": max_hits}),
            overrides: Default::default(),
        }],
        hosts: vec![HostSpec {
            hostname: TEST_HOSTNAME.to_string(),
            services: vec!["search/qrs0".to_string()],
        }],
    }
}

/// Request builder for the sample package's document, presented as the
/// well-known test host.
pub fn sample_request() -> ConfigRequestBuilder {
    ConfigRequestBuilder::new(
        &ConfigKey::new("query-limits", "platform.search", "default"),
        TEST_HOSTNAME,
    )
}

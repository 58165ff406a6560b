// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gantry Core - Config Serving Control Plane
//!
//! Core is responsible for:
//! - Sessions (deploy, prepare, and activate application packages)
//! - getConfig serving (long-polling config subscriptions over QUIC)
//! - Bootstrap redeployment after server upgrades
//!
//! Note: package authoring and node inventory management are handled by
//! the deployment tooling, not by this server.

use anyhow::Result;
use tracing::{error, info};

use gantry_core::config::Config;
use gantry_core::runtime::CoreRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gantry_core=info".parse().unwrap()),
        )
        .init();

    info!("Starting Gantry Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        rpc_addr = %config.rpc_addr,
        server_id = %config.server_id,
        server_count = config.server_count,
        "Configuration loaded"
    );

    // Binds the QUIC server and runs bootstrap redeployment; requests are
    // held until every known application is served again.
    let runtime = CoreRuntime::builder()
        .config(config)
        .build()?
        .start()
        .await?;

    info!(addr = %runtime.bind_addr(), "Gantry Core initialized successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// What bootstrap does when redeployment fails past its time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitMode {
    /// Treat bootstrap failure as fatal and stop the server process.
    #[default]
    Exit,
    /// Log the failure and keep serving whatever did deploy.
    Continue,
}

impl ExitMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "EXIT" => Some(Self::Exit),
            "CONTINUE" => Some(Self::Continue),
            _ => None,
        }
    }
}

/// Gantry config server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity of this server within the cluster (hostname in production).
    pub server_id: String,
    /// QUIC server address for config subscriptions
    pub rpc_addr: SocketAddr,
    /// Number of config servers expected to acknowledge an activation.
    pub server_count: usize,
    /// How long inactive sessions are kept before garbage collection.
    pub session_lifetime: Duration,
    /// How long to wait for the per-application activation lock.
    pub lock_timeout: Duration,
    /// How long to wait for an activation to propagate to all servers.
    pub activation_timeout: Duration,
    /// Number of applications redeployed concurrently during bootstrap.
    pub redeploy_threads: usize,
    /// Total time budget for bootstrap redeployment.
    pub max_bootstrap_duration: Duration,
    /// Base sleep between bootstrap retry rounds, multiplied by failure count.
    pub redeploy_retry_base: Duration,
    /// Behavior when bootstrap redeployment exhausts its budget.
    pub exit_mode: ExitMode,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GANTRY_SERVER_ID`: identity of this server within the cluster
    ///
    /// Optional (with defaults):
    /// - `GANTRY_RPC_PORT`: QUIC server port (default: 19070)
    /// - `GANTRY_SERVER_COUNT`: servers expected to ack activations (default: 1)
    /// - `GANTRY_SESSION_LIFETIME_SECS`: inactive session lifetime (default: 3600)
    /// - `GANTRY_LOCK_TIMEOUT_SECS`: activation lock timeout (default: 60)
    /// - `GANTRY_ACTIVATION_TIMEOUT_SECS`: activation propagation timeout (default: 120)
    /// - `GANTRY_REDEPLOY_THREADS`: bootstrap redeploy concurrency (default: 4)
    /// - `GANTRY_MAX_BOOTSTRAP_SECS`: bootstrap time budget (default: 3600)
    /// - `GANTRY_REDEPLOY_RETRY_BASE_SECS`: retry backoff base (default: 30)
    /// - `GANTRY_BOOTSTRAP_EXIT_MODE`: `EXIT` or `CONTINUE` (default: EXIT)
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_id = std::env::var("GANTRY_SERVER_ID")
            .map_err(|_| ConfigError::Missing("GANTRY_SERVER_ID"))?;

        let rpc_port: u16 = std::env::var("GANTRY_RPC_PORT")
            .unwrap_or_else(|_| "19070".to_string())
            .parse()
            .map_err(|_| ConfigError::Invalid("GANTRY_RPC_PORT", "must be a valid port number"))?;

        let server_count: usize = std::env::var("GANTRY_SERVER_COUNT")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .ok()
            .filter(|count| *count >= 1)
            .ok_or(ConfigError::Invalid(
                "GANTRY_SERVER_COUNT",
                "must be a positive integer",
            ))?;

        let session_lifetime = secs_env("GANTRY_SESSION_LIFETIME_SECS", 3600)?;
        let lock_timeout = secs_env("GANTRY_LOCK_TIMEOUT_SECS", 60)?;
        let activation_timeout = secs_env("GANTRY_ACTIVATION_TIMEOUT_SECS", 120)?;

        let redeploy_threads: usize = std::env::var("GANTRY_REDEPLOY_THREADS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .ok()
            .filter(|threads| *threads >= 1)
            .ok_or(ConfigError::Invalid(
                "GANTRY_REDEPLOY_THREADS",
                "must be a positive integer",
            ))?;

        let max_bootstrap_duration = secs_env("GANTRY_MAX_BOOTSTRAP_SECS", 3600)?;
        let redeploy_retry_base = secs_env("GANTRY_REDEPLOY_RETRY_BASE_SECS", 30)?;

        let exit_mode = match std::env::var("GANTRY_BOOTSTRAP_EXIT_MODE") {
            Ok(value) => ExitMode::parse(&value).ok_or(ConfigError::Invalid(
                "GANTRY_BOOTSTRAP_EXIT_MODE",
                "must be EXIT or CONTINUE",
            ))?,
            Err(_) => ExitMode::Exit,
        };

        Ok(Self {
            server_id,
            rpc_addr: SocketAddr::from(([0, 0, 0, 0], rpc_port)),
            server_count,
            session_lifetime,
            lock_timeout,
            activation_timeout,
            redeploy_threads,
            max_bootstrap_duration,
            redeploy_retry_base,
            exit_mode,
        })
    }
}

fn secs_env(name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer"))?;
    Ok(Duration::from_secs(secs))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gantry Core - Config Serving Control Plane
//!
//! This crate provides the serving side of gantry: it manages deployed
//! application packages as sessions, activates them atomically across a
//! server cluster, and answers getConfig subscriptions over QUIC with
//! long-polling, payload compression, and checksum-based deduplication.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Deployment tooling                       │
//! │           (create / prepare / activate sessions)            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       gantry-core                           │
//! │                      (This Crate)                           │
//! │                                                             │
//! │   ApplicationRepo ──▶ SessionStore ──▶ Coordination store   │
//! │         │                               (cluster state)     │
//! │         │ activation                                        │
//! │         ▼                                                   │
//! │   RequestHandler ──▶ ServerCache                            │
//! │         ▲                                                   │
//! │         │ getConfig (QUIC, port 19070)                      │
//! └─────────┼───────────────────────────────────────────────────┘
//!           │
//! ┌─────────┴───────────────────────────────────────────────────┐
//! │                    Config subscribers                       │
//! │     (service nodes long-polling config via gantry-protocol) │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deployment Operations
//!
//! Deployments go through the session lifecycle. [`deploy::ApplicationRepo`]
//! orchestrates all of it:
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `create_session` | Store an application package under a fresh session id |
//! | `prepare` | Build and validate the session's model, diff against the active one |
//! | `activate` | Make the session the application's active config, atomically |
//! | `deploy` | create + prepare + activate in one call |
//! | `redeploy` | Re-deploy the active session's package under a new session |
//! | `remove` | Delete an application and stop serving it |
//!
//! Each activation gets a new config generation (the session id, strictly
//! growing per tenant). Subscribers see the new generation on their next
//! getConfig answer.
//!
//! # Session State Machine
//!
//! ```text
//!      ┌─────┐
//!      │ NEW │
//!      └──┬──┘
//!         │ prepare
//!         ▼
//!    ┌─────────┐
//!    │ PREPARE │
//!    └────┬────┘
//!         │ activate
//!         ▼
//!    ┌──────────┐   newer session    ┌────────────┐
//!    │ ACTIVATE │ ──────activates──▶ │ DEACTIVATE │
//!    └────┬─────┘                    └────────────┘
//!         │ application deleted
//!         ▼
//!    ┌────────┐
//!    │ DELETE │
//!    └────────┘
//! ```
//!
//! Sessions that never reach ACTIVATE are garbage collected after their
//! lifetime. An activation may not go backwards: a session can only replace
//! an active session with a lower id, and a deployment that raced a newer
//! one is rejected unless forced.
//!
//! # getConfig Serving
//!
//! The QUIC server answers two message types:
//!
//! | Message | Description |
//! |---------|-------------|
//! | `GetConfig` | Resolve one config; parks until changed or timed out when the client is up to date |
//! | `Ping` | Liveness probe, echoed back |
//!
//! A request that times out is answered with the current generation rather
//! than an error, so subscribers keep a confirmed state. Identical payloads
//! across applications and generations are stored once, keyed by checksum.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `GANTRY_SERVER_ID` | Yes | - | Identity of this server within the cluster |
//! | `GANTRY_RPC_PORT` | No | `19070` | QUIC server port for config subscriptions |
//! | `GANTRY_SERVER_COUNT` | No | `1` | Servers expected to acknowledge an activation |
//! | `GANTRY_SESSION_LIFETIME_SECS` | No | `3600` | Inactive session lifetime before GC |
//! | `GANTRY_LOCK_TIMEOUT_SECS` | No | `60` | Per-application activation lock timeout |
//! | `GANTRY_ACTIVATION_TIMEOUT_SECS` | No | `120` | Activation propagation timeout |
//! | `GANTRY_REDEPLOY_THREADS` | No | `4` | Bootstrap redeploy concurrency |
//! | `GANTRY_MAX_BOOTSTRAP_SECS` | No | `3600` | Bootstrap time budget |
//! | `GANTRY_REDEPLOY_RETRY_BASE_SECS` | No | `30` | Backoff base between bootstrap retry rounds |
//! | `GANTRY_BOOTSTRAP_EXIT_MODE` | No | `EXIT` | `EXIT` or `CONTINUE` on bootstrap failure |
//!
//! # Modules
//!
//! - [`application`]: Application identifiers and activated application sets
//! - [`bootstrap`]: Startup redeployment and loading of known applications
//! - [`cache`]: Checksum-deduplicated cache of served config payloads
//! - [`config`]: Server configuration from environment variables
//! - [`config_handlers`]: getConfig request handling with long-poll support
//! - [`coordination`]: Cluster coordination store abstraction
//! - [`deploy`]: Deployment orchestration over the session lifecycle
//! - [`error`]: Error types with protocol error code mapping
//! - [`model`]: Application packages, config models, and host provisioning
//! - [`request_handler`]: Resolution of configs against active applications
//! - [`runtime`]: Embeddable runtime wiring all components together
//! - [`server`]: QUIC server for config subscriptions
//! - [`session`]: Session lifecycle state machine and storage
//! - [`supermodel`]: Cluster-wide snapshot of all active applications

#![deny(missing_docs)]

/// Application identifiers and activated application sets.
pub mod application;

/// Startup bootstrap: redeploy or load every known application.
pub mod bootstrap;

/// Checksum-deduplicated cache of served config payloads.
pub mod cache;

/// Server configuration loaded from environment variables.
pub mod config;

/// getConfig request handlers (validation, resolution, long-polling).
pub mod config_handlers;

/// Cluster coordination store abstraction and in-memory backend.
pub mod coordination;

/// Deployment orchestration: create, prepare, and activate sessions.
pub mod deploy;

/// Error types for core operations with protocol error code mapping.
pub mod error;

/// Application packages, config models, and host provisioning.
pub mod model;

/// Resolution of getConfig requests against active applications.
pub mod request_handler;

/// Embeddable runtime wiring coordination, deployment, and serving together.
pub mod runtime;

/// QUIC server implementation for config subscriptions.
pub mod server;

/// Session lifecycle state machine and storage.
pub mod session;

/// Cluster-wide snapshot of all active applications.
pub mod supermodel;

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QUIC server for gantry-core.
//!
//! Accepts connections from config subscribers and routes getConfig calls
//! to the config handlers.

pub mod config_server;

pub use config_server::{ConfigServerState, run_config_server};

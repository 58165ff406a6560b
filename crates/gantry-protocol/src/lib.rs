// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gantry Protocol - QUIC + JSON communication layer
//!
//! This crate provides the wire protocol between config subscribers and
//! gantry-core: the getConfig request/response contract (protocol
//! version 3), payload compression and checksumming, and the QUIC
//! transport both sides run on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    gantry-protocol                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  getConfig contract: request validation, update predicates, │
//! │  delayed (long-poll) responses, trace trees                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Payload codec: LZ4 raw blocks + MD5/xxhash64 checksums     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON metadata + binary payload section      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: QUIC (quinn)                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # The getConfig exchange
//!
//! A subscriber names the config it wants and what it already holds; the
//! server answers immediately when it has something newer, otherwise it
//! parks the request until the config changes or the request's timeout
//! runs out:
//!
//! ```text
//!  client                                  server
//!    │  GetConfig{key, generation=7, ...}    │
//!    │ ──────────────────────────────────▶   │
//!    │                                       │ nothing newer than 7:
//!    │                                       │ park until activation
//!    │                                       │ or timeout
//!    │   Response{generation=8, payload}     │
//!    │ ◀──────────────────────────────────   │
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gantry_protocol::{ConfigKey, ConfigRequestBuilder, GantryClient};
//!
//! let client = GantryClient::localhost()?;
//! client.connect().await?;
//!
//! let key = ConfigKey::new("query-limits", "platform.search", "search/qrs0");
//! let request = ConfigRequestBuilder::new(&key, "node1.example.com")
//!     .timeout_ms(30_000)
//!     .build();
//!
//! let (response, payload) = client.get_config(&request).await?;
//! let bytes = payload.to_uncompressed()?;
//! ```

pub mod checksum;
pub mod client;
pub mod compress;
pub mod error;
pub mod frame;
pub mod request;
pub mod response;
pub mod server;
pub mod trace;

// Re-export main types
pub use checksum::PayloadChecksums;
pub use client::{ClientError, GantryClient, GantryClientConfig};
pub use compress::{CompressionInfo, CompressionType, Payload};
pub use error::{ErrorCode, ProtocolError};
pub use frame::{Frame, FrameError, FramedStream, MessageType};
pub use request::{ConfigKey, ConfigRequest, ConfigRequestBuilder, PROTOCOL_VERSION, ProtocolConfig};
pub use response::{ConfigResponse, ErrorResponse};
pub use server::{
    ConnectionHandler, GantryServer, GantryServerConfig, ServerError, StreamHandler,
};
pub use trace::{Trace, TraceNode};

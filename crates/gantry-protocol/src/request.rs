// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The getConfig request.
//!
//! Request metadata travels as JSON in the frame's metadata section. A
//! request names the config it wants (definition name, namespace, config
//! id), describes what the client already holds (generation, payload
//! checksums) and how long the server may hold the request open before
//! answering.

use serde::{Deserialize, Serialize};

use crate::checksum::{self, PayloadChecksums};
use crate::compress::CompressionType;
use crate::error::ErrorCode;
use crate::trace::Trace;

/// The protocol version this crate speaks. Requests carrying any other
/// version are rejected before validation.
pub const PROTOCOL_VERSION: i64 = 3;

/// Identifies one config: which definition, for which consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey {
    /// Definition name, e.g. `query-limits`.
    pub name: String,
    /// Definition namespace, e.g. `platform.search`.
    pub namespace: String,
    /// Which consumer inside the application asks, e.g. a service id.
    pub config_id: String,
}

impl ConfigKey {
    /// Creates a key from its three parts.
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        config_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            config_id: config_id.into(),
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}@{}", self.namespace, self.name, self.config_id)
    }
}

/// True if `s` matches the definition name grammar `[A-Za-z][A-Za-z0-9_-]*`.
pub fn is_valid_def_name(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// True if `s` matches the namespace grammar `[a-z][a-z0-9._-]*`.
pub fn is_valid_namespace(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_lowercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'_' || b == b'-')
}

/// Metadata of a getConfig request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// Must be [`PROTOCOL_VERSION`].
    #[serde(rename = "protocolVersion")]
    pub protocol_version: i64,
    /// Definition name.
    #[serde(rename = "defName")]
    pub def_name: String,
    /// Definition namespace.
    #[serde(rename = "defNamespace")]
    pub def_namespace: String,
    /// MD5 of the definition schema the client was compiled with, or empty
    /// to accept whatever the server has.
    #[serde(rename = "defMD5", default)]
    pub def_md5: String,
    /// Schema text the client was compiled with, one line per element.
    /// Lets the server answer for definitions it does not know itself.
    #[serde(rename = "defContent", default)]
    pub def_content: Vec<String>,
    /// Which consumer inside the application asks.
    #[serde(rename = "configId")]
    pub config_id: String,
    /// Hostname of the requesting client, used for host-specific configs
    /// and diagnostics.
    #[serde(rename = "clientHostname")]
    pub client_hostname: String,
    /// Generation of the config the client currently holds, 0 for none.
    #[serde(rename = "currentGeneration", default)]
    pub current_generation: i64,
    /// MD5 of the payload the client currently holds, empty for none.
    #[serde(rename = "configMD5", default)]
    pub config_md5: String,
    /// xxhash64 of the payload the client currently holds, empty for none.
    #[serde(rename = "configXxhash64", default)]
    pub config_xxhash64: String,
    /// How long the server may hold the request open, in milliseconds.
    #[serde(rename = "timeout")]
    pub timeout_ms: i64,
    /// Compression the client wants for the response payload.
    #[serde(rename = "compressionType", default)]
    pub compression_type: CompressionType,
    /// Client library version, for diagnostics only.
    #[serde(rename = "clientVersion", default)]
    pub client_version: String,
    /// Trace carried along with the request.
    #[serde(default)]
    pub trace: Trace,
}

impl ConfigRequest {
    /// Checks every field against the wire contract, returning the error
    /// code of the first violated rule.
    pub fn validate(&self) -> Result<(), ErrorCode> {
        if !is_valid_def_name(&self.def_name) {
            return Err(ErrorCode::IllegalName);
        }
        if !is_valid_namespace(&self.def_namespace) {
            return Err(ErrorCode::IllegalNamespace);
        }
        if !self.def_md5.is_empty() && !checksum::is_well_formed_md5(&self.def_md5) {
            return Err(ErrorCode::IllegalDefMd5);
        }
        if !self.config_md5.is_empty() && !checksum::is_well_formed_md5(&self.config_md5) {
            return Err(ErrorCode::IllegalConfigMd5);
        }
        if !self.config_xxhash64.is_empty()
            && !checksum::is_well_formed_xxhash64(&self.config_xxhash64)
        {
            return Err(ErrorCode::IllegalConfigMd5);
        }
        if self.current_generation < 0 {
            return Err(ErrorCode::IllegalGeneration);
        }
        if self.timeout_ms <= 0 {
            return Err(ErrorCode::IllegalTimeout);
        }
        if self.client_hostname.is_empty() {
            return Err(ErrorCode::IllegalClientHostname);
        }
        Ok(())
    }

    /// The config this request asks for.
    pub fn config_key(&self) -> ConfigKey {
        ConfigKey::new(&self.def_name, &self.def_namespace, &self.config_id)
    }

    /// Checksums of the payload the client currently holds.
    pub fn checksums(&self) -> PayloadChecksums {
        PayloadChecksums::from_fields(
            Some(self.config_md5.clone()),
            Some(self.config_xxhash64.clone()),
        )
    }
}

/// Client-side protocol defaults, resolved once and applied to every
/// request a subscriber builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Compression requested for response payloads.
    pub compression: CompressionType,
    /// Trace level attached to every request, 0 for none.
    pub trace_level: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            compression: CompressionType::Lz4,
            trace_level: 0,
        }
    }
}

impl ProtocolConfig {
    /// Reads the defaults from environment variables.
    ///
    /// - `GANTRY_PROTOCOL_COMPRESSION`: `LZ4` or `UNCOMPRESSED` (default: `LZ4`)
    /// - `GANTRY_TRACE_LEVEL`: trace level for all requests (default: `0`)
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            compression: std::env::var("GANTRY_PROTOCOL_COMPRESSION")
                .ok()
                .and_then(|v| CompressionType::parse(&v).ok())
                .unwrap_or(default.compression),
            trace_level: std::env::var("GANTRY_TRACE_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.trace_level),
        }
    }
}

/// Builder used by clients and tests to assemble well-formed requests.
#[derive(Debug, Clone)]
pub struct ConfigRequestBuilder {
    request: ConfigRequest,
}

impl ConfigRequestBuilder {
    /// Starts a request for the given config key.
    pub fn new(key: &ConfigKey, client_hostname: impl Into<String>) -> Self {
        Self {
            request: ConfigRequest {
                protocol_version: PROTOCOL_VERSION,
                def_name: key.name.clone(),
                def_namespace: key.namespace.clone(),
                def_md5: String::new(),
                def_content: Vec::new(),
                config_id: key.config_id.clone(),
                client_hostname: client_hostname.into(),
                current_generation: 0,
                config_md5: String::new(),
                config_xxhash64: String::new(),
                timeout_ms: 10_000,
                compression_type: CompressionType::default(),
                client_version: env!("CARGO_PKG_VERSION").to_string(),
                trace: Trace::silent(),
            },
        }
    }

    /// Pins the definition schema the client was compiled with.
    pub fn def_schema(mut self, md5: impl Into<String>, content: Vec<String>) -> Self {
        self.request.def_md5 = md5.into();
        self.request.def_content = content;
        self
    }

    /// Describes the config the client already holds.
    pub fn current(mut self, generation: i64, checksums: &PayloadChecksums) -> Self {
        self.request.current_generation = generation;
        self.request.config_md5 = checksums.md5.clone().unwrap_or_default();
        self.request.config_xxhash64 = checksums.xxhash64.clone().unwrap_or_default();
        self
    }

    /// Sets the server-side hold timeout in milliseconds.
    pub fn timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.request.timeout_ms = timeout_ms;
        self
    }

    /// Asks the server to compress the response payload.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.request.compression_type = compression;
        self
    }

    /// Applies subscriber-wide defaults from a [`ProtocolConfig`].
    pub fn with_protocol(mut self, protocol: &ProtocolConfig) -> Self {
        self.request.compression_type = protocol.compression;
        if protocol.trace_level > 0 {
            self.request.trace = Trace::new(protocol.trace_level);
        }
        self
    }

    /// Attaches a trace recording at the given level.
    pub fn trace_level(mut self, level: u32) -> Self {
        self.request.trace = Trace::new(level);
        self
    }

    /// Finishes the builder.
    pub fn build(self) -> ConfigRequest {
        self.request
    }
}

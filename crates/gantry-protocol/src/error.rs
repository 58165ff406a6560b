// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Protocol error codes and decode errors.
//!
//! Every request that is rejected before resolution maps to exactly one
//! [`ErrorCode`]; the numeric values are part of the wire contract and
//! must never be reassigned.

use thiserror::Error;

/// Stable numeric error codes carried in error response metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// The requested application, config id, or config definition is unknown.
    UnknownConfig = 100_001,
    /// The def name does not match the definition name grammar.
    IllegalName = 100_002,
    /// The def namespace does not match the namespace grammar.
    IllegalNamespace = 100_003,
    /// The supplied def md5 is not a well-formed MD5 hex digest.
    IllegalDefMd5 = 100_004,
    /// A supplied config checksum is malformed.
    IllegalConfigMd5 = 100_005,
    /// The request generation is negative.
    IllegalGeneration = 100_006,
    /// The request timeout is zero or negative.
    IllegalTimeout = 100_007,
    /// The client hostname is empty.
    IllegalClientHostname = 100_008,
    /// Serialization, compression, or other server-side failure.
    InternalError = 100_009,
}

impl ErrorCode {
    /// The numeric wire value of this code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// The symbolic name used in log messages and error metadata.
    pub fn name(self) -> &'static str {
        match self {
            Self::UnknownConfig => "UNKNOWN_CONFIG",
            Self::IllegalName => "ILLEGAL_NAME",
            Self::IllegalNamespace => "ILLEGAL_NAME_SPACE",
            Self::IllegalDefMd5 => "ILLEGAL_DEF_MD5",
            Self::IllegalConfigMd5 => "ILLEGAL_CONFIG_MD5",
            Self::IllegalGeneration => "ILLEGAL_GENERATION",
            Self::IllegalTimeout => "ILLEGAL_TIMEOUT",
            Self::IllegalClientHostname => "ILLEGAL_CLIENT_HOSTNAME",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl TryFrom<u32> for ErrorCode {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            100_001 => Ok(Self::UnknownConfig),
            100_002 => Ok(Self::IllegalName),
            100_003 => Ok(Self::IllegalNamespace),
            100_004 => Ok(Self::IllegalDefMd5),
            100_005 => Ok(Self::IllegalConfigMd5),
            100_006 => Ok(Self::IllegalGeneration),
            100_007 => Ok(Self::IllegalTimeout),
            100_008 => Ok(Self::IllegalClientHostname),
            100_009 => Ok(Self::InternalError),
            _ => Err(ProtocolError::UnknownErrorCode(value)),
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.code())
    }
}

/// Errors raised while decoding or validating protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing metadata field: {0}")]
    MissingField(&'static str),

    #[error("unknown error code on wire: {0}")]
    UnknownErrorCode(u32),

    #[error("unknown compression type: {0}")]
    UnknownCompressionType(String),

    #[error("payload compression failed: {0}")]
    Compress(String),

    #[error("payload decompression failed: {0}")]
    Decompress(String),

    #[error("compression info is missing the uncompressed size")]
    MissingUncompressedSize,
}

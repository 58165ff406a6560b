// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Payload checksums.
//!
//! Checksums are always computed over the uncompressed canonical payload,
//! regardless of the compression applied on the wire. Two algorithms are
//! supported; a response carries every checksum the server computed and a
//! request carries whichever checksums the client knows for the config it
//! already holds.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

/// Seed for the xxhash64 checksum. Part of the wire contract.
const XXHASH64_SEED: u64 = 0;

/// Lowercase MD5 hex digest of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Lowercase 16-character xxhash64 hex digest of `data`.
pub fn xxhash64_hex(data: &[u8]) -> String {
    format!("{:016x}", XxHash64::oneshot(XXHASH64_SEED, data))
}

/// True if `s` is a well-formed MD5 hex digest (32 hex characters).
pub fn is_well_formed_md5(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// True if `s` is a well-formed xxhash64 hex digest (16 hex characters).
pub fn is_well_formed_xxhash64(s: &str) -> bool {
    s.len() == 16 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The set of checksums for one payload, keyed by algorithm.
///
/// Either side of the protocol may know only a subset of algorithms, so
/// both fields are optional. An empty string is treated the same as an
/// absent checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PayloadChecksums {
    /// MD5 hex digest, if known.
    pub md5: Option<String>,
    /// xxhash64 hex digest, if known.
    pub xxhash64: Option<String>,
}

impl PayloadChecksums {
    /// Computes both checksums over an uncompressed payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            md5: Some(md5_hex(payload)),
            xxhash64: Some(xxhash64_hex(payload)),
        }
    }

    /// Builds a checksum set from wire fields, normalizing empty strings
    /// to absent.
    pub fn from_fields(md5: Option<String>, xxhash64: Option<String>) -> Self {
        Self {
            md5: md5.filter(|s| !s.is_empty()),
            xxhash64: xxhash64.filter(|s| !s.is_empty()),
        }
    }

    /// True if no checksum is present for any algorithm.
    pub fn is_empty(&self) -> bool {
        self.md5.is_none() && self.xxhash64.is_none()
    }

    /// Whether a payload with checksums `self` differs from one the peer
    /// described with `other`.
    ///
    /// For every algorithm known to both sides the digests are compared;
    /// any mismatch means the payloads differ. If no algorithm is known to
    /// both sides there is nothing to compare and the payloads are assumed
    /// to differ.
    pub fn differs_from(&self, other: &PayloadChecksums) -> bool {
        let mut comparable = false;
        if let (Some(a), Some(b)) = (&self.md5, &other.md5) {
            comparable = true;
            if a != b {
                return true;
            }
        }
        if let (Some(a), Some(b)) = (&self.xxhash64, &other.xxhash64) {
            comparable = true;
            if a != b {
                return true;
            }
        }
        !comparable
    }
}

impl std::fmt::Display for PayloadChecksums {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "md5={},xxhash64={}",
            self.md5.as_deref().unwrap_or(""),
            self.xxhash64.as_deref().unwrap_or("")
        )
    }
}

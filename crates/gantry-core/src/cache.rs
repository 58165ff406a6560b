// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Server-side config cache with checksum deduplication.
//!
//! Resolved configs are cached twice over: a key map from (config key,
//! generation) to the payload checksums, and a payload map from checksums to
//! the cached entry. Two generations that produce byte-identical payloads
//! share one entry through the second map, which is what makes long-poll
//! answers cheap when a redeploy changes nothing.
//!
//! Population runs under one of 113 striped locks chosen by checksum hash,
//! so a given payload is computed at most once no matter how many clients
//! ask for it concurrently. Entries are never evicted; generations are
//! retired naturally when clients move on.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;

use gantry_protocol::checksum::PayloadChecksums;

use crate::error::CoreError;

const STRIPES: usize = 113;

/// Cache key: one config of one application generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Definition name.
    pub def_name: String,
    /// Definition namespace.
    pub def_namespace: String,
    /// Definition content hash, empty when the client sent none.
    pub def_md5: String,
    /// Config id within the application.
    pub config_id: String,
    /// Application generation the entry was resolved against.
    pub generation: i64,
}

/// A resolved config payload and its identity.
#[derive(Debug, Clone)]
pub struct CachedConfig {
    /// Generation the payload was resolved against.
    pub generation: i64,
    /// Checksums of the uncompressed payload.
    pub checksums: PayloadChecksums,
    /// Uncompressed payload bytes.
    pub payload: Bytes,
    /// Whether consumers need a restart to pick this config up.
    pub apply_on_restart: bool,
}

/// Concurrent config cache shared by all request handlers.
pub struct ServerCache {
    entries: DashMap<CacheKey, PayloadChecksums>,
    responses: DashMap<PayloadChecksums, Arc<CachedConfig>>,
    stripes: Vec<Mutex<()>>,
}

impl Default for ServerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            responses: DashMap::new(),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Look up a cached entry by key.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CachedConfig>> {
        let checksums = self.entries.get(key)?.value().clone();
        self.responses.get(&checksums).map(|e| e.value().clone())
    }

    /// Return the entry for `checksums`, calling `supplier` to produce it
    /// when absent.
    ///
    /// The supplier runs at most once per distinct checksum value; a second
    /// key resolving to the same checksums reuses the first entry without
    /// recomputing. A failing supplier populates nothing, so the next call
    /// retries.
    pub fn compute_if_absent<F>(
        &self,
        key: CacheKey,
        checksums: PayloadChecksums,
        supplier: F,
    ) -> Result<Arc<CachedConfig>, CoreError>
    where
        F: FnOnce() -> Result<Arc<CachedConfig>, CoreError>,
    {
        // Lock-free fast path for the common case of a warm cache.
        if let Some(cached) = self.responses.get(&checksums) {
            let cached = cached.value().clone();
            self.entries.insert(key, checksums);
            return Ok(cached);
        }

        let guard = self.stripe(&checksums).lock().unwrap_or_else(|e| e.into_inner());
        // Re-check under the stripe: another handler may have populated the
        // entry while we waited for the lock.
        let cached = match self.responses.get(&checksums) {
            Some(existing) => existing.value().clone(),
            None => {
                let produced = supplier()?;
                self.responses.insert(checksums.clone(), produced.clone());
                produced
            }
        };
        drop(guard);

        self.entries.insert(key, checksums);
        Ok(cached)
    }

    /// Number of distinct keys in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct payloads in the cache.
    pub fn payload_count(&self) -> usize {
        self.responses.len()
    }

    fn stripe(&self, checksums: &PayloadChecksums) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        checksums.hash(&mut hasher);
        &self.stripes[(hasher.finish() as usize) % STRIPES]
    }
}

impl std::fmt::Debug for ServerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCache")
            .field("keys", &self.entries.len())
            .field("payloads", &self.responses.len())
            .finish()
    }
}

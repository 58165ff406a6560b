// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordination interfaces and backends for gantry-core.
//!
//! The coordination store holds everything config servers share: session
//! records, active-session pointers, counters, locks, and activation
//! barriers. Paths are absolute, `/`-separated node names.

pub mod memory;

pub use self::memory::MemoryCoordinator;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

/// Errors from the coordination store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoordinationError {
    /// A node creation hit an existing node.
    #[error("node '{0}' already exists")]
    NodeExists(String),

    /// A node that was expected to exist is missing.
    #[error("node '{0}' does not exist")]
    NoNode(String),

    /// An exclusive lock could not be acquired within the timeout.
    #[error("timed out waiting for lock '{0}'")]
    LockTimeout(String),

    /// A completion barrier did not fill up within the timeout.
    #[error("timed out waiting for barrier '{0}'")]
    BarrierTimeout(String),

    /// A transaction failed validation and applied nothing.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// The backend itself failed.
    #[error("coordination backend error: {0}")]
    Backend(String),
}

impl CoordinationError {
    /// Short name of the operation that produced this error.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::NodeExists(_) => "create",
            Self::NoNode(_) => "get",
            Self::LockTimeout(_) => "lock",
            Self::BarrierTimeout(_) => "barrier",
            Self::TransactionAborted(_) => "transaction",
            Self::Backend(_) => "backend",
        }
    }
}

/// One write in an atomic transaction.
#[derive(Debug, Clone)]
pub enum TxOp {
    /// Create a node; aborts the transaction if the node exists.
    Create {
        /// Absolute node path.
        path: String,
        /// Node payload.
        data: Vec<u8>,
    },
    /// Set a node's data, creating the node when missing.
    Set {
        /// Absolute node path.
        path: String,
        /// Node payload.
        data: Vec<u8>,
    },
    /// Delete a node and everything below it.
    Delete {
        /// Absolute node path.
        path: String,
    },
}

/// RAII guard for an exclusive coordination lock.
///
/// The lock is released when the guard is dropped.
pub struct CoordinationLock {
    _guard: Box<dyn std::any::Any + Send>,
}

impl CoordinationLock {
    /// Wrap a backend-specific guard object.
    pub fn new(guard: impl std::any::Any + Send) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for CoordinationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinationLock").finish_non_exhaustive()
    }
}

/// Coordination interface used by the session store and deployment layer.
#[allow(missing_docs)]
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    async fn set(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError>;

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError>;

    /// Delete a node and its subtree. Returns false when nothing existed.
    async fn delete(&self, path: &str) -> Result<bool, CoordinationError>;

    async fn exists(&self, path: &str) -> Result<bool, CoordinationError> {
        Ok(self.get(path).await?.is_some())
    }

    /// Direct child names one level below `path`, sorted.
    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError>;

    // ========================================================================
    // Counters
    // ========================================================================

    /// Atomically increment a counter and return the new value.
    ///
    /// Counters start at zero, so the first increment returns 1.
    async fn increment_and_get(&self, counter: &str) -> Result<i64, CoordinationError>;

    /// Read a counter without changing it. Missing counters read as zero.
    async fn get_counter(&self, counter: &str) -> Result<i64, CoordinationError>;

    // ========================================================================
    // Locks and transactions
    // ========================================================================

    /// Acquire an exclusive lock on `path`, waiting up to `timeout`.
    async fn lock(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<CoordinationLock, CoordinationError>;

    /// Apply all operations atomically, or none of them.
    async fn transaction(&self, ops: Vec<TxOp>) -> Result<(), CoordinationError>;

    // ========================================================================
    // Activation barriers
    // ========================================================================

    /// Record that `member` has observed the change behind `barrier`.
    async fn notify_completion(
        &self,
        barrier: &str,
        member: &str,
    ) -> Result<(), CoordinationError>;

    /// Wait until `expected` distinct members have notified `barrier`.
    async fn await_completion(
        &self,
        barrier: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), CoordinationError>;
}

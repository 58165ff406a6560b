// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory coordination backend.
//!
//! Single-process stand-in for a shared coordination cluster. This is the
//! backend used by embedded deployments and tests; nodes, counters, locks,
//! and barriers all live behind process-local mutexes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{CoordinationError, CoordinationLock, Coordinator, TxOp};

#[derive(Default)]
struct Store {
    nodes: BTreeMap<String, Vec<u8>>,
    counters: BTreeMap<String, i64>,
}

struct Barrier {
    members: BTreeSet<String>,
    tx: watch::Sender<usize>,
}

/// In-memory [`Coordinator`] implementation.
#[derive(Default)]
pub struct MemoryCoordinator {
    store: Mutex<Store>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    barriers: Mutex<HashMap<String, Barrier>>,
}

impl MemoryCoordinator {
    /// Create an empty coordination store.
    pub fn new() -> Self {
        Self::default()
    }

    fn barrier_receiver(&self, barrier: &str) -> watch::Receiver<usize> {
        let mut barriers = self.barriers.lock().unwrap();
        barriers
            .entry(barrier.to_string())
            .or_insert_with(|| {
                let (tx, _rx) = watch::channel(0);
                Barrier {
                    members: BTreeSet::new(),
                    tx,
                }
            })
            .tx
            .subscribe()
    }

    fn apply_staged(
        nodes: &mut BTreeMap<String, Vec<u8>>,
        op: &TxOp,
    ) -> Result<(), CoordinationError> {
        match op {
            TxOp::Create { path, data } => {
                if nodes.contains_key(path) {
                    return Err(CoordinationError::TransactionAborted(format!(
                        "node '{}' already exists",
                        path
                    )));
                }
                nodes.insert(path.clone(), data.clone());
            }
            TxOp::Set { path, data } => {
                nodes.insert(path.clone(), data.clone());
            }
            TxOp::Delete { path } => {
                let prefix = subtree_prefix(path);
                nodes.retain(|key, _| key != path && !key.starts_with(&prefix));
            }
        }
        Ok(())
    }
}

fn subtree_prefix(path: &str) -> String {
    format!("{}/", path.trim_end_matches('/'))
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn create(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        let mut store = self.store.lock().unwrap();
        if store.nodes.contains_key(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        store.nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn set(&self, path: &str, data: &[u8]) -> Result<(), CoordinationError> {
        let mut store = self.store.lock().unwrap();
        store.nodes.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>, CoordinationError> {
        let store = self.store.lock().unwrap();
        Ok(store.nodes.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<bool, CoordinationError> {
        let mut store = self.store.lock().unwrap();
        let prefix = subtree_prefix(path);
        let before = store.nodes.len();
        store
            .nodes
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        Ok(store.nodes.len() != before)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordinationError> {
        let prefix = subtree_prefix(path);
        let store = self.store.lock().unwrap();
        let mut names = BTreeSet::new();
        for key in store.nodes.range(prefix.clone()..) {
            let Some(rest) = key.0.strip_prefix(&prefix) else {
                break;
            };
            // Implicit directories count: "/a/b/c" makes "b" a child of "/a".
            let segment = rest.split('/').next().unwrap_or(rest);
            if !segment.is_empty() {
                names.insert(segment.to_string());
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn increment_and_get(&self, counter: &str) -> Result<i64, CoordinationError> {
        let mut store = self.store.lock().unwrap();
        let value = store.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn get_counter(&self, counter: &str) -> Result<i64, CoordinationError> {
        let store = self.store.lock().unwrap();
        Ok(store.counters.get(counter).copied().unwrap_or(0))
    }

    async fn lock(
        &self,
        path: &str,
        timeout: Duration,
    ) -> Result<CoordinationLock, CoordinationError> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(path.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| CoordinationError::LockTimeout(path.to_string()))?;
        Ok(CoordinationLock::new(guard))
    }

    async fn transaction(&self, ops: Vec<TxOp>) -> Result<(), CoordinationError> {
        let mut store = self.store.lock().unwrap();
        let mut staged = store.nodes.clone();
        for op in &ops {
            Self::apply_staged(&mut staged, op)?;
        }
        store.nodes = staged;
        Ok(())
    }

    async fn notify_completion(
        &self,
        barrier: &str,
        member: &str,
    ) -> Result<(), CoordinationError> {
        let mut barriers = self.barriers.lock().unwrap();
        let entry = barriers.entry(barrier.to_string()).or_insert_with(|| {
            let (tx, _rx) = watch::channel(0);
            Barrier {
                members: BTreeSet::new(),
                tx,
            }
        });
        entry.members.insert(member.to_string());
        let count = entry.members.len();
        entry.tx.send_replace(count);
        Ok(())
    }

    async fn await_completion(
        &self,
        barrier: &str,
        expected: usize,
        timeout: Duration,
    ) -> Result<(), CoordinationError> {
        let mut rx = self.barrier_receiver(barrier);
        match tokio::time::timeout(timeout, rx.wait_for(|count| *count >= expected)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(CoordinationError::Backend(
                "barrier channel closed".to_string(),
            )),
            Err(_) => Err(CoordinationError::BarrierTimeout(barrier.to_string())),
        }
    }
}

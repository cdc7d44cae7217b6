use crate::errors::{PreviewError, PreviewResult};
use crate::games::types::RequestId;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// Identifies one watcher among several watching the same id
pub type WatchToken = u64;

type Waiter = oneshot::Sender<PreviewResult<Value>>;

/// Thread-safe table of request ids with callers waiting on their preview
#[derive(Clone, Default)]
pub struct WatchRegistry {
    watches: Arc<DashMap<RequestId, HashMap<WatchToken, Waiter>>>,
    next_token: Arc<AtomicU64>,
}

impl WatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `id`; the receiver resolves on completion or failure
    pub fn register(&self, id: RequestId) -> (WatchToken, oneshot::Receiver<PreviewResult<Value>>) {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.watches.entry(id).or_default().insert(token, tx);
        (token, rx)
    }

    /// Resolve every watcher of `id` with `result`, returning how many were waiting
    pub fn complete(&self, id: RequestId, result: Value) -> usize {
        match self.watches.remove(&id) {
            Some((_, waiters)) => {
                let count = waiters.len();
                for (_, tx) in waiters {
                    // watcher may have given up already
                    let _ = tx.send(Ok(result.clone()));
                }
                count
            }
            None => 0,
        }
    }

    /// Drop one watcher (timeout or abandoned future)
    pub fn cancel(&self, id: RequestId, token: WatchToken) -> bool {
        let removed = match self.watches.get_mut(&id) {
            Some(mut waiters) => waiters.remove(&token).is_some(),
            None => false,
        };
        self.watches.remove_if(&id, |_, waiters| waiters.is_empty());
        removed
    }

    /// Fail every outstanding watcher with `error`
    pub fn fail_all(&self, error: PreviewError) -> usize {
        let ids: Vec<RequestId> = self.active_ids();
        let mut failed = 0;
        for id in ids {
            if let Some((_, waiters)) = self.watches.remove(&id) {
                for (_, tx) in waiters {
                    failed += 1;
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
        failed
    }

    /// Ids with at least one watcher, ascending
    pub fn active_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.watches.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_watching(&self, id: RequestId) -> bool {
        self.watches.contains_key(&id)
    }

    pub fn watcher_count(&self) -> usize {
        self.watches.iter().map(|entry| entry.value().len()).sum()
    }
}

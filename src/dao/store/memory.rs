//! In-process [`KvStore`] used for single-node deployments and tests.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::dao::{
    storage::{StorageError, StorageResult},
    store::{KvStore, StoreChange, tree},
};

const CHANGE_CAPACITY: usize = 256;
const NO_FAULT: usize = usize::MAX;

/// JSON tree kept in memory. Batched updates are applied under a single lock.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    root: RwLock<Value>,
    changes: broadcast::Sender<StoreChange>,
    /// Remaining write calls allowed before the store starts failing.
    writes_before_fault: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(MemoryInner {
                root: RwLock::new(Value::Object(Map::new())),
                changes,
                writes_before_fault: AtomicUsize::new(NO_FAULT),
            }),
        }
    }

    /// Simulate an outage: accept `successful` more write calls (`write` or
    /// `update`), then fail every following one until [`MemoryStore::heal`].
    pub fn fail_writes_after(&self, successful: usize) {
        self.inner
            .writes_before_fault
            .store(successful, Ordering::SeqCst);
    }

    /// Stop failing writes.
    pub fn heal(&self) {
        self.inner
            .writes_before_fault
            .store(NO_FAULT, Ordering::SeqCst);
    }

    /// Copy of the whole tree.
    pub async fn dump(&self) -> Value {
        self.inner.root.read().await.clone()
    }

    fn check_fault(&self, path: &str) -> StorageResult<()> {
        let allowed = self
            .inner
            .writes_before_fault
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                match remaining {
                    NO_FAULT => Some(NO_FAULT),
                    0 => None,
                    n => Some(n - 1),
                }
            })
            .is_ok();

        if allowed {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                format!("write to `{path}` rejected"),
                io::Error::new(io::ErrorKind::ConnectionAborted, "simulated outage"),
            ))
        }
    }

    fn notify(&self, path: &str) {
        debug!(path, "memory store change");
        let _ = self.inner.changes.send(StoreChange {
            path: path.to_string(),
        });
    }
}

impl KvStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            let root = store.inner.root.read().await;
            Ok(tree::get(&root, &tree::segments(&path)).cloned())
        })
    }

    fn write(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let path = path.to_string();
        Box::pin(async move {
            store.check_fault(&path)?;
            {
                let mut root = store.inner.root.write().await;
                tree::set(&mut root, &tree::segments(&path), value);
            }
            store.notify(&path);
            Ok(())
        })
    }

    fn update(&self, writes: Vec<(String, Value)>) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let label = writes
                .first()
                .map(|(path, _)| path.clone())
                .unwrap_or_default();
            store.check_fault(&label)?;
            {
                let mut root = store.inner.root.write().await;
                for (path, value) in &writes {
                    tree::set(&mut root, &tree::segments(path), value.clone());
                }
            }
            for (path, _) in &writes {
                store.notify(path);
            }
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn reads_return_subtrees() {
        let store = MemoryStore::new();
        store
            .write("submissions/A/current/p1", json!({"rank": 1}))
            .await
            .unwrap();
        store
            .write("submissions/A/current/p2", json!({"rank": 2}))
            .await
            .unwrap();

        let current = store.read("submissions/A/current").await.unwrap().unwrap();
        assert_eq!(current["p1"]["rank"], 1);
        assert_eq!(current["p2"]["rank"], 2);
        assert!(store.read("submissions/B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn null_write_deletes() {
        let store = MemoryStore::new();
        store.write("totals/A", json!({"p1": 3})).await.unwrap();
        store.write("totals/A", Value::Null).await.unwrap();
        assert!(store.read("totals/A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_applies_every_path_and_notifies() {
        let store = MemoryStore::new();
        let mut changes = store.subscribe();
        store
            .update(vec![
                ("activePointer/A".into(), json!({"raceKey": "2"})),
                ("submissions/A/current".into(), Value::Null),
            ])
            .await
            .unwrap();

        assert_eq!(
            store.read("activePointer/A").await.unwrap(),
            Some(json!({"raceKey": "2"}))
        );
        assert_eq!(changes.recv().await.unwrap().path, "activePointer/A");
        assert_eq!(changes.recv().await.unwrap().path, "submissions/A/current");
    }

    #[tokio::test]
    async fn injected_fault_rejects_writes_until_healed() {
        let store = MemoryStore::new();
        store.fail_writes_after(1);
        store.write("a/b", json!(1)).await.unwrap();
        assert!(store.write("a/c", json!(2)).await.is_err());
        assert!(store.update(vec![("a/d".into(), json!(3))]).await.is_err());
        assert!(store.read("a/c").await.unwrap().is_none());

        store.heal();
        store.write("a/c", json!(2)).await.unwrap();
        assert_eq!(store.read("a/c").await.unwrap(), Some(json!(2)));
    }
}

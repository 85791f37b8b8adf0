#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
pub mod tree;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::dao::storage::StorageResult;

/// Notification emitted after a path (or one of its descendants) changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Slash separated path of the change. Backends may report a coarser
    /// ancestor of the written path.
    pub path: String,
}

/// Shared, observable JSON key-value store addressed by slash separated paths.
///
/// Reads return the whole subtree under a path, writes replace it (a `null`
/// value deletes it). There is no locking: last write wins per path.
pub trait KvStore: Send + Sync {
    /// Short backend name used in logs and health reports.
    fn name(&self) -> &'static str;
    /// Read the subtree at `path`, `None` when nothing is stored there.
    fn read(&self, path: &str) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    /// Replace the subtree at `path` with `value` (`Value::Null` removes it).
    fn write(&self, path: &str, value: Value) -> BoxFuture<'static, StorageResult<()>>;
    /// Apply several path writes as one batch. Backends that cannot apply the
    /// batch atomically may leave it partially applied when they fail.
    fn update(&self, writes: Vec<(String, Value)>) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to change notifications.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

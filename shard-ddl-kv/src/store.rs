//! The [`KvStore`] trait: the abstract consistent KV store the coordinator is built against.
//! Two implementations exist: [`crate::memory::MemoryKvStore`] for tests and
//! [`crate::etcd::EtcdKvStore`] for production — an injected, swappable consensus backend.

use async_trait::async_trait;
use shard_ddl_errors::ShardDdlResult;
use tokio::sync::mpsc;

/// One change observed on a watched prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// `None` means the key was deleted.
    pub value: Option<Vec<u8>>,
    pub revision: u64,
}

/// The consistent KV store primitives the design requires: get, put, delete, a multi-key
/// atomic transaction, prefix scan, and resumable prefix watch.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> ShardDdlResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> ShardDdlResult<()>;

    async fn delete(&self, key: &str) -> ShardDdlResult<()>;

    /// Write every key in `puts` atomically: either all of them land, or none do.
    async fn txn_put(&self, puts: Vec<(String, Vec<u8>)>) -> ShardDdlResult<()>;

    /// All key-value pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &str) -> ShardDdlResult<Vec<(String, Vec<u8>)>>;

    /// Subscribe to future changes under `prefix`, starting strictly after `start_revision`
    /// (`0` means "from the beginning of the watch, i.e. only future changes").
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: u64,
    ) -> ShardDdlResult<mpsc::Receiver<WatchEvent>>;
}

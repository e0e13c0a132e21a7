//! An in-process, `DashMap`-backed [`KvStore`] used by every test that doesn't specifically
//! need a live etcd. Exercises the exact same trait the `EtcdKvStore` implements, so the
//! coordinator logic above it runs identically against either backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use shard_ddl_errors::ShardDdlResult;
use tokio::sync::{broadcast, mpsc};

use crate::store::{KvStore, WatchEvent};

#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    revision: u64,
}

/// An in-memory `KvStore`. Cheap to construct; clone to share the same backing map (it's an
/// `Arc` internally, mirroring how `MemoryKvStore::default()` handles are passed around a
/// test's threads the same way a real etcd client handle would be).
#[derive(Clone)]
pub struct MemoryKvStore {
    data: Arc<DashMap<String, Entry>>,
    next_revision: Arc<AtomicU64>,
    changes: broadcast::Sender<WatchEvent>,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(1024);
        MemoryKvStore {
            data: Arc::new(DashMap::new()),
            next_revision: Arc::new(AtomicU64::new(1)),
            changes,
        }
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst)
    }

    fn apply_put(&self, key: String, value: Vec<u8>) -> WatchEvent {
        let revision = self.bump_revision();
        self.data.insert(
            key.clone(),
            Entry {
                value: value.clone(),
                revision,
            },
        );
        WatchEvent {
            key,
            value: Some(value),
            revision,
        }
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ShardDdlResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ShardDdlResult<()> {
        let event = self.apply_put(key.to_string(), value);
        let _ = self.changes.send(event);
        Ok(())
    }

    async fn delete(&self, key: &str) -> ShardDdlResult<()> {
        if self.data.remove(key).is_some() {
            let revision = self.bump_revision();
            let _ = self.changes.send(WatchEvent {
                key: key.to_string(),
                value: None,
                revision,
            });
        }
        Ok(())
    }

    async fn txn_put(&self, puts: Vec<(String, Vec<u8>)>) -> ShardDdlResult<()> {
        // All keys land together; there's a single writer (the elected master owns the only
        // handle that mutates a given lock), so no compare-and-swap is needed here, only
        // atomicity across the keys in one call.
        let events: Vec<WatchEvent> = puts
            .into_iter()
            .map(|(key, value)| self.apply_put(key, value))
            .collect();
        for event in events {
            let _ = self.changes.send(event);
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> ShardDdlResult<Vec<(String, Vec<u8>)>> {
        let mut out: Vec<(String, Vec<u8>)> = self
            .data
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (entry.key().clone(), entry.value().value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: u64,
    ) -> ShardDdlResult<mpsc::Receiver<WatchEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let mut changes = self.changes.subscribe();
        let prefix_for_task = prefix.to_string();
        tokio::spawn(async move {
            while let Ok(event) = changes.recv().await {
                if event.revision > start_revision && event.key.starts_with(&prefix_for_task) {
                    if tx.send(event).await.is_err() {
                        tracing::debug!(prefix = %prefix_for_task, "watch receiver dropped, stopping forwarder");
                        break;
                    }
                }
            }
        });
        tracing::debug!(%prefix, start_revision, "watch subscription established");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_roundtrips() {
        let kv = MemoryKvStore::new();
        kv.put("a", b"1".to_vec()).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn scan_prefix_is_sorted_and_scoped() {
        let kv = MemoryKvStore::new();
        kv.put("x/1", b"a".to_vec()).await.unwrap();
        kv.put("x/2", b"b".to_vec()).await.unwrap();
        kv.put("y/1", b"c".to_vec()).await.unwrap();
        let scanned = kv.scan_prefix("x/").await.unwrap();
        assert_eq!(
            scanned,
            vec![
                ("x/1".to_string(), b"a".to_vec()),
                ("x/2".to_string(), b"b".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let kv = MemoryKvStore::new();
        kv.put("a", b"1".to_vec()).await.unwrap();
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn watch_prefix_observes_future_puts_only() {
        let kv = MemoryKvStore::new();
        kv.put("w/old", b"before".to_vec()).await.unwrap();
        let mut rx = kv.watch_prefix("w/", 0).await.unwrap();
        kv.put("w/new", b"after".to_vec()).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.key, "w/new");
        assert_eq!(event.value, Some(b"after".to_vec()));
    }
}

//! Production [`KvStore`] backed by `etcd-client`. A consistent KV / consensus store is
//! injected as a swappable backend, the same way other distributed-database systems consume
//! one; `etcd-client` is the concrete crate chosen to play that role here.

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, DeleteOptions, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use shard_ddl_errors::{persistence_failure, ShardDdlResult};
use tokio::sync::{mpsc, Mutex};

use crate::store::{KvStore, WatchEvent};

/// A `KvStore` backed by a real etcd cluster.
pub struct EtcdKvStore {
    client: Mutex<Client>,
}

impl EtcdKvStore {
    /// Connect to the given etcd endpoints (e.g. `["http://127.0.0.1:2379"]`).
    pub async fn connect(endpoints: &[String]) -> ShardDdlResult<Self> {
        let client = Client::connect(endpoints, None)
            .await
            .map_err(persistence_failure)?;
        tracing::info!(?endpoints, "connected to etcd");
        Ok(EtcdKvStore {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl KvStore for EtcdKvStore {
    async fn get(&self, key: &str) -> ShardDdlResult<Option<Vec<u8>>> {
        let mut client = self.client.lock().await.clone();
        let resp = client.get(key, None).await.map_err(persistence_failure)?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> ShardDdlResult<()> {
        let mut client = self.client.lock().await.clone();
        client
            .put(key, value, None)
            .await
            .map_err(persistence_failure)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> ShardDdlResult<()> {
        let mut client = self.client.lock().await.clone();
        client
            .delete(key, None::<DeleteOptions>)
            .await
            .map_err(persistence_failure)?;
        Ok(())
    }

    async fn txn_put(&self, puts: Vec<(String, Vec<u8>)>) -> ShardDdlResult<()> {
        let mut client = self.client.lock().await.clone();
        // An empty `when` clause always evaluates true, so `and_then` commits unconditionally
        // and atomically: either every key in `puts` lands, or the whole transaction fails.
        let ops: Vec<TxnOp> = puts
            .into_iter()
            .map(|(key, value)| TxnOp::put(key, value, Some(PutOptions::new())))
            .collect();
        let txn = Txn::new()
            .when(Vec::<Compare>::new())
            .and_then(ops);
        client.txn(txn).await.map_err(persistence_failure)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> ShardDdlResult<Vec<(String, Vec<u8>)>> {
        let mut client = self.client.lock().await.clone();
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await
            .map_err(persistence_failure)?;
        let mut out: Vec<(String, Vec<u8>)> = resp
            .kvs()
            .iter()
            .map(|kv| (String::from_utf8_lossy(kv.key()).into_owned(), kv.value().to_vec()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision: u64,
    ) -> ShardDdlResult<mpsc::Receiver<WatchEvent>> {
        let mut client = self.client.lock().await.clone();
        let mut options = WatchOptions::new().with_prefix();
        if start_revision > 0 {
            options = options.with_start_revision(start_revision as i64 + 1);
        }
        let (_watcher, mut stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(persistence_failure)?;

        let (tx, rx) = mpsc::channel(256);
        let watched_prefix = prefix.to_string();
        tokio::spawn(async move {
            // Keep the watcher alive for the lifetime of the forwarding task.
            let _watcher = _watcher;
            while let Ok(Some(resp)) = stream.message().await {
                for event in resp.events() {
                    let Some(kv) = event.kv() else { continue };
                    let key = String::from_utf8_lossy(kv.key()).into_owned();
                    let value = match event.event_type() {
                        EventType::Put => Some(kv.value().to_vec()),
                        EventType::Delete => None,
                    };
                    let watch_event = WatchEvent {
                        key,
                        value,
                        revision: kv.mod_revision() as u64,
                    };
                    if tx.send(watch_event).await.is_err() {
                        tracing::debug!(prefix = %watched_prefix, "watch receiver dropped, stopping forwarder");
                        return;
                    }
                }
            }
            tracing::warn!(prefix = %watched_prefix, "etcd watch stream ended");
        });
        Ok(rx)
    }
}

//! The downstream-metadata cache: per-task `DownstreamMeta`, lazily resolved and explicitly
//! invalidated. Lives inside `LockKeeper`, guarded by the same mutex as the lock map —
//! `LockKeeper` owns exactly one mutex covering its map and this cache.

use std::sync::Arc;

use shard_ddl_errors::{configuration_not_found, ShardDdlResult};

/// Cached downstream connection/meta-schema info for one task. Identity (`Arc` pointer)
/// matters: tests assert two successful lookups for the same task return the same object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamMeta {
    pub db_config: String,
    pub meta_schema_name: String,
}

/// An injected resolver: given a task, produce its downstream config, or `None` if the task
/// is unknown. A `(task) -> (dbConfig, metaSchemaName)` callback, kept swappable behind a
/// trait object so tests can supply a closure instead of a real config lookup.
pub trait DownstreamMetaResolver: Send + Sync {
    fn resolve(&self, task: &str) -> Option<DownstreamMeta>;
}

impl<F> DownstreamMetaResolver for F
where
    F: Fn(&str) -> Option<DownstreamMeta> + Send + Sync,
{
    fn resolve(&self, task: &str) -> Option<DownstreamMeta> {
        self(task)
    }
}

/// Per-task cache of `Arc<DownstreamMeta>`. Not concurrency-safe on its own; callers hold it
/// behind `LockKeeper`'s single mutex.
#[derive(Default)]
pub struct DownstreamMetaCache {
    entries: std::collections::HashMap<String, Arc<DownstreamMeta>>,
}

impl DownstreamMetaCache {
    pub fn new() -> Self {
        DownstreamMetaCache::default()
    }

    pub fn get_or_resolve(
        &mut self,
        task: &str,
        resolver: &dyn DownstreamMetaResolver,
    ) -> ShardDdlResult<Arc<DownstreamMeta>> {
        if let Some(meta) = self.entries.get(task) {
            return Ok(Arc::clone(meta));
        }
        let meta = resolver
            .resolve(task)
            .ok_or_else(|| configuration_not_found(task))?;
        let meta = Arc::new(meta);
        self.entries.insert(task.to_string(), Arc::clone(&meta));
        Ok(meta)
    }

    pub fn remove(&mut self, task: &str) {
        self.entries.remove(task);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

//! [`LockKeeper`]: owns every live `Lock`, routes incoming `Info` to the right one, and holds
//! the downstream-metadata cache behind the same mutex. The keeper's mutex and a lock's own
//! mutex are never held at once: the keeper's critical section is released before a lock's
//! mutex is ever touched.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use shard_ddl_errors::ShardDdlResult;
use shard_ddl_kv::{persist_try_sync, put_init_schema_if_absent, put_tracked_column, remove_tracked_column, KvStore};
use shard_ddl_types::{lock_id as compute_lock_id, InitSchema, Info, Operation, TargetTable};
use tracing::instrument;

use crate::downstream_meta::{DownstreamMeta, DownstreamMetaCache, DownstreamMetaResolver};
use crate::lock::{ColumnDelta, Lock};
use crate::member::MemberKey;

struct LockKeeperState {
    locks: HashMap<String, Arc<Lock>>,
    downstream_meta: DownstreamMetaCache,
}

/// The result of `LockKeeper::try_sync`: the lock this Info landed in, the DDLs the calling
/// source should apply, and the resulting tracked-column delta.
pub struct TrySyncOutcome {
    pub lock_id: String,
    pub ddls: Vec<String>,
    pub column_deltas: Vec<ColumnDelta>,
    pub conflict_stage: shard_ddl_types::ConflictStage,
}

#[derive(Default)]
pub struct LockKeeper {
    state: Mutex<LockKeeperState>,
}

impl Default for LockKeeperState {
    fn default() -> Self {
        LockKeeperState {
            locks: HashMap::new(),
            downstream_meta: DownstreamMetaCache::new(),
        }
    }
}

impl LockKeeper {
    pub fn new() -> Self {
        LockKeeper::default()
    }

    /// The central entry point: route `info` to its lock (creating it if necessary) and
    /// persist the resulting decision.
    #[instrument(skip(self, kv, info, tts), fields(task = %info.task, source = %info.source))]
    pub async fn try_sync(
        &self,
        kv: &dyn KvStore,
        info: &Info,
        tts: &[TargetTable],
    ) -> ShardDdlResult<TrySyncOutcome> {
        let id = compute_lock_id(&info.task, &info.down_schema, &info.down_table);
        let (lock, newly_created) = self.find_or_create_lock(&id, info, tts);

        if newly_created {
            put_init_schema_if_absent(
                kv,
                &InitSchema {
                    task: info.task.clone(),
                    down_schema: info.down_schema.clone(),
                    down_table: info.down_table.clone(),
                    schema: info.table_info_before.clone(),
                },
            )
            .await?;
        }

        let outcome = lock.try_sync(info)?;

        let mut operation = Operation::new(&info.task, &info.source, &info.up_schema, &info.up_table);
        operation.ddls = outcome.ddls.clone();
        operation.revision = outcome.revision;
        operation.cols = outcome
            .column_deltas
            .iter()
            .map(|d| match d {
                ColumnDelta::Added(c) | ColumnDelta::Removed(c) => c.clone(),
            })
            .collect();
        operation.conflict_stage = outcome.conflict_stage;

        persist_try_sync(kv, info, &operation).await?;
        for delta in &outcome.column_deltas {
            match delta {
                ColumnDelta::Added(column) => {
                    put_tracked_column(kv, &info.task, &info.down_schema, &info.down_table, column).await?;
                }
                ColumnDelta::Removed(column) => {
                    remove_tracked_column(kv, &info.task, &info.down_schema, &info.down_table, column).await?;
                }
            }
        }

        Ok(TrySyncOutcome {
            lock_id: id,
            ddls: outcome.ddls,
            column_deltas: outcome.column_deltas,
            conflict_stage: operation.conflict_stage,
        })
    }

    fn find_or_create_lock(&self, id: &str, info: &Info, tts: &[TargetTable]) -> (Arc<Lock>, bool) {
        let mut state = self.state.lock();
        if let Some(lock) = state.locks.get(id) {
            return (Arc::clone(lock), false);
        }

        let members = tts.iter().flat_map(|tt| {
            tt.up_tables.iter().flat_map(move |(up_schema, up_tables)| {
                up_tables
                    .iter()
                    .map(move |up_table| MemberKey::new(tt.source.clone(), up_schema.clone(), up_table.clone()))
            })
        });

        let lock = Arc::new(Lock::new(
            id.to_string(),
            info.task.clone(),
            info.down_schema.clone(),
            info.down_table.clone(),
            info.table_info_before.clone(),
            members,
        ));
        state.locks.insert(id.to_string(), Arc::clone(&lock));
        (lock, true)
    }

    /// Pointer-stable until `remove_lock`/`clear`.
    pub fn find_lock(&self, id: &str) -> Option<Arc<Lock>> {
        self.state.lock().locks.get(id).cloned()
    }

    /// Create (or return the existing) lock for a recorded `InitSchema`, with no members yet.
    /// Used only while rebuilding from a KV snapshot: seeding the lock with its authoritative
    /// original schema before any `Info` is replayed into it means every member joins against
    /// that schema rather than whichever Info happens to be replayed first.
    pub fn seed_lock(&self, init: &InitSchema) -> Arc<Lock> {
        let id = compute_lock_id(&init.task, &init.down_schema, &init.down_table);
        let mut state = self.state.lock();
        if let Some(lock) = state.locks.get(&id) {
            return Arc::clone(lock);
        }
        let lock = Arc::new(Lock::new(
            id.clone(),
            init.task.clone(),
            init.down_schema.clone(),
            init.down_table.clone(),
            init.schema.clone(),
            std::iter::empty(),
        ));
        state.locks.insert(id, Arc::clone(&lock));
        lock
    }

    pub fn find_lock_by_info(&self, info: &Info) -> Option<Arc<Lock>> {
        self.find_lock(&compute_lock_id(&info.task, &info.down_schema, &info.down_table))
    }

    pub fn find_locks_by_task(&self, task: &str) -> Vec<Arc<Lock>> {
        self.state
            .lock()
            .locks
            .values()
            .filter(|l| l.task == task)
            .cloned()
            .collect()
    }

    pub fn locks(&self) -> HashMap<String, Arc<Lock>> {
        self.state.lock().locks.clone()
    }

    pub fn remove_lock(&self, id: &str) -> bool {
        self.state.lock().locks.remove(id).is_some()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.locks.clear();
        state.downstream_meta.clear();
    }

    pub fn get_downstream_meta(
        &self,
        task: &str,
        resolver: &dyn DownstreamMetaResolver,
    ) -> ShardDdlResult<Arc<DownstreamMeta>> {
        self.state.lock().downstream_meta.get_or_resolve(task, resolver)
    }

    pub fn remove_downstream_meta(&self, task: &str) {
        self.state.lock().downstream_meta.remove(task);
    }
}

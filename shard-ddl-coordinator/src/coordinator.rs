//! [`Coordinator`]: the call site external subsystems use — submit an Info, observe
//! Operations, report table membership changes. Wires `TableKeeper` and `LockKeeper`
//! together over an injected `KvStore`.

use std::collections::HashMap;
use std::sync::Arc;

use shard_ddl_errors::ShardDdlResult;
use shard_ddl_kv::KvStore;
use shard_ddl_types::{ConflictStage, Info, Operation, SourceTables};
use tracing::instrument;

use crate::downstream_meta::{DownstreamMeta, DownstreamMetaResolver};
use crate::lock::{ColumnDelta, Lock};
use crate::lock_keeper::LockKeeper;
use crate::member::MemberKey;
use crate::table_keeper::TableKeeper;

/// The outcome of submitting an `Info`, handed back to the caller for it to relay to the
/// worker that will execute the DDLs downstream.
#[derive(Debug)]
pub struct SyncOutcome {
    pub lock_id: String,
    pub ddls: Vec<String>,
    pub column_deltas: Vec<ColumnDelta>,
}

/// Ties the membership index, the lock set, and the KV store together. One per process; the
/// KV store handle it's constructed with is treated as an injected dependency, not a
/// singleton, so tests can swap in a `MemoryKvStore`.
pub struct Coordinator<K: KvStore> {
    kv: Arc<K>,
    tables: TableKeeper,
    locks: LockKeeper,
    downstream_meta_resolver: Box<dyn DownstreamMetaResolver>,
}

impl<K: KvStore> Coordinator<K> {
    pub fn new(kv: Arc<K>, downstream_meta_resolver: Box<dyn DownstreamMetaResolver>) -> Self {
        Coordinator {
            kv,
            tables: TableKeeper::new(),
            locks: LockKeeper::new(),
            downstream_meta_resolver,
        }
    }

    /// Submit a source's DDL proposal. Looks up the current membership for the Info's target
    /// table, then routes it through `LockKeeper::try_sync`.
    #[instrument(skip(self, info), fields(task = %info.task, source = %info.source, up_table = %info.up_table))]
    pub async fn submit_info(&self, info: &Info) -> ShardDdlResult<SyncOutcome> {
        // Downstream metadata must exist for a task before its DDLs can be coordinated.
        self.locks
            .get_downstream_meta(&info.task, self.downstream_meta_resolver.as_ref())?;

        let tts = self
            .tables
            .find_tables(&info.task, &info.down_schema, &info.down_table)
            .unwrap_or_default();

        let outcome = self.locks.try_sync(self.kv.as_ref(), info, &tts).await?;
        Ok(SyncOutcome {
            lock_id: outcome.lock_id,
            ddls: outcome.ddls,
            column_deltas: outcome.column_deltas,
        })
    }

    /// A worker acknowledges it has applied the DDLs from its last `submit_info` call.
    pub fn mark_done(&self, lock_id: &str, source: &str, up_schema: &str, up_table: &str) -> ShardDdlResult<()> {
        let Some(lock) = self.locks.find_lock(lock_id) else {
            return Ok(());
        };
        lock.mark_done(&MemberKey::new(source, up_schema, up_table))
    }

    /// Report a membership change (a source began or stopped routing an upstream table into a
    /// downstream). Propagates added/dropped quads into any already-open lock for that
    /// target.
    pub async fn report_table_update(&self, st: SourceTables) -> ShardDdlResult<()> {
        let (added, dropped) = self.tables.update(st.clone());

        for (down_schema, down_table, up_schema, up_table) in added {
            let id = shard_ddl_types::lock_id(&st.task, &down_schema, &down_table);
            if let Some(lock) = self.locks.find_lock(&id) {
                let init_schema = shard_ddl_kv::get_init_schema(self.kv.as_ref(), &st.task, &down_schema, &down_table)
                    .await?
                    .map(|s| s.schema)
                    .unwrap_or_default();
                lock.add_table(MemberKey::new(st.source.clone(), up_schema, up_table), init_schema);
            }
        }
        for (down_schema, down_table, up_schema, up_table) in dropped {
            let id = shard_ddl_types::lock_id(&st.task, &down_schema, &down_table);
            if let Some(lock) = self.locks.find_lock(&id) {
                let had_outstanding_conflict = lock.remove_table(&MemberKey::new(
                    st.source.clone(),
                    up_schema.clone(),
                    up_table.clone(),
                ))?;
                if had_outstanding_conflict {
                    let mut operation = Operation::new(&st.task, &st.source, &up_schema, &up_table);
                    operation.conflict_stage = ConflictStage::Unlock;
                    shard_ddl_kv::put_operation(self.kv.as_ref(), &operation).await?;
                }
            }
        }
        Ok(())
    }

    /// Rebuild in-memory locks for `task` from persisted KV state: every recorded
    /// `InitSchema` seeds a lock with its authoritative original schema and tracked-column
    /// set, then every member's latest `Info` is replayed through `LockKeeper::try_sync` in
    /// ascending `Operation` revision order. Run by a newly elected master before it accepts
    /// new submissions for the task.
    pub async fn rebuild_from_snapshot(&self, task: &str) -> ShardDdlResult<()> {
        let snapshot = shard_ddl_kv::load_task_snapshot(self.kv.as_ref(), task).await?;

        for init in &snapshot.init_schemas {
            let lock = self.locks.seed_lock(init);
            let columns = shard_ddl_kv::load_tracked_columns(
                self.kv.as_ref(),
                task,
                &init.down_schema,
                &init.down_table,
            )
            .await?;
            lock.restore_tracked_columns(columns);
        }

        let mut latest_info_by_member: HashMap<(String, String, String), Info> = HashMap::new();
        for info in snapshot.infos {
            latest_info_by_member.insert(
                (info.source.clone(), info.up_schema.clone(), info.up_table.clone()),
                info,
            );
        }

        for operation in &snapshot.operations {
            let member_key = (
                operation.source.clone(),
                operation.up_schema.clone(),
                operation.up_table.clone(),
            );
            let Some(info) = latest_info_by_member.get(&member_key) else {
                continue;
            };
            let tts = self
                .tables
                .find_tables(&info.task, &info.down_schema, &info.down_table)
                .unwrap_or_default();
            self.locks.try_sync(self.kv.as_ref(), info, &tts).await?;
        }

        Ok(())
    }

    pub fn find_lock(&self, id: &str) -> Option<Arc<Lock>> {
        self.locks.find_lock(id)
    }

    pub fn get_downstream_meta(&self, task: &str) -> ShardDdlResult<Arc<DownstreamMeta>> {
        self.locks
            .get_downstream_meta(task, self.downstream_meta_resolver.as_ref())
    }

    pub fn remove_downstream_meta(&self, task: &str) {
        self.locks.remove_downstream_meta(task)
    }

    pub fn table_keeper(&self) -> &TableKeeper {
        &self.tables
    }

    pub fn lock_keeper(&self) -> &LockKeeper {
        &self.locks
    }
}

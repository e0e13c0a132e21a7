//! (De)serialization and read/write glue between the [`KvStore`] primitives and the
//! persisted record types (`Info`, `Operation`, `InitSchema`).

use shard_ddl_errors::{persistence_failure, ShardDdlResult};
use shard_ddl_types::{InitSchema, Info, Operation};

use crate::keys;
use crate::store::KvStore;

/// Everything persisted for one task, as read in a single prefix scan — used by a newly
/// elected master to rebuild its in-memory `Lock`s.
#[derive(Default, Debug, Clone)]
pub struct TaskSnapshot {
    pub infos: Vec<Info>,
    pub operations: Vec<Operation>,
    pub init_schemas: Vec<InitSchema>,
}

pub async fn put_info(kv: &dyn KvStore, info: &Info) -> ShardDdlResult<()> {
    let key = keys::info_key(&info.task, &info.source, &info.up_schema, &info.up_table);
    let value = serde_json::to_vec(info).map_err(persistence_failure)?;
    kv.put(&key, value).await
}

pub async fn put_operation(kv: &dyn KvStore, operation: &Operation) -> ShardDdlResult<()> {
    let key = keys::operation_key(
        &operation.task,
        &operation.source,
        &operation.up_schema,
        &operation.up_table,
    );
    let value = serde_json::to_vec(operation).map_err(persistence_failure)?;
    kv.put(&key, value).await
}

/// Persist an `Info` and its resulting `Operation` atomically: writes to Info and Operation
/// within one TrySync must never be observed half-done.
pub async fn persist_try_sync(
    kv: &dyn KvStore,
    info: &Info,
    operation: &Operation,
) -> ShardDdlResult<()> {
    let info_key = keys::info_key(&info.task, &info.source, &info.up_schema, &info.up_table);
    let operation_key = keys::operation_key(
        &operation.task,
        &operation.source,
        &operation.up_schema,
        &operation.up_table,
    );
    let puts = vec![
        (info_key, serde_json::to_vec(info).map_err(persistence_failure)?),
        (
            operation_key,
            serde_json::to_vec(operation).map_err(persistence_failure)?,
        ),
    ];
    kv.txn_put(puts).await
}

pub async fn get_init_schema(
    kv: &dyn KvStore,
    task: &str,
    down_schema: &str,
    down_table: &str,
) -> ShardDdlResult<Option<InitSchema>> {
    let key = keys::init_schema_key(task, down_schema, down_table);
    match kv.get(&key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(persistence_failure)?)),
        None => Ok(None),
    }
}

pub async fn put_init_schema_if_absent(
    kv: &dyn KvStore,
    init: &InitSchema,
) -> ShardDdlResult<()> {
    let key = keys::init_schema_key(&init.task, &init.down_schema, &init.down_table);
    if kv.get(&key).await?.is_some() {
        return Ok(());
    }
    let value = serde_json::to_vec(init).map_err(persistence_failure)?;
    kv.put(&key, value).await
}

/// Record that `column` is being withheld somewhere in this lock (a drop seen by one member
/// but not yet by all of them). The value carries no information beyond the key's existence.
pub async fn put_tracked_column(
    kv: &dyn KvStore,
    task: &str,
    down_schema: &str,
    down_table: &str,
    column: &str,
) -> ShardDdlResult<()> {
    let key = keys::column_key(task, down_schema, down_table, column);
    kv.put(&key, Vec::new()).await
}

/// Release a tracked column once every member has converged on dropping it.
pub async fn remove_tracked_column(
    kv: &dyn KvStore,
    task: &str,
    down_schema: &str,
    down_table: &str,
    column: &str,
) -> ShardDdlResult<()> {
    let key = keys::column_key(task, down_schema, down_table, column);
    kv.delete(&key).await
}

/// The tracked-column set for one lock, read back by a newly elected master so it doesn't
/// have to re-derive which drops are still outstanding from scratch.
pub async fn load_tracked_columns(
    kv: &dyn KvStore,
    task: &str,
    down_schema: &str,
    down_table: &str,
) -> ShardDdlResult<Vec<String>> {
    let prefix = keys::column_lock_prefix(task, down_schema, down_table);
    let mut columns = Vec::new();
    for (key, _) in kv.scan_prefix(&prefix).await? {
        if let Some(column) = key.strip_prefix(&prefix) {
            columns.push(column.to_string());
        }
    }
    Ok(columns)
}

/// Rebuild a task's full persisted state from one consistent prefix scan over Info,
/// Operation, and InitSchema. Callers then replay `TrySync` in `revision` order.
pub async fn load_task_snapshot(kv: &dyn KvStore, task: &str) -> ShardDdlResult<TaskSnapshot> {
    let mut snapshot = TaskSnapshot::default();

    for (_, bytes) in kv.scan_prefix(&keys::task_prefix(task)).await? {
        snapshot
            .infos
            .push(serde_json::from_slice(&bytes).map_err(persistence_failure)?);
    }
    for (_, bytes) in kv.scan_prefix(&keys::operation_task_prefix(task)).await? {
        snapshot
            .operations
            .push(serde_json::from_slice(&bytes).map_err(persistence_failure)?);
    }
    for (_, bytes) in kv.scan_prefix(&keys::init_schema_task_prefix(task)).await? {
        snapshot
            .init_schemas
            .push(serde_json::from_slice(&bytes).map_err(persistence_failure)?);
    }
    snapshot.operations.sort_by_key(|op| op.revision);

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use shard_ddl_types::TableSchema;

    use super::*;
    use crate::memory::MemoryKvStore;

    fn sample_info() -> Info {
        Info {
            task: "task1".to_string(),
            source: "mysql-replica-1".to_string(),
            up_schema: "foo_1".to_string(),
            up_table: "bar_1".to_string(),
            down_schema: "foo".to_string(),
            down_table: "bar".to_string(),
            ddls: vec!["ALTER TABLE bar ADD COLUMN c1 INT".to_string()],
            table_info_before: TableSchema::default(),
            table_infos_after: vec![TableSchema::default()],
            ignore_conflict: false,
        }
    }

    #[tokio::test]
    async fn persist_try_sync_is_atomic_and_roundtrips() {
        let kv = MemoryKvStore::new();
        let info = sample_info();
        let operation = Operation::new("task1", "mysql-replica-1", "foo_1", "bar_1");

        persist_try_sync(&kv, &info, &operation).await.unwrap();

        let snapshot = load_task_snapshot(&kv, "task1").await.unwrap();
        assert_eq!(snapshot.infos, vec![info]);
        assert_eq!(snapshot.operations, vec![operation]);
    }

    #[tokio::test]
    async fn init_schema_is_written_once() {
        let kv = MemoryKvStore::new();
        let init = InitSchema {
            task: "task1".to_string(),
            down_schema: "foo".to_string(),
            down_table: "bar".to_string(),
            schema: TableSchema::default(),
        };
        put_init_schema_if_absent(&kv, &init).await.unwrap();

        let mut other = init.clone();
        other.schema = TableSchema::new(vec![]);
        other.schema.indexes.push(shard_ddl_types::IndexDef {
            name: "pk".to_string(),
            columns: vec!["id".to_string()],
            unique: true,
        });
        put_init_schema_if_absent(&kv, &other).await.unwrap();

        let stored = get_init_schema(&kv, "task1", "foo", "bar")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, init);
    }

    #[tokio::test]
    async fn tracked_columns_round_trip_and_release() {
        let kv = MemoryKvStore::new();
        put_tracked_column(&kv, "task1", "foo", "bar", "c1").await.unwrap();
        put_tracked_column(&kv, "task1", "foo", "bar", "c2").await.unwrap();

        let mut columns = load_tracked_columns(&kv, "task1", "foo", "bar").await.unwrap();
        columns.sort();
        assert_eq!(columns, vec!["c1".to_string(), "c2".to_string()]);

        remove_tracked_column(&kv, "task1", "foo", "bar", "c1").await.unwrap();
        let columns = load_tracked_columns(&kv, "task1", "foo", "bar").await.unwrap();
        assert_eq!(columns, vec!["c2".to_string()]);
    }
}

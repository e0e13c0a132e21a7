use std::sync::Arc;

use shard_ddl_coordinator::{Coordinator, DownstreamMeta};
use shard_ddl_kv::MemoryKvStore;
use shard_ddl_types::{ColumnDef, ColumnType, Info, SourceTables, TableSchema};

fn resolver_for_all_tasks() -> Box<dyn shard_ddl_coordinator::DownstreamMetaResolver> {
    Box::new(|task: &str| {
        Some(DownstreamMeta {
            db_config: format!("dsn-{task}"),
            meta_schema_name: "meta".to_string(),
        })
    })
}

fn before_after() -> (TableSchema, TableSchema) {
    let before = TableSchema::new(vec![ColumnDef::new("id", ColumnType::Int, false)]);
    let after = TableSchema::new(vec![
        ColumnDef::new("id", ColumnType::Int, false),
        ColumnDef::new("c1", ColumnType::Int, true),
    ]);
    (before, after)
}

fn add_column_info(task: &str, source: &str, down_schema: &str, down_table: &str) -> Info {
    let (before, after) = before_after();
    Info {
        task: task.to_string(),
        source: source.to_string(),
        up_schema: "foo_1".to_string(),
        up_table: "bar_1".to_string(),
        down_schema: down_schema.to_string(),
        down_table: down_table.to_string(),
        ddls: vec!["ALTER TABLE bar ADD COLUMN c1 INT".to_string()],
        table_info_before: before,
        table_infos_after: vec![after],
        ignore_conflict: false,
    }
}

async fn seeded_coordinator(
    task: &str,
    down_schema: &str,
    down_table: &str,
    sources: &[&str],
) -> Coordinator<MemoryKvStore> {
    let kv = Arc::new(MemoryKvStore::new());
    let coordinator = Coordinator::new(kv, resolver_for_all_tasks());
    for source in sources {
        let mut st = SourceTables::new(task, *source);
        st.add("foo_1", "bar_1", down_schema, down_table);
        coordinator.report_table_update(st).await.unwrap();
    }
    coordinator
}

#[tokio::test]
async fn two_sources_adding_the_same_column_sync_scenario() {
    let coordinator = seeded_coordinator(
        "task1",
        "foo",
        "bar",
        &["mysql-replica-1", "mysql-replica-2"],
    )
    .await;

    let out1 = coordinator
        .submit_info(&add_column_info("task1", "mysql-replica-1", "foo", "bar"))
        .await
        .unwrap();
    assert_eq!(out1.lock_id, "task1-`foo`.`bar`");
    assert_eq!(out1.ddls, vec!["ALTER TABLE bar ADD COLUMN c1 INT"]);
    assert!(out1.column_deltas.is_empty());
    coordinator
        .mark_done(&out1.lock_id, "mysql-replica-1", "foo_1", "bar_1")
        .unwrap();

    let out2 = coordinator
        .submit_info(&add_column_info("task1", "mysql-replica-2", "foo", "bar"))
        .await
        .unwrap();
    assert_eq!(out2.lock_id, "task1-`foo`.`bar`");
    coordinator
        .mark_done(&out2.lock_id, "mysql-replica-2", "foo_1", "bar_1")
        .unwrap();

    let lock = coordinator.find_lock(&out2.lock_id).unwrap();
    assert_eq!(lock.is_synced(), (true, 0));
}

#[tokio::test]
async fn single_source_syncs_immediately() {
    let coordinator = seeded_coordinator("task2", "foo", "bar", &["mysql-replica-1"]).await;

    let out = coordinator
        .submit_info(&add_column_info("task2", "mysql-replica-1", "foo", "bar"))
        .await
        .unwrap();
    coordinator
        .mark_done(&out.lock_id, "mysql-replica-1", "foo_1", "bar_1")
        .unwrap();

    let lock = coordinator.find_lock(&out.lock_id).unwrap();
    assert_eq!(lock.is_synced(), (true, 0));
}

#[tokio::test]
async fn multiple_downstreams_produce_distinct_locks() {
    let kv = Arc::new(MemoryKvStore::new());
    let coordinator = Coordinator::new(kv, resolver_for_all_tasks());
    let task = "test-lock-keeper-multiple-target";

    let mut st = SourceTables::new(task, "mysql-replica-1");
    st.add("foo", "bar-1", "foo", "bar");
    st.add("foo", "bar-2", "foo", "bar");
    st.add("foo", "bar-1", "foo", "rab");
    st.add("foo", "bar-2", "foo", "rab");
    coordinator.report_table_update(st).await.unwrap();

    let info_bar_1 = Info {
        task: task.to_string(),
        source: "mysql-replica-1".to_string(),
        up_schema: "foo".to_string(),
        up_table: "bar-1".to_string(),
        down_schema: "foo".to_string(),
        down_table: "bar".to_string(),
        ddls: vec!["ALTER TABLE bar ADD COLUMN c1 INT".to_string()],
        table_info_before: before_after().0,
        table_infos_after: vec![before_after().1],
        ignore_conflict: false,
    };
    let mut info_bar_2 = info_bar_1.clone();
    info_bar_2.up_table = "bar-2".to_string();

    let mut info_rab_1 = info_bar_1.clone();
    info_rab_1.down_table = "rab".to_string();
    let mut info_rab_2 = info_bar_2.clone();
    info_rab_2.down_table = "rab".to_string();

    let out_bar_1 = coordinator.submit_info(&info_bar_1).await.unwrap();
    let out_rab_1 = coordinator.submit_info(&info_rab_1).await.unwrap();
    assert_ne!(out_bar_1.lock_id, out_rab_1.lock_id);

    coordinator
        .mark_done(&out_bar_1.lock_id, "mysql-replica-1", "foo", "bar-1")
        .unwrap();
    let bar_lock = coordinator.find_lock(&out_bar_1.lock_id).unwrap();
    assert_eq!(bar_lock.is_synced(), (false, 1));

    let out_bar_2 = coordinator.submit_info(&info_bar_2).await.unwrap();
    coordinator
        .mark_done(&out_bar_2.lock_id, "mysql-replica-1", "foo", "bar-2")
        .unwrap();
    assert_eq!(bar_lock.is_synced(), (true, 0));

    coordinator
        .mark_done(&out_rab_1.lock_id, "mysql-replica-1", "foo", "bar-1")
        .unwrap();
    let out_rab_2 = coordinator.submit_info(&info_rab_2).await.unwrap();
    coordinator
        .mark_done(&out_rab_2.lock_id, "mysql-replica-1", "foo", "bar-2")
        .unwrap();
    let rab_lock = coordinator.find_lock(&out_rab_1.lock_id).unwrap();
    assert_eq!(rab_lock.is_synced(), (true, 0));
}

#[tokio::test]
async fn downstream_meta_not_found_surfaces_configuration_error() {
    let kv = Arc::new(MemoryKvStore::new());
    let resolver: Box<dyn shard_ddl_coordinator::DownstreamMetaResolver> =
        Box::new(|task: &str| if task == "task1" { Some(DownstreamMeta {
            db_config: "dsn".to_string(),
            meta_schema_name: "meta".to_string(),
        }) } else { None });
    let coordinator = Coordinator::new(kv, resolver);

    let err = coordinator
        .submit_info(&add_column_info("task3", "mysql-replica-1", "foo", "bar"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        shard_ddl_errors::ShardDdlError::ConfigurationNotFound { .. }
    ));

    let first = coordinator.get_downstream_meta("task1").unwrap();
    let second = coordinator.get_downstream_meta("task1").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    coordinator.remove_downstream_meta("task1");
    let third = coordinator.get_downstream_meta("task1").unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

fn drop_column_info(task: &str, source: &str, down_schema: &str, down_table: &str) -> Info {
    let (without_c1, with_c1) = before_after();
    Info {
        task: task.to_string(),
        source: source.to_string(),
        up_schema: "foo_1".to_string(),
        up_table: "bar_1".to_string(),
        down_schema: down_schema.to_string(),
        down_table: down_table.to_string(),
        ddls: vec!["ALTER TABLE bar DROP COLUMN c1".to_string()],
        table_info_before: with_c1,
        table_infos_after: vec![without_c1],
        ignore_conflict: false,
    }
}

#[tokio::test]
async fn removing_a_member_mid_conflict_persists_unlock_stage() {
    let kv = Arc::new(MemoryKvStore::new());
    let coordinator = Coordinator::new(Arc::clone(&kv), resolver_for_all_tasks());
    let task = "task-unlock";

    for source in ["mysql-replica-1", "mysql-replica-2"] {
        let mut st = SourceTables::new(task, source);
        st.add("foo_1", "bar_1", "foo", "bar");
        coordinator.report_table_update(st).await.unwrap();
    }
    for source in ["mysql-replica-1", "mysql-replica-2"] {
        coordinator
            .submit_info(&add_column_info(task, source, "foo", "bar"))
            .await
            .unwrap();
    }

    // mysql-replica-1 drops c1; mysql-replica-2 hasn't, so the drop is withheld and c1 stays
    // tracked as an outstanding conflict.
    coordinator
        .submit_info(&drop_column_info(task, "mysql-replica-1", "foo", "bar"))
        .await
        .unwrap();

    // mysql-replica-1 is then unregistered entirely while that conflict is still open.
    let mut deleted = SourceTables::new(task, "mysql-replica-1");
    deleted.is_deleted = true;
    coordinator.report_table_update(deleted).await.unwrap();

    let snapshot = shard_ddl_kv::load_task_snapshot(kv.as_ref(), task).await.unwrap();
    let unlocked = snapshot
        .operations
        .iter()
        .find(|op| op.source == "mysql-replica-1")
        .unwrap();
    assert_eq!(unlocked.conflict_stage, shard_ddl_types::ConflictStage::Unlock);
}

#[tokio::test]
async fn rebuild_from_snapshot_restores_tracked_columns() {
    let kv = Arc::new(MemoryKvStore::new());
    let coordinator = Coordinator::new(Arc::clone(&kv), resolver_for_all_tasks());
    let task = "task-rebuild";

    for source in ["mysql-replica-1", "mysql-replica-2"] {
        let mut st = SourceTables::new(task, source);
        st.add("foo_1", "bar_1", "foo", "bar");
        coordinator.report_table_update(st).await.unwrap();
    }
    for source in ["mysql-replica-1", "mysql-replica-2"] {
        coordinator
            .submit_info(&add_column_info(task, source, "foo", "bar"))
            .await
            .unwrap();
    }

    let out = coordinator
        .submit_info(&drop_column_info(task, "mysql-replica-1", "foo", "bar"))
        .await
        .unwrap();
    assert!(out.ddls.is_empty());

    let rebuilt = Coordinator::new(Arc::clone(&kv), resolver_for_all_tasks());
    rebuilt.rebuild_from_snapshot(task).await.unwrap();

    let lock = rebuilt.find_lock(&out.lock_id).unwrap();
    assert_eq!(lock.tracked_columns(), vec!["c1".to_string()]);
}

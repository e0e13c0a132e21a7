//! Persistence layer: the abstract [`KvStore`] trait, its two backends, the
//! `shardddl/optimism/...` key namespace, and the record (de)serialization glue built on top.

mod etcd;
mod keys;
mod memory;
mod records;
mod store;

pub use etcd::EtcdKvStore;
pub use keys::{
    column_key, column_lock_prefix, info_key, init_schema_key, init_schema_task_prefix,
    operation_key, operation_task_prefix, task_prefix, NAMESPACE,
};
pub use memory::MemoryKvStore;
pub use records::{
    get_init_schema, load_task_snapshot, load_tracked_columns, persist_try_sync, put_info,
    put_init_schema_if_absent, put_operation, put_tracked_column, remove_tracked_column,
    TaskSnapshot,
};
pub use store::{KvStore, WatchEvent};

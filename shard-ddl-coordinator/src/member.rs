//! A lock member's identity and per-member synchronization state.

use shard_ddl_types::TableSchema;

/// Identifies one upstream table participating in a lock: (source, upSchema, upTable).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberKey {
    pub source: String,
    pub up_schema: String,
    pub up_table: String,
}

impl MemberKey {
    pub fn new(source: impl Into<String>, up_schema: impl Into<String>, up_table: impl Into<String>) -> Self {
        MemberKey {
            source: source.into(),
            up_schema: up_schema.into(),
            up_table: up_table.into(),
        }
    }
}

/// One source's view of the lock's table: its current schema and whether it has
/// acknowledged the DDLs needed to reach the joined schema.
#[derive(Clone, Debug)]
pub struct Member {
    pub current: TableSchema,
    pub done: bool,
}

impl Member {
    pub fn new(current: TableSchema) -> Self {
        Member {
            current,
            done: false,
        }
    }

    /// A member is synced once its schema matches `joined` and it has acknowledged.
    pub fn is_synced(&self, joined: &TableSchema) -> bool {
        self.done && &self.current == joined
    }
}

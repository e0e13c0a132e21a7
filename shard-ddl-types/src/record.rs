//! The persisted records: [`Info`] (a source's proposal), [`Operation`] (the coordinator's
//! decision), and [`InitSchema`] (the authoritative first-seen schema for a lock).

use serde::{Deserialize, Serialize};

use crate::schema::TableSchema;

/// A source's proposal: "I observed these DDLs upstream, transforming my view of this
/// table's schema from `table_info_before` through the chain in `table_infos_after`".
/// Immutable once submitted; exactly one `Info` should be in flight per upstream table.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Info {
    pub task: String,
    pub source: String,
    pub up_schema: String,
    pub up_table: String,
    pub down_schema: String,
    pub down_table: String,
    /// Raw DDL text, one per entry in `table_infos_after`.
    pub ddls: Vec<String>,
    pub table_info_before: TableSchema,
    /// The post-state after each DDL in `ddls`, same length and order as `ddls`.
    pub table_infos_after: Vec<TableSchema>,
    /// When `true`, an add-add conflict is downgraded to a warning and the first observed
    /// definition is kept, instead of failing the `TrySync`.
    pub ignore_conflict: bool,
}

impl Info {
    /// The final post-state this `Info` proposes, i.e. the last entry of
    /// `table_infos_after`, or `table_info_before` if `ddls` is empty.
    pub fn final_schema(&self) -> &TableSchema {
        self.table_infos_after
            .last()
            .unwrap_or(&self.table_info_before)
    }
}

/// Where a lock's handling of a particular column conflict currently stands.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStage {
    /// No conflict has ever been observed for this operation.
    None,
    /// A conflict was just detected by this `TrySync`.
    Detected,
    /// A previously-detected conflict has been resolved (peers converged, or
    /// `ignore_conflict` was used).
    Resolved,
    /// The DDL for this source was withheld because of a conflict elsewhere in the lock.
    Skipped,
    /// The lock is being torn down while a conflict was outstanding.
    Unlock,
}

impl Default for ConflictStage {
    fn default() -> Self {
        ConflictStage::None
    }
}

/// The coordinator's decision for one source's upstream table: the DDLs it should execute
/// downstream, plus the bookkeeping needed to track acknowledgement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub task: String,
    pub source: String,
    pub up_schema: String,
    pub up_table: String,
    pub ddls: Vec<String>,
    pub conflict_stage: ConflictStage,
    /// Columns this operation added to or removed from the lock's tracked-column set
    /// (see [`crate::schema::TableSchema`] and the lock's multi-phase drop handling).
    pub cols: Vec<String>,
    pub done: bool,
    /// Monotonically non-decreasing within a given (task, source, up_schema, up_table).
    pub revision: u64,
}

impl Operation {
    pub fn new(task: &str, source: &str, up_schema: &str, up_table: &str) -> Self {
        Operation {
            task: task.to_string(),
            source: source.to_string(),
            up_schema: up_schema.to_string(),
            up_table: up_table.to_string(),
            ddls: Vec::new(),
            conflict_stage: ConflictStage::None,
            cols: Vec::new(),
            done: false,
            revision: 0,
        }
    }
}

/// The authoritative initial schema recorded for a (task, down_schema, down_table) the first
/// time its lock is created, so a reborn master can rebuild joined state deterministically
/// without having to replay every historical `Info`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitSchema {
    pub task: String,
    pub down_schema: String,
    pub down_table: String,
    pub schema: TableSchema,
}

/// Compute a lock's id from its (task, down_schema, down_table) triple, per the bit-exact
/// grammar: `<task>-` then backtick-quoted schema `.` backtick-quoted table, with embedded
/// backticks doubled.
pub fn lock_id(task: &str, down_schema: &str, down_table: &str) -> String {
    format!(
        "{task}-`{}`.`{}`",
        escape_backtick(down_schema),
        escape_backtick(down_table)
    )
}

fn escape_backtick(ident: &str) -> String {
    ident.replace('`', "``")
}

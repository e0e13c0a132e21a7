//! Membership records: which upstream tables, under which (task, source), currently feed a
//! given downstream (schema, table). Owned exclusively by `TableKeeper` in
//! `shard-ddl-coordinator`; these types themselves are plain, structurally-comparable value
//! objects, never aliased.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// A fully-qualified upstream-to-downstream routing fact: "(up_schema, up_table) on `source`
/// under `task` feeds (down_schema, down_table)". Used as the unit of add/drop delta
/// reporting from [`SourceTables`] updates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableQuad {
    pub down_schema: String,
    pub down_table: String,
    pub up_schema: String,
    pub up_table: String,
}

/// The set of upstream tables a single (task, source) currently routes into one downstream
/// (schema, table).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetTable {
    pub task: String,
    pub source: String,
    pub down_schema: String,
    pub down_table: String,
    /// up_schema -> set of up_table
    pub up_tables: BTreeMap<String, BTreeSet<String>>,
}

/// All tables a single (task, source) routes anywhere, across every downstream it feeds.
/// Owned by `TableKeeper`; mutated only through `Update`/`AddTable`/`RemoveTable`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceTables {
    pub task: String,
    pub source: String,
    pub is_deleted: bool,
    /// down_schema -> down_table -> up_schema -> set of up_table
    pub tables: BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>,
}

impl SourceTables {
    pub fn new(task: impl Into<String>, source: impl Into<String>) -> Self {
        SourceTables {
            task: task.into(),
            source: source.into(),
            is_deleted: false,
            tables: BTreeMap::new(),
        }
    }

    /// Insert one upstream routing fact. Returns `true` if it was newly added.
    pub fn add(
        &mut self,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        self.tables
            .entry(down_schema.to_string())
            .or_default()
            .entry(down_table.to_string())
            .or_default()
            .entry(up_schema.to_string())
            .or_default()
            .insert(up_table.to_string())
    }

    /// Remove one upstream routing fact. Returns `true` if it was present and removed.
    pub fn remove(
        &mut self,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        let Some(by_table) = self.tables.get_mut(down_schema) else {
            return false;
        };
        let Some(by_up_schema) = by_table.get_mut(down_table) else {
            return false;
        };
        let Some(up_tables) = by_up_schema.get_mut(up_schema) else {
            return false;
        };
        let removed = up_tables.remove(up_table);
        if up_tables.is_empty() {
            by_up_schema.remove(up_schema);
        }
        if by_up_schema.is_empty() {
            by_table.remove(down_table);
        }
        if by_table.is_empty() {
            self.tables.remove(down_schema);
        }
        removed
    }

    pub fn exists(
        &self,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        self.tables
            .get(down_schema)
            .and_then(|t| t.get(down_table))
            .and_then(|s| s.get(up_schema))
            .is_some_and(|tables| tables.contains(up_table))
    }

    /// All routing facts this record currently holds, as [`TableQuad`]s.
    pub fn quads(&self) -> Vec<TableQuad> {
        let mut out = Vec::new();
        for (down_schema, by_table) in &self.tables {
            for (down_table, by_up_schema) in by_table {
                for (up_schema, up_tables) in by_up_schema {
                    for up_table in up_tables {
                        out.push(TableQuad {
                            down_schema: down_schema.clone(),
                            down_table: down_table.clone(),
                            up_schema: up_schema.clone(),
                            up_table: up_table.clone(),
                        });
                    }
                }
            }
        }
        out
    }

    /// The [`TargetTable`] this record contributes to `(down_schema, down_table)`, if any.
    pub fn target_table(&self, down_schema: &str, down_table: &str) -> Option<TargetTable> {
        let up_tables = self.tables.get(down_schema)?.get(down_table)?;
        if up_tables.is_empty() {
            return None;
        }
        Some(TargetTable {
            task: self.task.clone(),
            source: self.source.clone(),
            down_schema: down_schema.to_string(),
            down_table: down_table.to_string(),
            up_tables: up_tables.clone(),
        })
    }
}

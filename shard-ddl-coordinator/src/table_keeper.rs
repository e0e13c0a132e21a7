//! [`TableKeeper`]: the process-wide index of live upstream-table membership, keyed by
//! (task, source). Answers "which upstreams currently feed this downstream?" and reports
//! add/drop deltas on every update.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use shard_ddl_types::{SourceTables, TargetTable};

/// (downSchema, downTable, upSchema, upTable).
type Quad = (String, String, String, String);

/// The live set of `SourceTables`, one per (task, source), plus the query surface built on
/// top of it: a single concurrent map as the source of truth, with small pure helper
/// functions reading snapshots off it.
#[derive(Default)]
pub struct TableKeeper {
    sources: DashMap<(String, String), SourceTables>,
}

impl TableKeeper {
    pub fn new() -> Self {
        TableKeeper::default()
    }

    /// Replace all internal state with `snapshot`. `None` (or an empty map) clears the
    /// keeper. Used when a newly elected master rebuilds from a KV snapshot.
    pub fn init(&self, snapshot: Option<Vec<SourceTables>>) {
        self.sources.clear();
        for st in snapshot.into_iter().flatten() {
            self.sources.insert((st.task.clone(), st.source.clone()), st);
        }
    }

    /// Merge `st` into the index, returning the quads that newly started or stopped being
    /// routed as a result.
    pub fn update(&self, st: SourceTables) -> (Vec<Quad>, Vec<Quad>) {
        let key = (st.task.clone(), st.source.clone());

        if st.is_deleted {
            return match self.sources.remove(&key) {
                Some((_, existing)) => (Vec::new(), quads_of(&existing)),
                None => (Vec::new(), Vec::new()),
            };
        }

        let previous_quads: BTreeSet<Quad> = self
            .sources
            .get(&key)
            .map(|existing| quads_of(&existing).into_iter().collect())
            .unwrap_or_default();
        let new_quads: BTreeSet<Quad> = quads_of(&st).into_iter().collect();

        let added: Vec<Quad> = new_quads.difference(&previous_quads).cloned().collect();
        let dropped: Vec<Quad> = previous_quads.difference(&new_quads).cloned().collect();

        self.sources.insert(key, st);
        (added, dropped)
    }

    /// Route one more upstream table into (downSchema, downTable). Returns `true` iff the
    /// row didn't already exist. A wholly unknown task returns `false`: tasks are never
    /// implicitly created here, only by `update`/`init`.
    pub fn add_table(
        &self,
        task: &str,
        source: &str,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        let any_entry_for_task = self.sources.iter().any(|e| e.key().0 == task);
        if !any_entry_for_task {
            return false;
        }

        let key = (task.to_string(), source.to_string());
        let mut entry = self
            .sources
            .entry(key)
            .or_insert_with(|| SourceTables::new(task, source));
        entry.add(up_schema, up_table, down_schema, down_table)
    }

    /// Symmetric to `add_table`: returns `true` iff a row was removed.
    pub fn remove_table(
        &self,
        task: &str,
        source: &str,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        let key = (task.to_string(), source.to_string());
        match self.sources.get_mut(&(key.0.clone(), key.1.clone())) {
            Some(mut entry) => entry.remove(up_schema, up_table, down_schema, down_table),
            None => false,
        }
    }

    /// Every source's contribution to (downSchema, downTable) under `task`. `None` means the
    /// task is entirely unknown; `Some(vec![])` means the task exists but nothing currently
    /// routes into this target. Callers that don't need to distinguish the two can simply
    /// flatten with `.unwrap_or_default()`.
    pub fn find_tables(&self, task: &str, down_schema: &str, down_table: &str) -> Option<Vec<TargetTable>> {
        if !self.sources.iter().any(|e| e.key().0 == task) {
            return None;
        }
        Some(
            self.sources
                .iter()
                .filter(|e| e.key().0 == task)
                .filter_map(|e| e.target_table(down_schema, down_table))
                .collect(),
        )
    }

    pub fn find_tables_by_task_and_source(&self, task: &str, source: &str) -> Option<SourceTables> {
        self.sources
            .get(&(task.to_string(), source.to_string()))
            .map(|e| e.clone())
    }

    pub fn remove_table_by_task(&self, task: &str) {
        self.sources.retain(|k, _| k.0 != task);
    }

    pub fn remove_table_by_task_and_sources(&self, task: &str, sources: &[String]) {
        self.sources
            .retain(|k, _| !(k.0 == task && sources.iter().any(|s| s == &k.1)));
    }

    pub fn source_table_exists(
        &self,
        task: &str,
        source: &str,
        up_schema: &str,
        up_table: &str,
        down_schema: &str,
        down_table: &str,
    ) -> bool {
        self.sources
            .get(&(task.to_string(), source.to_string()))
            .map(|e| e.exists(up_schema, up_table, down_schema, down_table))
            .unwrap_or(false)
    }

    /// Pure variant of `find_tables` over an externally supplied snapshot, used while
    /// constructing a new `Lock` so it knows the exact membership it must wait for.
    pub fn target_tables_for_task(
        task: &str,
        down_schema: &str,
        down_table: &str,
        snapshot: &BTreeMap<(String, String), SourceTables>,
    ) -> Option<Vec<TargetTable>> {
        if !snapshot.keys().any(|(t, _)| t == task) {
            return None;
        }
        Some(
            snapshot
                .iter()
                .filter(|((t, _), _)| t == task)
                .filter_map(|(_, st)| st.target_table(down_schema, down_table))
                .collect(),
        )
    }
}

fn quads_of(st: &SourceTables) -> Vec<Quad> {
    st.quads()
        .into_iter()
        .map(|q| (q.down_schema, q.down_table, q.up_schema, q.up_table))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(task: &str, source: &str, down_schema: &str, down_table: &str, up_schema: &str, up_tables: &[&str]) -> SourceTables {
        let mut st = SourceTables::new(task, source);
        for t in up_tables {
            st.add(up_schema, t, down_schema, down_table);
        }
        st
    }

    #[test]
    fn init_with_none_is_a_no_op() {
        let keeper = TableKeeper::new();
        keeper.init(None);
        assert!(keeper.find_tables("task2", "foo", "bar").is_none());
    }

    #[test]
    fn update_is_idempotent() {
        let keeper = TableKeeper::new();
        let st = tables("task1", "mysql-replica-1", "foo", "bar", "foo_1", &["bar_1", "bar_2"]);

        let (added, dropped) = keeper.update(st.clone());
        assert_eq!(added.len(), 2);
        assert!(dropped.is_empty());

        let (added, dropped) = keeper.update(st);
        assert!(added.is_empty());
        assert!(dropped.is_empty());
    }

    #[test]
    fn delete_returns_all_quads_as_dropped() {
        let keeper = TableKeeper::new();
        let st = tables("task1", "mysql-replica-1", "foo", "bar", "foo_1", &["bar_1", "bar_2"]);
        keeper.update(st);

        let mut deleted = SourceTables::new("task1", "mysql-replica-1");
        deleted.is_deleted = true;
        let (added, dropped) = keeper.update(deleted.clone());
        assert!(added.is_empty());
        assert_eq!(dropped.len(), 2);
        assert!(keeper.find_tables("task1", "foo", "bar").is_none());

        let (added, dropped) = keeper.update(deleted);
        assert!(added.is_empty() && dropped.is_empty());
    }

    #[test]
    fn add_table_requires_a_known_task() {
        let keeper = TableKeeper::new();
        assert!(!keeper.add_table("task1", "mysql-replica-1", "foo_1", "bar_1", "foo", "bar"));

        keeper.update(SourceTables::new("task1", "mysql-replica-1"));
        assert!(keeper.add_table("task1", "mysql-replica-2", "foo_1", "bar_1", "foo", "bar"));
    }
}

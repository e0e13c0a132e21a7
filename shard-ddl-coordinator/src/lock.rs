//! [`Lock`]: the per-target-table state machine that joins schemas across participating
//! upstreams and decides what each source must execute to converge on the joined schema.

use indexmap::IndexMap;
use parking_lot::Mutex;
use shard_ddl_errors::{column_type_conflict, internal, schema_conflict, unsupported_ddl, ShardDdlResult};
use shard_ddl_types::{AtomicOp, ColumnDef, ConflictStage, Info, TableSchema};
use tracing::warn;

use crate::member::{Member, MemberKey};

/// A signed change to the lock's tracked-column set, returned alongside the emitted DDLs so
/// the caller can update its own bookkeeping without re-deriving it from `joined`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnDelta {
    /// A column started being tracked (a drop was observed while a peer still has it).
    Added(String),
    /// A column stopped being tracked (every member has now dropped it).
    Removed(String),
}

/// What `Lock::try_sync` returns to the caller: the DDLs *this* source should apply
/// downstream, the resulting change to the tracked-column set, the Operation revision this
/// call produced (unchanged on an idempotent retry), and how this call left the lock's
/// conflict state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrySyncOutcome {
    pub ddls: Vec<String>,
    pub column_deltas: Vec<ColumnDelta>,
    pub revision: u64,
    pub conflict_stage: ConflictStage,
}

struct LockState {
    joined: TableSchema,
    members: IndexMap<MemberKey, Member>,
    /// Columns dropped by at least one member but still present in at least one other;
    /// insertion order matters so the conflicted-column set is reported deterministically.
    columns: Vec<String>,
    next_revision: u64,
}

/// A per-(task, downSchema, downTable) lock. Owns its own mutex; callers must never hold a
/// [`crate::lock_keeper::LockKeeper`]'s map mutex while calling into a `Lock` (keeper then
/// lock, released in reverse — never the other way around).
pub struct Lock {
    pub id: String,
    pub task: String,
    pub down_schema: String,
    pub down_table: String,
    state: Mutex<LockState>,
}

impl Lock {
    /// Create a lock whose initial joined schema is `init_schema` (the first Info's
    /// `tableInfoBefore`, or a replayed `InitSchema` record) and whose membership is taken
    /// from the full target-table set known at creation time.
    pub fn new(
        id: String,
        task: String,
        down_schema: String,
        down_table: String,
        init_schema: TableSchema,
        members: impl IntoIterator<Item = MemberKey>,
    ) -> Self {
        let mut member_map = IndexMap::new();
        for key in members {
            member_map.insert(key, Member::new(init_schema.clone()));
        }
        Lock {
            id,
            task,
            down_schema,
            down_table,
            state: Mutex::new(LockState {
                joined: init_schema,
                members: member_map,
                columns: Vec::new(),
                next_revision: 0,
            }),
        }
    }

    /// Whether every member's `current` equals `joined` and has acknowledged, plus the count
    /// of members that have not yet reached that state.
    pub fn is_synced(&self) -> (bool, usize) {
        let state = self.state.lock();
        let remain = state
            .members
            .values()
            .filter(|m| !m.is_synced(&state.joined))
            .count();
        (remain == 0, remain)
    }

    /// Synced *and* every tracked column has been unanimously dropped — the point at which
    /// `LockKeeper` may remove this lock.
    pub fn is_removable(&self) -> bool {
        let state = self.state.lock();
        state.columns.is_empty()
            && state
                .members
                .values()
                .all(|m| m.is_synced(&state.joined))
    }

    pub fn joined_schema(&self) -> TableSchema {
        self.state.lock().joined.clone()
    }

    pub fn tracked_columns(&self) -> Vec<String> {
        self.state.lock().columns.clone()
    }

    /// Process one source's proposal. Returns the DDLs that source should apply downstream
    /// and the resulting tracked-column delta.
    pub fn try_sync(&self, info: &Info) -> ShardDdlResult<TrySyncOutcome> {
        let key = MemberKey::new(&info.source, &info.up_schema, &info.up_table);
        let mut state = self.state.lock();

        let starting_current = state
            .members
            .get(&key)
            .map(|m| m.current.clone())
            .unwrap_or_else(|| info.table_info_before.clone());

        let mut current = starting_current;
        let mut emitted = Vec::new();
        let mut deltas = Vec::new();
        let mut conflict_stage = ConflictStage::None;

        for (ddl, after) in info.ddls.iter().zip(info.table_infos_after.iter()) {
            let op = current
                .classify_transition(after, ddl)
                .map_err(|detail| unsupported_ddl(&self.id, detail))?;

            match op {
                AtomicOp::AddColumn(col) => {
                    let stage = self.apply_add_column(&mut state, info, &col, ddl, &mut emitted)?;
                    if stage == ConflictStage::Resolved {
                        conflict_stage = ConflictStage::Resolved;
                    }
                }
                AtomicOp::DropColumn(name) => {
                    let stage = self.apply_drop_column(&mut state, &key, &name, ddl, &mut emitted, &mut deltas);
                    if stage == ConflictStage::Skipped && conflict_stage == ConflictStage::None {
                        conflict_stage = ConflictStage::Skipped;
                    }
                }
                AtomicOp::ModifyColumnType { column, to, .. } => {
                    self.apply_modify_column(&mut state, &column, &to, ddl, &mut emitted)?;
                }
                AtomicOp::RenameColumn { from, to } => {
                    self.apply_rename_column(&mut state, &from, &to, ddl, &mut emitted)?;
                }
                AtomicOp::AddIndex(idx) => {
                    if !state.joined.indexes.iter().any(|i| i.name == idx.name) {
                        state.joined.indexes.push(idx);
                    }
                    emitted.push(ddl.clone());
                }
                AtomicOp::DropIndex(name) => {
                    state.joined.indexes.retain(|i| i.name != name);
                    emitted.push(ddl.clone());
                }
                AtomicOp::Truncate => emitted.push(ddl.clone()),
                AtomicOp::NoOp => {}
            }

            current = after.clone();
        }

        let revision = state.next_revision;
        state.next_revision += 1;

        let member = state
            .members
            .entry(key)
            .or_insert_with(|| Member::new(current.clone()));
        member.current = current;
        member.done = false;

        Ok(TrySyncOutcome {
            ddls: emitted,
            column_deltas: deltas,
            revision,
            conflict_stage,
        })
    }

    /// Applies one proposed `ADD COLUMN`, returning the conflict stage it produced: `None` for
    /// an uncontested add (including a redundant one this source still needs to replay) and
    /// `Resolved` when a real add-add disagreement was caught and downgraded in this same call
    /// because the caller set `ignore_conflict`. A disagreement without that flag returns
    /// `Err` and never reaches a stage at all.
    fn apply_add_column(
        &self,
        state: &mut LockState,
        info: &Info,
        col: &ColumnDef,
        ddl: &str,
        emitted: &mut Vec<String>,
    ) -> ShardDdlResult<ConflictStage> {
        match state.joined.column(&col.name) {
            Some(existing) if existing == col => {
                // Already joined with an identical definition (the common concurrent-add
                // case): this source's own worker still needs to replay the DDL to bring
                // its own upstream-tracking state to the joined schema.
                emitted.push(ddl.to_string());
                Ok(ConflictStage::None)
            }
            Some(existing) => {
                if info.ignore_conflict {
                    warn!(
                        lock_id = %self.id,
                        column = %col.name,
                        kept = %existing.ty,
                        proposed = %col.ty,
                        "add-add column conflict ignored, keeping first-observed definition"
                    );
                    // The conflicting definition is rejected; nothing is emitted for it.
                    Ok(ConflictStage::Resolved)
                } else {
                    Err(schema_conflict(
                        &self.id,
                        &col.name,
                        format!("existing `{}` vs proposed `{}`", existing.ty, col.ty),
                    ))
                }
            }
            None => {
                state.joined.columns.push(col.clone());
                emitted.push(ddl.to_string());
                Ok(ConflictStage::None)
            }
        }
    }

    /// Applies one proposed `DROP COLUMN`, returning `Skipped` when the drop was withheld
    /// because a peer still has the column (a conflict between members' views of the table)
    /// and `None` when every member already agrees and the DDL is emitted outright.
    fn apply_drop_column(
        &self,
        state: &mut LockState,
        dropper: &MemberKey,
        column: &str,
        ddl: &str,
        emitted: &mut Vec<String>,
        deltas: &mut Vec<ColumnDelta>,
    ) -> ConflictStage {
        let others_still_have_it = state
            .members
            .iter()
            .any(|(k, m)| k != dropper && m.current.column(column).is_some());

        if others_still_have_it {
            if !state.columns.iter().any(|c| c == column) {
                state.columns.push(column.to_string());
                deltas.push(ColumnDelta::Added(column.to_string()));
            }
            // Withheld: the physical downstream DROP waits for every member to agree, so
            // nothing is emitted to this source yet.
            ConflictStage::Skipped
        } else {
            state.joined.columns.retain(|c| c.name != column);
            if let Some(pos) = state.columns.iter().position(|c| c == column) {
                state.columns.remove(pos);
                deltas.push(ColumnDelta::Removed(column.to_string()));
            }
            emitted.push(ddl.to_string());
            ConflictStage::None
        }
    }

    fn apply_modify_column(
        &self,
        state: &mut LockState,
        column: &str,
        to: &shard_ddl_types::ColumnType,
        ddl: &str,
        emitted: &mut Vec<String>,
    ) -> ShardDdlResult<()> {
        let existing = state
            .joined
            .column(column)
            .ok_or_else(|| internal(format!("modify on untracked column `{column}`")))?;
        let widened = existing
            .ty
            .widen(to)
            .ok_or_else(|| column_type_conflict(&self.id, column, existing.ty.to_string(), to.to_string()))?;
        if let Some(col) = state.joined.columns.iter_mut().find(|c| c.name == column) {
            col.ty = widened;
        }
        emitted.push(ddl.to_string());
        Ok(())
    }

    fn apply_rename_column(
        &self,
        state: &mut LockState,
        from: &str,
        to: &str,
        ddl: &str,
        emitted: &mut Vec<String>,
    ) -> ShardDdlResult<()> {
        let col = state
            .joined
            .columns
            .iter_mut()
            .find(|c| c.name == from)
            .ok_or_else(|| internal(format!("rename of untracked column `{from}`")))?;
        col.name = to.to_string();
        emitted.push(ddl.to_string());
        Ok(())
    }

    /// `source`'s upstream table acknowledges it has applied the DDLs from its last
    /// `try_sync` call. Also re-checks the tracked-column set: a column already dropped by
    /// every remaining member (e.g. after a `remove_table`) is released here too.
    pub fn mark_done(&self, key: &MemberKey) -> ShardDdlResult<()> {
        let mut state = self.state.lock();
        state
            .members
            .get_mut(key)
            .ok_or_else(|| internal(format!("mark_done for unknown member in lock `{}`", self.id)))?
            .done = true;
        prune_tracked_columns(&mut state);
        Ok(())
    }

    /// A new upstream table joins the lock mid-flight. Its starting point is the lock's
    /// recorded initial schema, never the live `joined` — the downstream may not know about
    /// columns this new upstream never had. Returns the catch-up DDLs needed to bring it to
    /// `joined`.
    pub fn add_table(&self, key: MemberKey, recorded_init_schema: TableSchema) -> Vec<String> {
        let mut state = self.state.lock();
        let catch_up: Vec<String> = state
            .joined
            .columns
            .iter()
            .filter(|c| recorded_init_schema.column(&c.name).is_none())
            .map(|c| format!("ALTER TABLE `{}` ADD COLUMN `{}` {}", self.down_table, c.name, c.ty))
            .collect();
        state
            .members
            .insert(key, Member::new(recorded_init_schema));
        catch_up
    }

    /// An upstream table leaves the lock mid-flight (its source/task unregistered). `joined`
    /// is recomputed as the LUB of the remaining members; any tracked column dropped by every
    /// survivor is released. Returns whether the lock still had an outstanding (unresolved)
    /// column conflict at the moment of removal — the caller uses that to record an `Unlock`
    /// stage, since tearing a member out from under a live conflict is itself notable.
    pub fn remove_table(&self, key: &MemberKey) -> ShardDdlResult<bool> {
        let mut state = self.state.lock();
        let had_outstanding_conflict = !state.columns.is_empty();
        state.members.shift_remove(key);

        let mut rebuilt = TableSchema::default();
        for member in state.members.values() {
            rebuilt = rebuilt
                .join(&member.current)
                .map_err(|c| internal(format!("lock `{}` lost consistency on column `{}`", self.id, c.column)))?;
        }
        state.joined = rebuilt;
        prune_tracked_columns(&mut state);
        Ok(had_outstanding_conflict)
    }

    pub fn member_keys(&self) -> Vec<MemberKey> {
        self.state.lock().members.keys().cloned().collect()
    }

    /// Seeds the tracked-column set directly, bypassing the normal drop-withholding path.
    /// Used only while a newly elected master rebuilds a lock from its persisted records,
    /// before any `try_sync` call has touched it.
    pub fn restore_tracked_columns(&self, columns: Vec<String>) {
        self.state.lock().columns = columns;
    }
}

fn prune_tracked_columns(state: &mut LockState) {
    state
        .columns
        .retain(|name| state.members.values().any(|m| m.current.column(name).is_some()));
}

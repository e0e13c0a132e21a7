//! [`TableSchema`]: the opaque-but-comparable, composable table description the whole
//! coordinator reasons about, plus the atomic-operation alphabet used to validate that a
//! proposed before→after transition is one the lock can safely reconcile.

use serde::{Deserialize, Serialize};

use crate::column::{ColumnDef, ColumnType, IndexDef};

/// One of the atomic schema-altering operations the lock's conflict-resolution algorithm
/// knows how to reason about. A single upstream DDL must reduce to exactly one of these when
/// diffed against its pre-state; anything else is
/// [`ShardDdlError::UnsupportedDdl`](shard_ddl_errors::ShardDdlError::UnsupportedDdl).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtomicOp {
    AddColumn(ColumnDef),
    DropColumn(String),
    ModifyColumnType {
        column: String,
        from: ColumnType,
        to: ColumnType,
    },
    RenameColumn {
        from: String,
        to: String,
    },
    AddIndex(IndexDef),
    DropIndex(String),
    Truncate,
    NoOp,
}

/// A table description: an ordered column list plus indexes. Ordered because the order
/// columns were declared in matters for deterministic DDL emission; insertion order is the
/// order used throughout.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<IndexDef>,
}

/// Two peers proposed incompatible definitions for the same column while joining schemas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaJoinConflict {
    pub column: String,
    pub left: ColumnDef,
    pub right: ColumnDef,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        TableSchema {
            columns,
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Compute the least-upper-bound of `self` and `other`: every column of both inputs, with
    /// widened types where they disagree but are compatible, or a [`SchemaJoinConflict`] when
    /// they are not.
    ///
    /// Column order in the result is `self`'s columns first (in their existing order),
    /// followed by any columns `other` has that `self` doesn't, in `other`'s order. This
    /// is what makes the emitted DDL order for concurrent adds deterministic given the
    /// arrival order of Infos (see the design doc's resolution of the ordering Open Question).
    pub fn join(&self, other: &TableSchema) -> Result<TableSchema, SchemaJoinConflict> {
        let mut columns = Vec::with_capacity(self.columns.len() + other.columns.len());
        for left in &self.columns {
            match other.column(&left.name) {
                None => columns.push(left.clone()),
                Some(right) => {
                    if left == right {
                        columns.push(left.clone());
                    } else if left.nullable == right.nullable {
                        match left.ty.widen(&right.ty) {
                            Some(widened) => columns.push(ColumnDef {
                                name: left.name.clone(),
                                ty: widened,
                                nullable: left.nullable,
                            }),
                            None => {
                                return Err(SchemaJoinConflict {
                                    column: left.name.clone(),
                                    left: left.clone(),
                                    right: right.clone(),
                                })
                            }
                        }
                    } else {
                        return Err(SchemaJoinConflict {
                            column: left.name.clone(),
                            left: left.clone(),
                            right: right.clone(),
                        });
                    }
                }
            }
        }
        for right in &other.columns {
            if self.column(&right.name).is_none() {
                columns.push(right.clone());
            }
        }

        let mut indexes: Vec<IndexDef> = self.indexes.clone();
        for idx in &other.indexes {
            if indexes.iter().all(|i| i.name != idx.name) {
                indexes.push(idx.clone());
            }
        }

        Ok(TableSchema { columns, indexes })
    }

    /// Classify the transition from `self` (before) to `after`, given the raw DDL text the
    /// source observed upstream (used only to distinguish a no-op schema diff caused by
    /// `TRUNCATE` from a true no-op — everything else is classified from the schema diff
    /// alone, since `TableSchema` is otherwise treated as opaque).
    pub fn classify_transition(&self, after: &TableSchema, raw_ddl: &str) -> Result<AtomicOp, String> {
        if self == after {
            return if raw_ddl.to_ascii_uppercase().contains("TRUNCATE") {
                Ok(AtomicOp::Truncate)
            } else {
                Ok(AtomicOp::NoOp)
            };
        }

        if self.indexes != after.indexes && self.columns == after.columns {
            return Self::classify_index_change(&self.indexes, &after.indexes);
        }

        if self.indexes == after.indexes {
            return Self::classify_column_change(&self.columns, &after.columns);
        }

        Err("DDL changes both columns and indexes at once".to_string())
    }

    fn classify_index_change(before: &[IndexDef], after: &[IndexDef]) -> Result<AtomicOp, String> {
        let added: Vec<&IndexDef> = after.iter().filter(|i| !before.contains(i)).collect();
        let removed: Vec<&IndexDef> = before.iter().filter(|i| !after.contains(i)).collect();
        match (added.as_slice(), removed.as_slice()) {
            ([added], []) => Ok(AtomicOp::AddIndex((*added).clone())),
            ([], [removed]) => Ok(AtomicOp::DropIndex(removed.name.clone())),
            _ => Err("index change is not a single add or drop".to_string()),
        }
    }

    fn classify_column_change(
        before: &[ColumnDef],
        after: &[ColumnDef],
    ) -> Result<AtomicOp, String> {
        if after.len() == before.len() + 1 {
            let added: Vec<&ColumnDef> = after
                .iter()
                .filter(|c| !before.iter().any(|b| b.name == c.name))
                .collect();
            if let [added] = added.as_slice() {
                return Ok(AtomicOp::AddColumn((*added).clone()));
            }
        }
        if before.len() == after.len() + 1 {
            let removed: Vec<&ColumnDef> = before
                .iter()
                .filter(|c| !after.iter().any(|a| a.name == c.name))
                .collect();
            if let [removed] = removed.as_slice() {
                return Ok(AtomicOp::DropColumn(removed.name.clone()));
            }
        }
        if before.len() == after.len() {
            let changed: Vec<(&ColumnDef, &ColumnDef)> = before
                .iter()
                .zip(after.iter())
                .filter(|(b, a)| b != a)
                .collect();
            if let [(b, a)] = changed.as_slice() {
                if b.name == a.name {
                    return Ok(AtomicOp::ModifyColumnType {
                        column: b.name.clone(),
                        from: b.ty.clone(),
                        to: a.ty.clone(),
                    });
                }
                // Same position, same type, different name, and nothing else in the table
                // changed: the only DDL that produces this shape is a column rename.
                if b.ty == a.ty && b.nullable == a.nullable {
                    return Ok(AtomicOp::RenameColumn {
                        from: b.name.clone(),
                        to: a.name.clone(),
                    });
                }
            }
        }
        Err("multi-column DDLs are not supported".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: ColumnType) -> ColumnDef {
        ColumnDef::new(name, ty, true)
    }

    #[test]
    fn join_is_commutative_when_no_conflict() {
        let a = TableSchema::new(vec![col("id", ColumnType::Int)]);
        let b = TableSchema::new(vec![
            col("id", ColumnType::Int),
            col("c1", ColumnType::Int),
        ]);
        assert_eq!(a.join(&b).unwrap(), b.join(&a).unwrap());
    }

    #[test]
    fn join_widens_compatible_int_types() {
        let a = TableSchema::new(vec![col("n", ColumnType::SmallInt)]);
        let b = TableSchema::new(vec![col("n", ColumnType::BigInt)]);
        let joined = a.join(&b).unwrap();
        assert_eq!(joined.column("n").unwrap().ty, ColumnType::BigInt);
    }

    #[test]
    fn join_reports_conflict_on_incompatible_types() {
        let a = TableSchema::new(vec![col("n", ColumnType::Int)]);
        let b = TableSchema::new(vec![col("n", ColumnType::Text)]);
        let err = a.join(&b).unwrap_err();
        assert_eq!(err.column, "n");
    }

    #[test]
    fn classify_add_column() {
        let before = TableSchema::new(vec![col("id", ColumnType::Int)]);
        let after = TableSchema::new(vec![
            col("id", ColumnType::Int),
            col("c1", ColumnType::Int),
        ]);
        let op = before
            .classify_transition(&after, "ALTER TABLE t ADD COLUMN c1 INT")
            .unwrap();
        assert_eq!(op, AtomicOp::AddColumn(col("c1", ColumnType::Int)));
    }

    #[test]
    fn classify_drop_column() {
        let before = TableSchema::new(vec![
            col("id", ColumnType::Int),
            col("c1", ColumnType::Int),
        ]);
        let after = TableSchema::new(vec![col("id", ColumnType::Int)]);
        let op = before
            .classify_transition(&after, "ALTER TABLE t DROP COLUMN c1")
            .unwrap();
        assert_eq!(op, AtomicOp::DropColumn("c1".to_string()));
    }

    #[test]
    fn classify_truncate_is_a_schema_noop() {
        let s = TableSchema::new(vec![col("id", ColumnType::Int)]);
        let op = s.classify_transition(&s, "TRUNCATE TABLE t").unwrap();
        assert_eq!(op, AtomicOp::Truncate);
    }

    #[test]
    fn classify_rejects_multi_column_change() {
        let before = TableSchema::new(vec![col("id", ColumnType::Int)]);
        let after = TableSchema::new(vec![
            col("id", ColumnType::BigInt),
            col("c1", ColumnType::Int),
        ]);
        assert!(before.classify_transition(&after, "...").is_err());
    }

    #[test]
    fn table_schema_roundtrips_through_json() {
        let schema = TableSchema::new(vec![
            col("id", ColumnType::Int),
            ColumnDef::new("name", ColumnType::Varchar { length: 64 }, false),
        ]);
        let encoded = serde_json::to_string(&schema).unwrap();
        let decoded: TableSchema = serde_json::from_str(&encoded).unwrap();
        assert_eq!(schema, decoded);
    }
}

#[cfg(test)]
mod join_properties {
    use proptest::prelude::*;

    use super::*;

    fn int_rank_strategy() -> impl Strategy<Value = ColumnType> {
        prop_oneof![
            Just(ColumnType::TinyInt),
            Just(ColumnType::SmallInt),
            Just(ColumnType::Int),
            Just(ColumnType::BigInt),
        ]
    }

    fn single_column_schema() -> impl Strategy<Value = TableSchema> {
        int_rank_strategy().prop_map(|ty| TableSchema::new(vec![ColumnDef::new("n", ty, true)]))
    }

    proptest! {
        // Widenable integer columns never conflict, so join is commutative for any pair
        // drawn from the same rank family.
        #[test]
        fn join_of_widenable_int_columns_is_commutative(a in single_column_schema(), b in single_column_schema()) {
            let ab = a.join(&b).unwrap();
            let ba = b.join(&a).unwrap();
            prop_assert_eq!(ab, ba);
        }

        // Joining a schema with itself is a no-op.
        #[test]
        fn join_with_self_is_idempotent(a in single_column_schema()) {
            let joined = a.join(&a).unwrap();
            prop_assert_eq!(joined, a);
        }
    }
}

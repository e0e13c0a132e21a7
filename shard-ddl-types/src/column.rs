//! Column-level type representation.
//!
//! This is a deliberately small closed type lattice — just enough to decide whether two
//! column definitions proposed by different upstream sources are identical, and if not,
//! whether one can be widened to the other. It plays the same role a dataflow engine's
//! closed column-type enum plays upstream of it, but without the SQL-dialect-specific
//! baggage (array types, postgres enum metadata, collations) that a full dataflow engine
//! needs and this coordinator does not.

use serde::{Deserialize, Serialize};

/// The type of a single column, as observed in an upstream `CREATE`/`ALTER TABLE`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    UnsignedBigInt,
    Decimal { precision: u8, scale: u8 },
    Float,
    Double,
    Varchar { length: u32 },
    Char { length: u32 },
    Text,
    Blob,
    Bool,
    Date,
    Time { fsp: u8 },
    DateTime { fsp: u8 },
    Timestamp { fsp: u8 },
    Json,
    Enum { variants: Vec<String> },
    /// Anything this coordinator doesn't need to widen, carried opaquely by name (e.g.
    /// engine-specific types). Two `Other` columns are only equal if their names match
    /// exactly; they never widen into one another.
    Other(String),
}

impl ColumnType {
    /// The integer family ranking used to decide whether one integer type can be widened to
    /// another without loss (smaller rank widens to larger).
    fn int_rank(&self) -> Option<u8> {
        match self {
            ColumnType::TinyInt => Some(0),
            ColumnType::SmallInt => Some(1),
            ColumnType::Int => Some(2),
            ColumnType::BigInt => Some(3),
            ColumnType::UnsignedBigInt => Some(4),
            _ => None,
        }
    }

    /// The widest type that both `self` and `other` can be represented as without loss, or
    /// `None` if the two types are not compatible for widening (the caller then reports a
    /// [`ShardDdlError::ColumnTypeConflict`](shard_ddl_errors::ShardDdlError::ColumnTypeConflict)).
    pub fn widen(&self, other: &ColumnType) -> Option<ColumnType> {
        if self == other {
            return Some(self.clone());
        }
        if let (Some(a), Some(b)) = (self.int_rank(), other.int_rank()) {
            return Some(if a >= b { self.clone() } else { other.clone() });
        }
        match (self, other) {
            (ColumnType::Varchar { length: a }, ColumnType::Varchar { length: b }) => {
                Some(ColumnType::Varchar {
                    length: *a.max(b),
                })
            }
            (ColumnType::Char { length: a }, ColumnType::Char { length: b }) => {
                Some(ColumnType::Char {
                    length: *a.max(b),
                })
            }
            (
                ColumnType::Decimal {
                    precision: pa,
                    scale: sa,
                },
                ColumnType::Decimal {
                    precision: pb,
                    scale: sb,
                },
            ) => Some(ColumnType::Decimal {
                precision: *pa.max(pb),
                scale: *sa.max(sb),
            }),
            _ => None,
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::TinyInt => write!(f, "TINYINT"),
            ColumnType::SmallInt => write!(f, "SMALLINT"),
            ColumnType::Int => write!(f, "INT"),
            ColumnType::BigInt => write!(f, "BIGINT"),
            ColumnType::UnsignedBigInt => write!(f, "BIGINT UNSIGNED"),
            ColumnType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            ColumnType::Float => write!(f, "FLOAT"),
            ColumnType::Double => write!(f, "DOUBLE"),
            ColumnType::Varchar { length } => write!(f, "VARCHAR({length})"),
            ColumnType::Char { length } => write!(f, "CHAR({length})"),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::Blob => write!(f, "BLOB"),
            ColumnType::Bool => write!(f, "BOOL"),
            ColumnType::Date => write!(f, "DATE"),
            ColumnType::Time { fsp } => write!(f, "TIME({fsp})"),
            ColumnType::DateTime { fsp } => write!(f, "DATETIME({fsp})"),
            ColumnType::Timestamp { fsp } => write!(f, "TIMESTAMP({fsp})"),
            ColumnType::Json => write!(f, "JSON"),
            ColumnType::Enum { variants } => write!(f, "ENUM({})", variants.join(",")),
            ColumnType::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A single column definition, as it appears in a [`TableSchema`](crate::TableSchema).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType, nullable: bool) -> Self {
        ColumnDef {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// A table index, tracked only well enough to express add-index/drop-index as atomic
/// operations; this crate does not reason about index compatibility the way it does for
/// columns.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

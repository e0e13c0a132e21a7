//! The error type shared by every crate in the shard-DDL coordinator: one closed,
//! `thiserror`-derived enum with a variant per error kind, plus small constructor helpers so
//! call sites read the same way macro-based `internal!`/`unsupported!` helpers would.

use thiserror::Error;

/// The result type used throughout the shard-DDL coordinator.
pub type ShardDdlResult<T> = std::result::Result<T, ShardDdlError>;

/// Everything that can go wrong while coordinating an optimistic shard DDL lock.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardDdlError {
    /// Downstream metadata (DB config / meta-schema name) is missing for a task.
    #[error("no downstream metadata registered for task `{task}`")]
    ConfigurationNotFound {
        /// The task that has no registered downstream metadata.
        task: String,
    },

    /// Two sources proposed incompatible definitions for the same column.
    #[error(
        "lock `{lock_id}`: column `{column}` conflicts: {detail}"
    )]
    SchemaConflict {
        /// The lock under which the conflict was detected.
        lock_id: String,
        /// The column in conflict.
        column: String,
        /// Human-readable detail (the two conflicting definitions).
        detail: String,
    },

    /// Same column, same lock, but the two sources want mutually-incompatible result types.
    #[error(
        "lock `{lock_id}`: column `{column}` type conflict: {old_type} -> {new_type}"
    )]
    ColumnTypeConflict {
        /// The lock under which the conflict was detected.
        lock_id: String,
        /// The column in conflict.
        column: String,
        /// The type currently tracked for the column.
        old_type: String,
        /// The incompatible type a peer proposed.
        new_type: String,
    },

    /// A DDL (or sequence of DDLs) could not be expressed as one atomic operation.
    #[error("unsupported DDL for lock `{lock_id}`: {detail}")]
    UnsupportedDdl {
        /// The lock the DDL was submitted against.
        lock_id: String,
        /// Human-readable detail.
        detail: String,
    },

    /// A transient failure talking to the KV store. Retriable by the caller.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    /// An invariant the design assumes can never be violated was violated anyway. Fatal.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Build a [`ShardDdlError::SchemaConflict`], reporting context the caller can log or surface.
pub fn schema_conflict(
    lock_id: impl Into<String>,
    column: impl Into<String>,
    detail: impl Into<String>,
) -> ShardDdlError {
    ShardDdlError::SchemaConflict {
        lock_id: lock_id.into(),
        column: column.into(),
        detail: detail.into(),
    }
}

/// Build a [`ShardDdlError::ColumnTypeConflict`].
pub fn column_type_conflict(
    lock_id: impl Into<String>,
    column: impl Into<String>,
    old_type: impl Into<String>,
    new_type: impl Into<String>,
) -> ShardDdlError {
    ShardDdlError::ColumnTypeConflict {
        lock_id: lock_id.into(),
        column: column.into(),
        old_type: old_type.into(),
        new_type: new_type.into(),
    }
}

/// Build a [`ShardDdlError::UnsupportedDdl`].
pub fn unsupported_ddl(lock_id: impl Into<String>, detail: impl Into<String>) -> ShardDdlError {
    ShardDdlError::UnsupportedDdl {
        lock_id: lock_id.into(),
        detail: detail.into(),
    }
}

/// Build a [`ShardDdlError::ConfigurationNotFound`].
pub fn configuration_not_found(task: impl Into<String>) -> ShardDdlError {
    ShardDdlError::ConfigurationNotFound { task: task.into() }
}

/// Build a [`ShardDdlError::PersistenceFailure`].
pub fn persistence_failure(detail: impl std::fmt::Display) -> ShardDdlError {
    ShardDdlError::PersistenceFailure(detail.to_string())
}

/// Build a [`ShardDdlError::InternalInvariant`], logging it as an error since this class of
/// failure is defined as process-fatal by the design.
///
/// Note: this helper only logs; terminating the process is left to the caller (typically the
/// CLI binary's top-level error handler), matching how library crates never call
/// `std::process::exit` themselves.
pub fn internal(detail: impl Into<String>) -> ShardDdlError {
    let detail = detail.into();
    tracing::error!(%detail, "internal invariant violated");
    ShardDdlError::InternalInvariant(detail)
}

use clap::Parser;

/// Command-line/environment configuration for the shard-DDL coordinator process.
#[derive(Parser, Debug)]
#[command(name = "shard-ddl-cli", version)]
pub struct Options {
    /// Replication task this coordinator instance serves. Locks are scoped to a single task,
    /// so one coordinator process handles exactly one.
    #[arg(long, env = "SHARD_DDL_TASK")]
    pub task: String,

    /// Comma-separated etcd endpoints, e.g. `http://127.0.0.1:2379,http://127.0.0.1:2380`.
    #[arg(long, env = "SHARD_DDL_ETCD_ENDPOINTS", value_delimiter = ',')]
    pub etcd_endpoints: Vec<String>,

    /// Downstream DB connection string for the task this process serves.
    #[arg(long, env = "SHARD_DDL_DOWNSTREAM_DSN")]
    pub downstream_dsn: String,

    /// Schema name used to record coordinator-internal bookkeeping in the downstream DB.
    #[arg(long, env = "SHARD_DDL_META_SCHEMA", default_value = "dm_meta")]
    pub meta_schema_name: String,

    /// Log level filter, in `tracing-subscriber`'s `EnvFilter` syntax.
    #[arg(long, env = "SHARD_DDL_LOG", default_value = "info")]
    pub log_level: String,
}

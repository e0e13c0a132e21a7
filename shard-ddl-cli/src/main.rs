mod options;

use std::sync::Arc;

use clap::Parser;
use options::Options;
use shard_ddl_coordinator::{Coordinator, DownstreamMeta};
use shard_ddl_errors::ShardDdlResult;
use shard_ddl_kv::EtcdKvStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ShardDdlResult<()> {
    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&options.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(task = %options.task, endpoints = ?options.etcd_endpoints, "starting shard-ddl coordinator");

    let kv = Arc::new(EtcdKvStore::connect(&options.etcd_endpoints).await?);

    let downstream_dsn = options.downstream_dsn.clone();
    let meta_schema_name = options.meta_schema_name.clone();
    let task = options.task.clone();
    let resolver = move |candidate: &str| -> Option<DownstreamMeta> {
        if candidate == task {
            Some(DownstreamMeta {
                db_config: downstream_dsn.clone(),
                meta_schema_name: meta_schema_name.clone(),
            })
        } else {
            None
        }
    };

    let _coordinator = Coordinator::new(kv, Box::new(resolver));

    // Binlog ingestion and the worker RPC surface that feeds `Coordinator::submit_info` and
    // consumes its Operations are external collaborators; wiring them in is out of scope
    // here.
    tracing::info!("coordinator ready");
    std::future::pending::<()>().await;
    Ok(())
}

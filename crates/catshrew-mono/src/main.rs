use anyhow::Result;
use catshrew_mono::{Args, BitcoinRpcAdapter};
use catshrew_protocol::CatProcessor;
use catshrew_rocksdb::RocksDBAdapter;
use catshrew_runtime::IndexStore;
use catshrew_sync::{CatSync, MempoolTracker};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_timestamp_secs().init();

    let args = Args::parse();
    info!("Starting catshrew indexer");
    info!("System has {} CPU cores available", num_cpus::get());

    let node = Arc::new(BitcoinRpcAdapter::new(
        &args.daemon_rpc_url,
        args.auth.as_deref(),
    )?);
    let db = RocksDBAdapter::open_optimized(args.db_path.to_string_lossy().to_string())?;
    let store = IndexStore::new(db);

    let params = args.protocol_params()?;
    let processor = Arc::new(CatProcessor::new(node.clone(), store.clone(), params));
    let sync = Arc::new(CatSync::new(
        node.clone(),
        store,
        processor,
        args.sync_config(),
    ));

    sync.init().await?;
    if let Some(height) = args.reindex_block_height {
        info!("reindexing from height {}", height);
        sync.reindex_from(height).await?;
    }

    let mempool = if args.no_mempool {
        info!("mempool tracking disabled");
        None
    } else {
        let tracker = Arc::new(MempoolTracker::new(node.clone(), args.mempool_config()));
        Some(tracker.start_background_tasks())
    };

    let result = tokio::select! {
        result = sync.run() => result,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, stopping block sync");
            sync.stop();
            Ok(())
        }
    };

    if let Some(handle) = mempool {
        handle.abort();
    }
    if let Err(e) = &result {
        error!("block sync stopped: {}", e);
    }
    Ok(result?)
}

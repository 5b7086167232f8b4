//! # Block sync loop
//!
//! [`CatSync`] drives the indexer forward one height at a time:
//!
//! ```text
//! IDLE -> FETCH_CANDIDATE -> (no block: SLEEP -> IDLE)
//!                         -> REORG_CHECK -> PROCESS_BLOCK -> PERSIST_BLOCK -> IDLE
//! ```
//!
//! Blocks are never processed in parallel: a later transaction may spend an output created
//! by an earlier transaction of the same block, so transaction order is part of correctness.
//!
//! The candidate height is the last persisted height plus one, or the configured genesis
//! height on an empty store. Before processing, [`resolve_reorg`] walks headers backwards
//! until it meets a locally stored block and retracts everything above the fork point.
//!
//! ## Failure handling
//! - Upstream failures ([`SyncError::is_transient`]) are logged, partially written rows of
//!   the current block are retracted, and the loop sleeps before retrying.
//! - A block without transactions and every non-transient error end [`CatSync::run`] with `Err`.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::{
    BlockHeader, BlockProcessor, ChainSource, StorageAdapter, SyncConfig, SyncError, SyncResult,
    REINDEX_CHUNK_SIZE,
};

/// Sequential block synchronizer
pub struct CatSync<N, S, P>
where
    N: ChainSource,
    S: StorageAdapter,
    P: BlockProcessor,
{
    node: Arc<N>,
    storage: Arc<RwLock<S>>,
    processor: Arc<P>,
    pub config: SyncConfig,
    is_running: Arc<AtomicBool>,
    pub current_height: Arc<AtomicU32>,
    blocks_processed: Arc<AtomicU32>,
}

impl<N, S, P> CatSync<N, S, P>
where
    N: ChainSource + 'static,
    S: StorageAdapter + 'static,
    P: BlockProcessor + 'static,
{
    pub fn new(node: Arc<N>, storage: S, processor: Arc<P>, config: SyncConfig) -> Self {
        Self {
            node,
            storage: Arc::new(RwLock::new(storage)),
            processor,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            current_height: Arc::new(AtomicU32::new(0)),
            blocks_processed: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn storage(&self) -> &Arc<RwLock<S>> {
        &self.storage
    }

    pub fn node(&self) -> &Arc<N> {
        &self.node
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    pub fn blocks_processed(&self) -> u32 {
        self.blocks_processed.load(Ordering::SeqCst)
    }

    /// Check upstream and storage, then retract rows left behind by an interrupted block.
    pub async fn init(&self) -> SyncResult<()> {
        let info = self.node.get_blockchain_info().await?;
        info!(
            "rpc connection established, chain {} at {} blocks / {} headers",
            info.chain, info.blocks, info.headers
        );

        if !self.storage.read().await.is_available().await {
            return Err(SyncError::Storage("database not ready".to_string()));
        }
        info!("database connection established");

        let next_height = self.next_height().await?;
        self.storage.write().await.delete_from_height(next_height).await?;
        self.current_height.store(next_height, Ordering::SeqCst);
        info!("sync initialized, next height {}", next_height);
        Ok(())
    }

    /// Height the next iteration will try to index
    pub async fn next_height(&self) -> SyncResult<u32> {
        let last = self.storage.read().await.get_last_block().await?;
        Ok(match last {
            Some(block) => block.height + 1,
            None => self.config.effective_genesis(),
        })
    }

    /// Delete derived state from the last block down to `height`, in chunks.
    pub async fn reindex_from(&self, height: u32) -> SyncResult<()> {
        let target = height.max(self.config.effective_genesis());
        let last = self.storage.read().await.get_last_block().await?;
        let mut current = last.map(|b| b.height).unwrap_or(0);

        loop {
            current = current.saturating_sub(REINDEX_CHUNK_SIZE).max(target);
            info!(
                "deleting {} blocks from {} to {}",
                REINDEX_CHUNK_SIZE,
                current,
                current + REINDEX_CHUNK_SIZE
            );
            self.storage.write().await.delete_from_height(current).await?;
            if current <= target {
                break;
            }
        }

        self.processor.reset_caches().await;
        self.current_height.store(target, Ordering::SeqCst);
        Ok(())
    }

    /// One loop iteration. Returns the processed height, or `None` when the node has no
    /// block at the candidate height yet.
    pub async fn process_next(&self) -> SyncResult<Option<u32>> {
        let next_height = self.next_height().await?;
        let next_hash = match self.node.get_block_hash(next_height).await? {
            Some(hash) => hash,
            None => {
                debug!("no block at height {} yet", next_height);
                return Ok(None);
            }
        };

        let header = resolve_reorg(
            &next_hash,
            self.config.effective_genesis(),
            &self.node,
            &self.storage,
            &self.processor,
        )
        .await?;

        let height = header.height;
        self.process_block(header).await?;
        Ok(Some(height))
    }

    /// Fetch, process and persist one block.
    pub async fn process_block(&self, header: BlockHeader) -> SyncResult<()> {
        let block = self.node.get_raw_block(&header.hash).await?;
        if block.txdata.is_empty() {
            return Err(SyncError::InvalidBlock {
                height: header.height,
                message: "no txs in block".to_string(),
            });
        }

        let start = Instant::now();
        let stats = match self.processor.process_block(&header, &block).await {
            Ok(stats) => stats,
            Err(e) => {
                if e.is_transient() {
                    warn!(
                        "block #{} interrupted by upstream failure, retracting partial rows: {}",
                        header.height, e
                    );
                    self.storage
                        .write()
                        .await
                        .delete_from_height(header.height)
                        .await?;
                    self.processor.reset_caches().await;
                }
                return Err(e);
            }
        };

        self.storage.write().await.save_block(&header).await?;
        self.blocks_processed.fetch_add(1, Ordering::SeqCst);
        self.current_height.store(header.height + 1, Ordering::SeqCst);

        let percentage = match self.node.get_blockchain_info().await {
            Ok(info) if info.headers > 0 => format!(
                "{:>10}",
                format!("[{:.2}%] ", header.height as f64 / info.headers as f64 * 100.0)
            ),
            _ => String::new(),
        };
        let elapsed_ms = start.elapsed().as_millis().max(1);
        let tps = block.txdata.len() as u128 * 1000 / elapsed_ms;
        info!(
            "{}processed block #{} {}, {:>8} {:>8} {:>8}, {:>8} cat txs {:>6} ms",
            percentage,
            header.height,
            header.hash,
            format!("{} txs", stats.tx_count),
            format!("{} ms", elapsed_ms),
            format!("{} tps", tps),
            stats.cat_tx_count,
            stats.cat_processing.as_millis()
        );

        self.maybe_archive(header.height).await;
        Ok(())
    }

    async fn maybe_archive(&self, height: u32) {
        let interval = self.config.archive_interval_blocks;
        if interval == 0 || height % interval != 0 || height < self.config.archive_depth {
            return;
        }
        let before = height - self.config.archive_depth;
        match self
            .storage
            .write()
            .await
            .archive_spent_outputs(before, self.config.archive_batch)
            .await
        {
            Ok(0) => {}
            Ok(n) => info!("archived {} tx outputs", n),
            Err(e) => warn!("archive tx outputs error, {}", e),
        }
    }

    /// Run until stopped, the exit height is reached, or a fatal error occurs.
    pub async fn run(&self) -> SyncResult<()> {
        self.is_running.store(true, Ordering::SeqCst);
        info!("daemon process blocks initialized");

        while self.is_running.load(Ordering::SeqCst) {
            if let Some(exit_at) = self.config.exit_at {
                if self.next_height().await? > exit_at {
                    info!("reached exit height {}", exit_at);
                    break;
                }
            }

            match self.process_next().await {
                Ok(Some(_)) => {}
                Ok(None) => sleep(self.config.block_interval).await,
                Err(e) if e.is_transient() => {
                    error!("daemon process blocks error, {}", e);
                    sleep(self.config.block_interval).await;
                }
                Err(e) => {
                    error!("fatal error, stopping block sync: {}", e);
                    self.is_running.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }
}

/// Walk back from `next_hash` to the first header whose parent is stored locally (or the
/// genesis height) and retract everything at or above it when that header is not `next_hash`.
///
/// Returns the header to process next.
pub async fn resolve_reorg<N, S, P>(
    next_hash: &str,
    genesis_height: u32,
    node: &Arc<N>,
    storage: &Arc<RwLock<S>>,
    processor: &Arc<P>,
) -> SyncResult<BlockHeader>
where
    N: ChainSource + 'static,
    S: StorageAdapter + 'static,
    P: BlockProcessor + 'static,
{
    let mut hash = next_hash.to_string();
    let header = loop {
        let header = node.get_block_header(&hash).await?;
        if header.height <= genesis_height {
            break header;
        }
        let previous = match &header.previousblockhash {
            Some(previous) => previous.clone(),
            None => break header,
        };
        if storage.read().await.block_exists(&previous).await? {
            break header;
        }
        hash = previous;
    };

    if header.hash != next_hash {
        info!(
            "found reorg, common ancestor #{} {}",
            header.height.saturating_sub(1),
            header.previousblockhash.as_deref().unwrap_or("-")
        );
        storage.write().await.delete_from_height(header.height).await?;
        processor.reset_caches().await;
    }

    Ok(header)
}

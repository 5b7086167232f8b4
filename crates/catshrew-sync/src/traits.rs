//! # Adapter traits
//!
//! The indexer is assembled from three pluggable pieces, the same split the sync engine
//! has always used:
//!
//! - [`ChainSource`]: the upstream node (bitcoind JSON-RPC in production, [`crate::mock::MockChain`] in tests).
//! - [`StorageAdapter`]: block bookkeeping and height-ranged retraction of derived rows.
//! - [`BlockProcessor`]: protocol interpretation of a fetched block.
//!
//! All traits use `async_trait` and report failures through [`SyncResult`].

use async_trait::async_trait;
use bitcoin::{Block, Transaction, Txid};

use crate::{BlockHeader, BlockStats, ChainInfo, SyncResult};

/// Upstream chain data.
///
/// Implementations must be safe to share between the sync loop and the mempool tracker.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Hash of the active-chain block at `height`, or `None` when the node has no block there yet.
    ///
    /// Only "no such height" maps to `None`; transport failures are errors.
    async fn get_block_hash(&self, height: u32) -> SyncResult<Option<String>>;

    async fn get_block_header(&self, hash: &str) -> SyncResult<BlockHeader>;

    async fn get_raw_block(&self, hash: &str) -> SyncResult<Block>;

    async fn get_raw_transaction(&self, txid: &Txid) -> SyncResult<Transaction>;

    async fn get_raw_mempool(&self) -> SyncResult<Vec<Txid>>;

    async fn get_blockchain_info(&self) -> SyncResult<ChainInfo>;
}

/// Block-level view of the derived store.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Highest persisted block.
    async fn get_last_block(&self) -> SyncResult<Option<BlockHeader>>;

    async fn block_exists(&self, hash: &str) -> SyncResult<bool>;

    async fn save_block(&mut self, header: &BlockHeader) -> SyncResult<()>;

    /// Delete every derived row created at or above `height` in one atomic unit,
    /// unwinding spend marks made by the deleted transactions.
    async fn delete_from_height(&mut self, height: u32) -> SyncResult<()>;

    /// Move spent outputs whose spending block is below `before_height` to the archive.
    /// Returns the number of outputs moved.
    async fn archive_spent_outputs(&mut self, before_height: u32, limit: usize) -> SyncResult<usize>;

    async fn is_available(&self) -> bool;
}

/// Protocol interpretation of one block.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    /// Process every transaction of `block` in order. Per-transaction protocol violations
    /// are absorbed; any returned error aborts the block.
    async fn process_block(&self, header: &BlockHeader, block: &Block) -> SyncResult<BlockStats>;

    /// Drop memoized state after derived rows were retracted.
    async fn reset_caches(&self);
}

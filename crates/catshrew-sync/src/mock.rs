//! Mock adapters for testing

use async_trait::async_trait;
use bitcoin::{Block, Transaction, Txid};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::{
    BlockHeader, BlockProcessor, BlockStats, ChainInfo, ChainSource, StorageAdapter, SyncError,
    SyncResult,
};

#[derive(Debug, Default)]
struct MockChainState {
    active: BTreeMap<u32, String>,
    headers: HashMap<String, BlockHeader>,
    blocks: HashMap<String, Block>,
    txs: HashMap<Txid, Transaction>,
    mempool: Vec<Txid>,
    tx_failures: HashMap<Txid, u32>,
}

/// In-memory node. Blocks replaced by a reorg stay queryable by hash, like a real node.
#[derive(Debug, Clone)]
pub struct MockChain {
    state: Arc<RwLock<MockChainState>>,
    connected: Arc<RwLock<bool>>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockChainState::default())),
            connected: Arc::new(RwLock::new(true)),
        }
    }

    /// Put `block` on the active chain at `height`, replacing whatever was there.
    pub fn add_block(&self, height: u32, block: Block) -> String {
        let hash = block.block_hash().to_string();
        let header = BlockHeader {
            hash: hash.clone(),
            height,
            previousblockhash: Some(block.header.prev_blockhash.to_string()),
            time: block.header.time,
        };
        let mut state = self.state.write().unwrap();
        for tx in &block.txdata {
            state.txs.insert(tx.compute_txid(), tx.clone());
        }
        state.active.insert(height, hash.clone());
        state.headers.insert(hash.clone(), header);
        state.blocks.insert(hash.clone(), block);
        hash
    }

    /// Drop active-chain heights at or above `from_height`.
    pub fn truncate(&self, from_height: u32) {
        let mut state = self.state.write().unwrap();
        state.active.retain(|&height, _| height < from_height);
    }

    /// Make a transaction fetchable without putting it in a block.
    pub fn add_transaction(&self, tx: Transaction) {
        self.state.write().unwrap().txs.insert(tx.compute_txid(), tx);
    }

    pub fn set_mempool(&self, txids: Vec<Txid>) {
        self.state.write().unwrap().mempool = txids;
    }

    /// Fail the next `times` fetches of `txid`.
    pub fn fail_transaction(&self, txid: Txid, times: u32) {
        self.state.write().unwrap().tx_failures.insert(txid, times);
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.write().unwrap() = connected;
    }

    pub fn tip_height(&self) -> u32 {
        let state = self.state.read().unwrap();
        state.active.keys().next_back().copied().unwrap_or(0)
    }

    pub fn hash_at(&self, height: u32) -> Option<String> {
        self.state.read().unwrap().active.get(&height).cloned()
    }

    fn check_connected(&self) -> SyncResult<()> {
        if !*self.connected.read().unwrap() {
            return Err(SyncError::BitcoinNode("Node not connected".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn get_block_hash(&self, height: u32) -> SyncResult<Option<String>> {
        self.check_connected()?;
        Ok(self.state.read().unwrap().active.get(&height).cloned())
    }

    async fn get_block_header(&self, hash: &str) -> SyncResult<BlockHeader> {
        self.check_connected()?;
        self.state
            .read()
            .unwrap()
            .headers
            .get(hash)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("block header {}", hash)))
    }

    async fn get_raw_block(&self, hash: &str) -> SyncResult<Block> {
        self.check_connected()?;
        self.state
            .read()
            .unwrap()
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("block {}", hash)))
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> SyncResult<Transaction> {
        self.check_connected()?;
        let mut state = self.state.write().unwrap();
        if let Some(remaining) = state.tx_failures.get_mut(txid) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::BitcoinNode(format!("transient failure for {}", txid)));
            }
        }
        state
            .txs
            .get(txid)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("transaction {}", txid)))
    }

    async fn get_raw_mempool(&self) -> SyncResult<Vec<Txid>> {
        self.check_connected()?;
        Ok(self.state.read().unwrap().mempool.clone())
    }

    async fn get_blockchain_info(&self) -> SyncResult<ChainInfo> {
        self.check_connected()?;
        let tip = self.tip_height();
        Ok(ChainInfo {
            chain: "regtest".to_string(),
            blocks: tip,
            headers: tip,
        })
    }
}

#[derive(Debug, Default)]
struct MockStorageState {
    blocks: BTreeMap<u32, BlockHeader>,
    deletions: Vec<u32>,
    archive_passes: Vec<u32>,
}

/// Block bookkeeping only; records every retraction and archive pass it is asked for.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    state: Arc<RwLock<MockStorageState>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heights(&self) -> Vec<u32> {
        self.state.read().unwrap().blocks.keys().copied().collect()
    }

    /// Heights passed to `delete_from_height`, in call order
    pub fn deletions(&self) -> Vec<u32> {
        self.state.read().unwrap().deletions.clone()
    }

    /// `before_height` of every archive pass, in call order
    pub fn archive_passes(&self) -> Vec<u32> {
        self.state.read().unwrap().archive_passes.clone()
    }
}

#[async_trait]
impl StorageAdapter for MockStorage {
    async fn get_last_block(&self) -> SyncResult<Option<BlockHeader>> {
        let state = self.state.read().unwrap();
        Ok(state.blocks.values().next_back().cloned())
    }

    async fn block_exists(&self, hash: &str) -> SyncResult<bool> {
        let state = self.state.read().unwrap();
        Ok(state.blocks.values().any(|b| b.hash == hash))
    }

    async fn save_block(&mut self, header: &BlockHeader) -> SyncResult<()> {
        let mut state = self.state.write().unwrap();
        state.blocks.insert(header.height, header.clone());
        Ok(())
    }

    async fn delete_from_height(&mut self, height: u32) -> SyncResult<()> {
        let mut state = self.state.write().unwrap();
        state.blocks.retain(|&h, _| h < height);
        state.deletions.push(height);
        Ok(())
    }

    async fn archive_spent_outputs(&mut self, before_height: u32, _limit: usize) -> SyncResult<usize> {
        self.state.write().unwrap().archive_passes.push(before_height);
        Ok(0)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct MockProcessorState {
    processed: Vec<u32>,
    failures: HashMap<u32, u32>,
    resets: u32,
}

/// Block processor that only records the heights it completed
#[derive(Debug, Clone, Default)]
pub struct MockProcessor {
    state: Arc<RwLock<MockProcessorState>>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` attempts at `height` with an upstream error.
    pub fn fail_height(&self, height: u32, times: u32) {
        self.state.write().unwrap().failures.insert(height, times);
    }

    pub fn processed(&self) -> Vec<u32> {
        self.state.read().unwrap().processed.clone()
    }

    pub fn resets(&self) -> u32 {
        self.state.read().unwrap().resets
    }
}

#[async_trait]
impl BlockProcessor for MockProcessor {
    async fn process_block(&self, header: &BlockHeader, block: &Block) -> SyncResult<BlockStats> {
        let mut state = self.state.write().unwrap();
        if let Some(remaining) = state.failures.get_mut(&header.height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SyncError::BitcoinNode(format!(
                    "transient failure at block #{}",
                    header.height
                )));
            }
        }
        state.processed.push(header.height);
        Ok(BlockStats {
            tx_count: block.txdata.len(),
            ..Default::default()
        })
    }

    async fn reset_caches(&self) {
        self.state.write().unwrap().resets += 1;
    }
}

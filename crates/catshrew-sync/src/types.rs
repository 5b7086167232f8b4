//! Common types for catshrew-sync

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lowest height the indexer will ever start from.
pub const MIN_GENESIS_HEIGHT: u32 = 2;

/// Number of blocks deleted per atomic unit while reindexing.
pub const REINDEX_CHUNK_SIZE: u32 = 100;

/// Block header as reported by `getblockheader`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub hash: String,
    pub height: u32,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    pub time: u32,
}

/// Subset of `getblockchaininfo` the indexer reads
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChainInfo {
    #[serde(default)]
    pub chain: String,
    pub blocks: u32,
    pub headers: u32,
}

/// Configuration for the block sync loop
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// First height indexed on an empty store
    pub genesis_height: u32,
    /// Sleep between polls when the next block is not yet available
    pub block_interval: Duration,
    /// Stop once this height has been persisted
    pub exit_at: Option<u32>,
    /// Archive spent outputs every this many processed blocks (0 disables)
    pub archive_interval_blocks: u32,
    /// Spent outputs whose spending block is this far behind the tip get archived
    pub archive_depth: u32,
    /// Upper bound on outputs moved per archive pass
    pub archive_batch: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            genesis_height: MIN_GENESIS_HEIGHT,
            block_interval: Duration::from_millis(5000),
            exit_at: None,
            archive_interval_blocks: 10,
            archive_depth: 3 * 2880,
            archive_batch: 1000,
        }
    }
}

impl SyncConfig {
    /// Genesis height with the protocol floor applied
    pub fn effective_genesis(&self) -> u32 {
        self.genesis_height.max(MIN_GENESIS_HEIGHT)
    }
}

/// Configuration for the mempool tracker
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    pub update_interval: Duration,
    pub error_backoff: Duration,
    pub fetch_retries: u32,
    pub fetch_concurrency: usize,
    /// Log fetch progress only for cycles with more new transactions than this
    pub progress_threshold: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(2000),
            error_backoff: Duration::from_millis(10000),
            fetch_retries: 2,
            fetch_concurrency: 10,
            progress_threshold: 10000,
        }
    }
}

/// Per-block processing summary returned by a [`crate::BlockProcessor`]
#[derive(Debug, Clone, Default)]
pub struct BlockStats {
    pub tx_count: usize,
    pub cat_tx_count: usize,
    pub cat_processing: Duration,
}

/// JSON-RPC request structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcRequest {
    pub id: u32,
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

/// JSON-RPC response structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error structure
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_height_is_floored() {
        let config = SyncConfig {
            genesis_height: 0,
            ..Default::default()
        };
        assert_eq!(config.effective_genesis(), MIN_GENESIS_HEIGHT);
        let config = SyncConfig {
            genesis_height: 840_000,
            ..Default::default()
        };
        assert_eq!(config.effective_genesis(), 840_000);
    }

    #[test]
    fn header_parses_node_json() {
        let header: BlockHeader = serde_json::from_str(
            r#"{"hash":"00ab","height":7,"previousblockhash":"00aa","time":1700000000,"nTx":3}"#,
        )
        .unwrap();
        assert_eq!(header.height, 7);
        assert_eq!(header.previousblockhash.as_deref(), Some("00aa"));
    }
}

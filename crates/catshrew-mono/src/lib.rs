//! catshrew-mono: the indexer binary's configuration and node adapter

use anyhow::{Context, Result};
use catshrew_protocol::{ContractArtifact, ProtocolParams};
use catshrew_sync::{MempoolConfig, SyncConfig, MIN_GENESIS_HEIGHT};
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

pub mod adapters;

pub use adapters::BitcoinRpcAdapter;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "CAT20 protocol indexer")]
pub struct Args {
    #[arg(long, env = "DAEMON_RPC_URL")]
    pub daemon_rpc_url: String,
    /// `user:password` for the node's JSON-RPC
    #[arg(long, env = "DAEMON_RPC_AUTH")]
    pub auth: Option<String>,
    #[arg(long, env = "DB_PATH")]
    pub db_path: PathBuf,
    #[arg(long, env = "GENESIS_BLOCK_HEIGHT", default_value_t = MIN_GENESIS_HEIGHT)]
    pub genesis_block_height: u32,
    /// Delete derived state from this height before syncing
    #[arg(long, env = "REINDEX_BLOCK_HEIGHT")]
    pub reindex_block_height: Option<u32>,
    #[arg(long, default_value_t = 5000)]
    pub block_interval_ms: u64,
    #[arg(long)]
    pub exit_at: Option<u32>,
    #[arg(long)]
    pub no_mempool: bool,
    #[arg(long)]
    pub cache_memory_bytes: Option<usize>,
    #[arg(long, default_value_t = 10)]
    pub archive_interval_blocks: u32,

    #[arg(long, env = "GUARD_PUBKEY")]
    pub guard_pubkey: String,
    #[arg(long, env = "TRANSFER_GUARD_SCRIPT_HASH")]
    pub transfer_guard_script_hash: String,
    #[arg(long, env = "OPEN_MINTER_V1_MD5")]
    pub open_minter_v1_md5: Option<String>,
    #[arg(long, env = "OPEN_MINTER_V2_MD5")]
    pub open_minter_v2_md5: Option<String>,
    #[arg(long, env = "FXP_OPEN_MINTER_MD5")]
    pub fxp_open_minter_md5: Option<String>,
    /// sCrypt artifact JSON of the FXP buy contract
    #[arg(long, env = "FXP_BUY_ARTIFACT")]
    pub fxp_buy_artifact: Option<PathBuf>,
    /// sCrypt artifact JSON of the FXP sell contract
    #[arg(long, env = "FXP_SELL_ARTIFACT")]
    pub fxp_sell_artifact: Option<PathBuf>,
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            genesis_height: self.genesis_block_height,
            block_interval: Duration::from_millis(self.block_interval_ms),
            exit_at: self.exit_at,
            archive_interval_blocks: self.archive_interval_blocks,
            ..Default::default()
        }
    }

    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig::default()
    }

    pub fn protocol_params(&self) -> Result<ProtocolParams> {
        let mut params =
            ProtocolParams::from_hex(&self.guard_pubkey, &self.transfer_guard_script_hash)?;
        params.open_minter_v1_md5 = self.open_minter_v1_md5.clone();
        params.open_minter_v2_md5 = self.open_minter_v2_md5.clone();
        params.fxp_open_minter_md5 = self.fxp_open_minter_md5.clone();
        params.buy_contract = load_artifact(self.fxp_buy_artifact.as_ref(), "buy")?;
        params.sell_contract = load_artifact(self.fxp_sell_artifact.as_ref(), "sell")?;
        if let Some(bytes) = self.cache_memory_bytes {
            params.cache_memory_bytes = bytes;
        }
        Ok(params)
    }
}

fn load_artifact(path: Option<&PathBuf>, kind: &str) -> Result<Option<ContractArtifact>> {
    let Some(path) = path else {
        info!("no {} contract artifact configured, {} orders are not tracked", kind, kind);
        return Ok(None);
    };
    let artifact = ContractArtifact::from_file(path)
        .with_context(|| format!("loading {} contract artifact", kind))?;
    info!("{} contract md5 = {}", kind, artifact.md5);
    Ok(Some(artifact))
}

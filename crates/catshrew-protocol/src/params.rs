//! Deployment parameters of the protocol contracts

use anyhow::{anyhow, Context, Result};

use crate::constants::DEFAULT_CACHE_MEMORY_BYTES;
use crate::contract::ContractArtifact;
use crate::taproot::XOnlyKey;

/// Keys, script hashes and artifacts the classifier matches transactions against
#[derive(Debug, Clone)]
pub struct ProtocolParams {
    /// Output key of the token guard contract
    pub guard_pubkey: XOnlyKey,
    /// hash160 of the guard's transfer leaf
    pub transfer_guard_script_hash: [u8; 20],
    pub open_minter_v1_md5: Option<String>,
    pub open_minter_v2_md5: Option<String>,
    pub fxp_open_minter_md5: Option<String>,
    pub buy_contract: Option<ContractArtifact>,
    pub sell_contract: Option<ContractArtifact>,
    /// Memory budget shared by the taproot input and token info caches
    pub cache_memory_bytes: usize,
}

impl ProtocolParams {
    pub fn new(guard_pubkey: XOnlyKey, transfer_guard_script_hash: [u8; 20]) -> Self {
        Self {
            guard_pubkey,
            transfer_guard_script_hash,
            open_minter_v1_md5: None,
            open_minter_v2_md5: None,
            fxp_open_minter_md5: None,
            buy_contract: None,
            sell_contract: None,
            cache_memory_bytes: DEFAULT_CACHE_MEMORY_BYTES,
        }
    }

    pub fn from_hex(guard_pubkey: &str, transfer_guard_script_hash: &str) -> Result<Self> {
        let guard = hex::decode(guard_pubkey).context("guard pubkey is not hex")?;
        let guard: XOnlyKey = guard
            .try_into()
            .map_err(|v: Vec<u8>| anyhow!("guard pubkey must be 32 bytes, got {}", v.len()))?;
        let hash = hex::decode(transfer_guard_script_hash)
            .context("transfer guard script hash is not hex")?;
        let hash: [u8; 20] = hash.try_into().map_err(|v: Vec<u8>| {
            anyhow!("transfer guard script hash must be 20 bytes, got {}", v.len())
        })?;
        Ok(Self::new(guard, hash))
    }

    pub fn guard_pubkey_hex(&self) -> String {
        hex::encode(self.guard_pubkey)
    }

    pub fn is_fxp_minter(&self, minter_md5: Option<&str>) -> bool {
        matches!((minter_md5, &self.fxp_open_minter_md5), (Some(a), Some(b)) if a == b)
    }

    /// Open minters that allow only one token output per mint
    pub fn is_single_output_minter(&self, minter_md5: Option<&str>) -> bool {
        let Some(md5) = minter_md5 else {
            return false;
        };
        [&self.open_minter_v1_md5, &self.open_minter_v2_md5]
            .iter()
            .any(|known| known.as_deref() == Some(md5))
    }

    pub fn buy_md5(&self) -> Option<&str> {
        self.buy_contract.as_ref().map(|c| c.md5.as_str())
    }

    pub fn sell_md5(&self) -> Option<&str> {
        self.sell_contract.as_ref().map(|c| c.md5.as_str())
    }

    /// Whether an order row was produced by the buy contract
    pub fn is_buy_order(&self, md5: Option<&str>) -> bool {
        matches!((md5, self.buy_md5()), (Some(a), Some(b)) if a == b)
    }
}

//! Test suite for the CAT20 indexer with the in-memory backend
//!
//! [`TestIndexer`] wires a [`MockChain`], an [`IndexStore`] over [`MemStore`], the protocol
//! processor and the sync loop together the same way the binary does with a real node and
//! RocksDB.

use anyhow::Result;
use bitcoin::{OutPoint, Transaction};
use catshrew_memstore::MemStore;
use catshrew_protocol::{CatProcessor, ContractArtifact, ProtocolParams};
use catshrew_runtime::IndexStore;
use catshrew_sync::mock::MockChain;
use catshrew_sync::{CatSync, SyncConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use tx_builder::{
    funding_outpoint, guard_items, mint_items, outpoint, state_hash_items, Contract, TxBuilder,
};


pub mod order_test;
pub mod rocksdb_persistence_test;

pub const GENESIS_HEIGHT: u32 = 2;
pub const STATE_ROOT: [u8; 20] = [0x11; 20];
pub const OPEN_MINTER_V2_MD5: &str = "a6c2e92d74a23c07bb6220b676c6cb9b";
pub const FXP_MINTER_MD5: &str = "fe7f8b63b08b3acd03cd0a13e4b1e35a";
pub const BUY_MD5: &str = "fxp-buy-md5";
pub const SELL_MD5: &str = "fxp-sell-md5";

pub type MemProcessor = CatProcessor<MockChain, MemStore>;
pub type MemSync = CatSync<MockChain, IndexStore<MemStore>, MemProcessor>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The transfer guard every token movement in these tests goes through
pub fn guard() -> Contract {
    Contract::new("transfer guard")
}

pub fn buy_artifact() -> ContractArtifact {
    ContractArtifact::from_json(&format!(
        r#"{{"md5":"{}","hex":"<cat20Script><buyerAddress><price><scalePrice>7575757551"}}"#,
        BUY_MD5
    ))
    .unwrap()
}

pub fn sell_artifact() -> ContractArtifact {
    ContractArtifact::from_json(&format!(
        r#"{{"md5":"{}","hex":"<cat20Script><recvOutput><sellerAddress><tokenPrice><scalePrice>757575757551"}}"#,
        SELL_MD5
    ))
    .unwrap()
}

pub fn protocol_params() -> ProtocolParams {
    let guard = guard();
    let mut params = ProtocolParams::new(guard.key(), guard.script_hash());
    params.open_minter_v2_md5 = Some(OPEN_MINTER_V2_MD5.to_string());
    params.fxp_open_minter_md5 = Some(FXP_MINTER_MD5.to_string());
    params.buy_contract = Some(buy_artifact());
    params.sell_contract = Some(sell_artifact());
    params
}

pub fn sync_config() -> SyncConfig {
    SyncConfig {
        genesis_height: GENESIS_HEIGHT,
        block_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Mock node, in-memory store, processor and sync loop
pub struct TestIndexer {
    pub chain: MockChain,
    pub store: IndexStore<MemStore>,
    pub sync: MemSync,
}

impl Default for TestIndexer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestIndexer {
    pub fn new() -> Self {
        Self::with_params(protocol_params())
    }

    pub fn with_params(params: ProtocolParams) -> Self {
        init_logging();
        let chain = MockChain::new();
        let node = Arc::new(chain.clone());
        let store = IndexStore::new(MemStore::new());
        let processor = Arc::new(CatProcessor::new(node.clone(), store.clone(), params));
        let sync = CatSync::new(node, store.clone(), processor, sync_config());
        Self { chain, store, sync }
    }

    pub fn processor(&self) -> &Arc<MemProcessor> {
        self.sync.processor()
    }

    /// Index every block the node has; returns the number of blocks processed.
    pub async fn sync_to_tip(&self) -> Result<u32> {
        let mut processed = 0;
        while self.sync.process_next().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }
}

/// One deployed token: its commit, minter and token contracts and the reveal transaction
pub struct TokenDeploy {
    pub commit: Contract,
    pub minter: Contract,
    pub token: Contract,
    pub genesis: OutPoint,
    pub reveal: Transaction,
}

impl TokenDeploy {
    pub fn new(name: &str, minter_md5: &str) -> Self {
        let commit = Contract::token_commit(&json!({
            "name": name,
            "symbol": name.to_uppercase(),
            "decimals": 2,
            "minterMd5": minter_md5,
            "max": 21000000,
            "limit": 500,
            "premine": 0
        }));
        let minter = Contract::new(&format!("{} minter", name));
        let token = Contract::new(&format!("{} token", name));
        let genesis = funding_outpoint(&format!("{} genesis", name));
        let reveal = TxBuilder::new()
            .spend(genesis, &commit, state_hash_items())
            .marker(STATE_ROOT)
            .contract_output(&minter)
            .build();
        Self {
            commit,
            minter,
            token,
            genesis,
            reveal,
        }
    }

    pub fn token_id(&self) -> String {
        format!("{}_{}", self.genesis.txid, self.genesis.vout)
    }

    /// Mint spending the minter at `minter_out`, leaving a minter at output 1 and the
    /// token at output 2
    pub fn mint(&self, minter_out: OutPoint, owner: [u8; 20], amount: i64) -> Transaction {
        self.mint_to(minter_out, &self.token, owner, amount)
    }

    pub fn mint_to(
        &self,
        minter_out: OutPoint,
        token: &Contract,
        owner: [u8; 20],
        amount: i64,
    ) -> Transaction {
        TxBuilder::new()
            .spend(minter_out, &self.minter, mint_items(owner, amount))
            .marker(STATE_ROOT)
            .contract_output(&self.minter)
            .contract_output(token)
            .build()
    }

    /// First mint, straight off the reveal
    pub fn first_mint(&self, owner: [u8; 20], amount: i64) -> Transaction {
        self.mint(outpoint(&self.reveal, 1), owner, amount)
    }

    /// Transfer of the token outputs at `inputs` to `outputs`, one token output each
    pub fn transfer(&self, inputs: &[OutPoint], outputs: &[([u8; 20], i64)]) -> Transaction {
        let guard = guard();
        let mut builder = TxBuilder::new();
        for input in inputs {
            builder = builder.spend(*input, &self.token, state_hash_items());
        }
        builder = builder
            .spend(funding_outpoint("guard deploy"), &guard, guard_items(outputs))
            .marker(STATE_ROOT);
        for _ in outputs {
            builder = builder.contract_output(&self.token);
        }
        builder.build()
    }
}

//! # Transaction classifier and processor
//!
//! [`CatProcessor`] is the [`BlockProcessor`] the sync loop drives. Each transaction of a block
//! is handled in order inside its own [`WriteUnit`]:
//!
//! 1. coinbase transactions and transactions with neither the CAT marker nor the buy-order
//!    locktime are ignored,
//! 2. a transaction creating a guard output is a guard builder and carries no state,
//! 3. every input gets its spend mark (and order status, for protocol transactions),
//! 4. a buy-order commit is matched against its parent output,
//! 5. the transaction is a transfer (guard inputs), a mint (one minter input) or a reveal.
//!
//! A [`CatTxError`] drops the unit and the next transaction proceeds. Storage and upstream
//! errors abort the block.

mod mint;
mod orders;
mod reveal;
mod transfer;

pub use orders::{order_status_from_shape, BuyOrderCommit};
pub use transfer::{parse_token_outputs, TokenOutput};

use async_trait::async_trait;
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Block, Script, Transaction, TxIn};
use catshrew_runtime::{storage_error, IndexStore, KeyValueStoreLike, TxOutRow, TxRow, WriteUnit};
use catshrew_sync::{BlockHeader, BlockProcessor, BlockStats, ChainSource, SyncResult};
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::ProcessorCaches;
use crate::constants::*;
use crate::error::{CatTxError, ProcessError, ProcessResult};
use crate::params::ProtocolParams;
use crate::taproot::{
    compute_leaf_spend, leaf_key, parse_taproot_output, script_path_items, TaprootInput, XOnlyKey,
};

/// What a committed transaction turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Reveal,
    Mint,
    Transfer,
    /// Protocol transaction that only spent outputs (and possibly opened a buy order)
    Spend,
}

/// Parsed view of one transaction shared by every branch
pub(crate) struct TxContext<'a> {
    pub tx: &'a Transaction,
    pub txid: String,
    pub tx_index: u32,
    pub header: &'a BlockHeader,
    pub is_cat: bool,
    pub pay_outs: Vec<Option<XOnlyKey>>,
    pub pay_ins: Vec<Option<TaprootInput>>,
}

impl TxContext<'_> {
    /// Output row carrying only what the output itself shows
    pub fn base_tx_out(&self, index: usize) -> TxOutRow {
        let output = &self.tx.output[index];
        TxOutRow {
            txid: self.txid.clone(),
            output_index: index as u32,
            block_height: self.header.height,
            satoshis: output.value.to_sat(),
            locking_script: hex::encode(output.script_pubkey.as_bytes()),
            x_only_pubkey: self.pay_outs.get(index).copied().flatten().map(hex::encode),
            owner_pubkey_hash: None,
            token_amount: None,
            spend_txid: None,
            spend_input_index: None,
        }
    }

    /// Witness program of the last output, the key orders name as owner or taker
    pub fn last_output_program(&self) -> Option<String> {
        let script = self.tx.output.last()?.script_pubkey.as_bytes();
        script.get(2..).map(hex::encode)
    }
}

pub fn is_cat_tx(tx: &Transaction) -> bool {
    tx.output
        .first()
        .map_or(false, |out| out.script_pubkey.as_bytes().starts_with(&CAT_MARKER_PREFIX))
}

/// Root hash of output 0, clamped to what the script holds
pub fn state_root_hash(tx: &Transaction) -> Vec<u8> {
    let script = tx.output.first().map(|o| o.script_pubkey.as_bytes()).unwrap_or_default();
    let start = STATE_ROOT_HASH_OFFSET.min(script.len());
    let end = (STATE_ROOT_HASH_OFFSET + STATE_ROOT_HASH_BYTES).min(script.len());
    script[start..end].to_vec()
}

/// First [`CONTRACT_OUTPUT_MAX_COUNT`] witness items of a contract input
pub(crate) fn state_hashes(input: &TaprootInput) -> Result<Vec<Vec<u8>>, CatTxError> {
    let hashes: Vec<Vec<u8>> = input
        .witness
        .iter()
        .skip(CONTRACT_INPUT_WITNESS_STATE_HASHES_OFFSET)
        .take(CONTRACT_OUTPUT_MAX_COUNT)
        .cloned()
        .collect();
    if hashes
        .iter()
        .any(|h| !h.is_empty() && h.len() != STATE_HASH_BYTES)
    {
        return Err(CatTxError::BadStateHashLength);
    }
    Ok(hashes)
}

pub struct CatProcessor<N: ChainSource, S: KeyValueStoreLike + Clone> {
    node: Arc<N>,
    store: IndexStore<S>,
    params: ProtocolParams,
    caches: ProcessorCaches,
    secp: Secp256k1<VerifyOnly>,
}

impl<N, S> CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    pub fn new(node: Arc<N>, store: IndexStore<S>, params: ProtocolParams) -> Self {
        info!("guard xOnlyPubKey = {}", params.guard_pubkey_hex());
        info!(
            "guard transferScriptHash = {}",
            hex::encode(params.transfer_guard_script_hash)
        );
        let caches = ProcessorCaches::new(params.cache_memory_bytes);
        Self {
            node,
            store,
            params,
            caches,
            secp: Secp256k1::verification_only(),
        }
    }

    pub fn params(&self) -> &ProtocolParams {
        &self.params
    }

    pub fn store(&self) -> &IndexStore<S> {
        &self.store
    }

    pub fn caches(&self) -> &ProcessorCaches {
        &self.caches
    }

    /// Script-path view of `input`, or `None` when it is not a Taproot script-path spend
    pub fn parse_taproot_input(&self, input: &TxIn) -> Option<TaprootInput> {
        let (script, control_block) = script_path_items(input)?;
        let key = leaf_key(script, control_block);
        let leaf = match self.caches.leaf(&key) {
            Some(leaf) => leaf,
            None => {
                let leaf = compute_leaf_spend(&self.secp, script, control_block).ok()?;
                self.caches.insert_leaf(key, leaf.clone());
                leaf
            }
        };
        Some(TaprootInput {
            pubkey: leaf.pubkey,
            redeem_script: leaf.redeem_script,
            witness: input.witness.to_vec(),
        })
    }

    fn search_buy_order(&self, tx: &Transaction) -> Option<BuyOrderCommit> {
        let contract = self.params.buy_contract.as_ref()?;
        let witness0 = tx.input.first()?.witness.nth(0)?;
        let args = crate::envelope::decode_buy_order(Script::from_bytes(witness0), &contract.md5)?;
        BuyOrderCommit::new(contract, args)
            .map_err(|e| debug!("buy order contract rejected, {:#}", e))
            .ok()
    }

    /// Classify and apply one transaction. Returns the kind of the committed transaction,
    /// `None` when nothing was written.
    pub async fn process_tx(
        &self,
        tx: &Transaction,
        tx_index: u32,
        header: &BlockHeader,
    ) -> SyncResult<Option<TxKind>> {
        let buy_order = if tx.lock_time.to_consensus_u32() == BUY_ORDER_LOCKTIME {
            self.search_buy_order(tx)
        } else {
            None
        };
        if tx.is_coinbase() {
            return Ok(None);
        }
        let is_cat = is_cat_tx(tx);
        if !is_cat && buy_order.is_none() {
            return Ok(None);
        }

        let txid = tx.compute_txid().to_string();
        let pay_outs: Vec<Option<XOnlyKey>> = tx
            .output
            .iter()
            .map(|out| parse_taproot_output(&out.script_pubkey))
            .collect();
        if pay_outs.iter().flatten().any(|key| *key == self.params.guard_pubkey) {
            info!("[OK] guard builder {}", txid);
            return Ok(None);
        }
        let pay_ins = tx.input.iter().map(|i| self.parse_taproot_input(i)).collect();

        let ctx = TxContext {
            tx,
            txid,
            tx_index,
            header,
            is_cat,
            pay_outs,
            pay_ins,
        };
        let start = Instant::now();
        let mut unit = self.store.begin();
        match self.apply_tx(&mut unit, &ctx, buy_order.as_ref()).await {
            Ok(kind) => {
                unit.commit().map_err(storage_error)?;
                debug!(
                    "processTx {} - Total: {}ms",
                    ctx.txid,
                    start.elapsed().as_millis()
                );
                Ok(Some(kind))
            }
            Err(ProcessError::Protocol(e)) => {
                info!("skip tx {}, {}", ctx.txid, e);
                Ok(None)
            }
            Err(ProcessError::Sync(e)) => {
                error!("process tx {} error, {}", ctx.txid, e);
                Err(e)
            }
        }
    }

    async fn apply_tx(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        buy_order: Option<&BuyOrderCommit>,
    ) -> ProcessResult<TxKind> {
        let guard_inputs: Vec<&TaprootInput> = ctx
            .pay_ins
            .iter()
            .flatten()
            .filter(|input| input.pubkey == self.params.guard_pubkey)
            .collect();

        self.update_spent(unit, ctx, guard_inputs.first().copied())?;

        if let Some(order) = buy_order {
            self.process_buy_order(unit, ctx, order).await?;
        }

        let (kind, hashes) = if guard_inputs.is_empty() {
            match self.search_minter_input(unit, ctx)? {
                Some((minter, token)) => {
                    let hashes = self.process_mint(unit, ctx, minter, token)?;
                    info!("[OK] mint tx {}", ctx.txid);
                    (TxKind::Mint, hashes)
                }
                None => match self.process_reveal(unit, ctx) {
                    Ok(hashes) => {
                        info!("[OK] reveal tx {}", ctx.txid);
                        (TxKind::Reveal, hashes)
                    }
                    Err(ProcessError::Protocol(CatTxError::MissingCommitInput)) => {
                        debug!("tx {} spends protocol outputs only", ctx.txid);
                        return Ok(TxKind::Spend);
                    }
                    Err(e) => return Err(e),
                },
            }
        } else {
            let mut hashes = Vec::new();
            for guard in &guard_inputs {
                hashes = self.process_transfer(unit, ctx, guard).await?;
            }
            info!("[OK] transfer tx {}", ctx.txid);
            (TxKind::Transfer, hashes)
        };

        self.save_tx(unit, ctx, &hashes)?;
        Ok(kind)
    }

    fn save_tx(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        hashes: &[Vec<u8>],
    ) -> ProcessResult<()> {
        let mut state_hashes = Vec::with_capacity(hashes.len() + 1);
        state_hashes.push(hex::encode(state_root_hash(ctx.tx)));
        state_hashes.extend(hashes.iter().map(hex::encode));
        unit.put_tx(&TxRow {
            txid: ctx.txid.clone(),
            block_height: ctx.header.height,
            tx_index: ctx.tx_index,
            state_hashes,
        })?;
        Ok(())
    }
}

#[async_trait]
impl<N, S> BlockProcessor for CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    async fn process_block(&self, header: &BlockHeader, block: &Block) -> SyncResult<BlockStats> {
        let mut stats = BlockStats {
            tx_count: block.txdata.len(),
            ..Default::default()
        };
        for (index, tx) in block.txdata.iter().enumerate() {
            let start = Instant::now();
            if self.process_tx(tx, index as u32, header).await?.is_some() {
                stats.cat_tx_count += 1;
                stats.cat_processing += start.elapsed();
            }
        }

        match self.rematerialize_partial_orders(header) {
            Ok(0) => {}
            Ok(n) => debug!("reopened {} partially filled orders", n),
            Err(e) => error!("process partially filled orders error, {:#}", e),
        }
        Ok(stats)
    }

    async fn reset_caches(&self) {
        self.caches.clear();
    }
}

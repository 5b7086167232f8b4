//! Spend marking, order status inference and the orderbook rows

use anyhow::Result;
use bitcoin::{ScriptBuf, Transaction};
use catshrew_runtime::{KeyValueStoreLike, OrderStatus, TokenOrderRow, TxOutRow, WriteUnit};
use catshrew_sync::{BlockHeader, ChainSource};
use log::debug;

use super::{parse_token_outputs, CatProcessor, TxContext};
use crate::constants::*;
use crate::contract::{ContractArtifact, ScriptArg};
use crate::envelope::BuyOrderArgs;
use crate::error::ProcessResult;
use crate::taproot::TaprootInput;

/// Order status implied by the output layout of a spending transaction.
///
/// This is a layout convention of the orderbook contracts, not a commitment: any
/// transaction with the same shape is classified the same way.
pub fn order_status_from_shape(tx: &Transaction) -> Option<OrderStatus> {
    let fee_at = |index: usize| {
        tx.output
            .get(index)
            .map_or(false, |out| hex::encode(out.script_pubkey.as_bytes()) == SERVICE_FEE_SCRIPT)
    };
    match tx.output.len() {
        3 => Some(OrderStatus::Canceled),
        6 if fee_at(3) => Some(OrderStatus::Filled),
        5 if fee_at(2) => Some(OrderStatus::Filled),
        6 => Some(OrderStatus::PartiallyFilled),
        _ => None,
    }
}

/// Buy-order commit decoded from `input[0]`, with the contract it claims to fund
#[derive(Debug, Clone)]
pub struct BuyOrderCommit {
    pub args: BuyOrderArgs,
    pub contract_script: ScriptBuf,
}

impl BuyOrderCommit {
    pub fn new(contract: &ContractArtifact, args: BuyOrderArgs) -> Result<Self> {
        let contract_script = contract.locking_script(&[
            ScriptArg::Bytes(args.cat20_script.clone()),
            ScriptArg::Bytes(args.buyer_address.clone()),
            ScriptArg::Int(args.price),
            ScriptArg::Bool(false),
        ])?;
        Ok(Self {
            args,
            contract_script,
        })
    }
}

fn open_order(txid: String, output_index: u32, header: &BlockHeader) -> TokenOrderRow {
    TokenOrderRow {
        txid,
        output_index,
        token_pubkey: String::new(),
        token_txid: None,
        token_output_index: None,
        token_amount: None,
        genesis_txid: None,
        genesis_output_index: None,
        owner_pubkey: String::new(),
        price: 0,
        block_height: header.height,
        created_at: header.time,
        spend_txid: None,
        spend_input_index: None,
        spend_block_height: None,
        spend_created_at: None,
        taker_pubkey: None,
        status: OrderStatus::Open,
        fill_amount: None,
        md5: None,
    }
}

impl<N, S> CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    /// Mark every spent output and advance the orders this transaction consumes.
    pub(super) fn update_spent(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        guard: Option<&TaprootInput>,
    ) -> ProcessResult<()> {
        let status = order_status_from_shape(ctx.tx);
        let height = ctx.header.height;

        for (vin, input) in ctx.tx.input.iter().enumerate() {
            let vin = vin as u32;
            let prev_txid = input.previous_output.txid.to_string();
            let prev_vout = input.previous_output.vout;
            unit.mark_tx_out_spent(&prev_txid, prev_vout, &ctx.txid, vin, height)?;

            if !ctx.is_cat {
                continue;
            }
            let mut order = match unit.get_order(&prev_txid, prev_vout)? {
                Some(order) => order,
                None => continue,
            };
            match (guard, status) {
                (Some(guard), Some(status)) => {
                    let fill = match parse_token_outputs(guard)?.get(&1) {
                        Some(token) => token.amount,
                        None => continue,
                    };
                    order.taker_pubkey = ctx.last_output_program();
                    order.status = status;
                    order.fill_amount = Some(fill);
                }
                (Some(_), None) => continue,
                (None, _) => order.status = OrderStatus::Canceled,
            }
            order.spend_txid = Some(ctx.txid.clone());
            order.spend_input_index = Some(vin);
            order.spend_block_height = Some(height);
            order.spend_created_at = Some(ctx.header.time);
            debug!("order {}:{} {} by {}", prev_txid, prev_vout, order.status, ctx.txid);
            unit.put_order(&order)?;
        }

        if status == Some(OrderStatus::Filled) {
            let index = if ctx.tx.output.len() == 5 { 3 } else { 4 };
            let output = &ctx.tx.output[index];
            unit.put_tx_out(&TxOutRow {
                txid: ctx.txid.clone(),
                output_index: index as u32,
                block_height: height,
                satoshis: output.value.to_sat(),
                locking_script: hex::encode(output.script_pubkey.as_bytes()),
                x_only_pubkey: None,
                owner_pubkey_hash: None,
                token_amount: None,
                spend_txid: None,
                spend_input_index: None,
            })?;
        }
        Ok(())
    }

    /// Open a buy order when the commit's parent output is the contract it describes.
    pub(super) async fn process_buy_order(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        commit: &BuyOrderCommit,
    ) -> ProcessResult<()> {
        let Some(input) = ctx.tx.input.first() else {
            return Ok(());
        };
        let parent_txid = input.previous_output.txid;
        let parent = self.node.get_raw_transaction(&parent_txid).await?;
        let Some(output) = parent.output.get(1) else {
            return Ok(());
        };
        if output.script_pubkey != commit.contract_script {
            debug!("buy order {} does not match its contract", ctx.txid);
            return Ok(());
        }

        let mut order = open_order(parent_txid.to_string(), 1, ctx.header);
        order.token_pubkey = hex::encode(commit.args.token_pubkey());
        order.token_amount = Some(output.value.to_sat() as i64 / commit.args.price);
        order.owner_pubkey = ctx.last_output_program().unwrap_or_default();
        order.price = commit.args.price;
        order.md5 = self.params.buy_md5().map(str::to_string);
        unit.put_order(&order)?;
        Ok(())
    }

    /// Open a sell order for a transfer that finalizes a sell commit.
    ///
    /// `tokens` are the token outputs the transfer just saved, lowest index first.
    pub(super) async fn tag_sell_order(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        tokens: &[TxOutRow],
    ) -> ProcessResult<()> {
        let Some(contract) = self.params.sell_contract.as_ref() else {
            return Ok(());
        };
        let sell_guard = hex::decode(SELL_GUARD_WITNESS_SCRIPT).unwrap_or_default();
        let Some(guard_input) = ctx
            .tx
            .input
            .iter()
            .find(|input| input.witness.nth(FXP_WITNESS_INDEX) == Some(sell_guard.as_slice()))
        else {
            debug!("sell locktime without sell guard in {}", ctx.txid);
            return Ok(());
        };
        let Some(token) = tokens.first() else {
            return Ok(());
        };
        let Some(seller) = ctx.tx.output.last().map(|o| o.script_pubkey.as_bytes()) else {
            return Ok(());
        };
        if seller.len() < 2 {
            return Ok(());
        }

        let parent_txid = guard_input.previous_output.txid;
        let parent = self.node.get_raw_transaction(&parent_txid).await?;
        let price = parent.lock_time.to_consensus_u32() as i64;

        let token_script = ctx.tx.output[token.output_index as usize]
            .script_pubkey
            .as_bytes()
            .to_vec();
        let expected = match contract.locking_script(&[
            ScriptArg::Bytes(token_script.clone()),
            ScriptArg::Bytes(seller.to_vec()),
            ScriptArg::Bytes(crate::taproot::hash160(&seller[2..]).to_vec()),
            ScriptArg::Int(price),
            ScriptArg::Bool(false),
        ]) {
            Ok(script) => script,
            Err(e) => {
                debug!("sell contract for {} not built, {:#}", ctx.txid, e);
                return Ok(());
            }
        };
        if parent.output.get(2).map(|o| &o.script_pubkey) != Some(&expected) {
            return Ok(());
        }

        let mut order = open_order(parent_txid.to_string(), 2, ctx.header);
        order.token_pubkey = hex::encode(&token_script[2..]);
        order.token_txid = Some(ctx.txid.clone());
        order.token_output_index = Some(1);
        order.token_amount = token.token_amount;
        order.owner_pubkey = hex::encode(&seller[2..]);
        order.price = price;
        order.md5 = self.params.sell_md5().map(str::to_string);
        unit.put_order(&order)?;
        Ok(())
    }

    /// Reopen the unfilled remainder of partially filled orders as new orders.
    pub fn rematerialize_partial_orders(&self, header: &BlockHeader) -> Result<usize> {
        let mut unit = self.store.begin();
        let mut reopened = 0;
        for order in unit.orders_with_status(OrderStatus::PartiallyFilled)? {
            let Some(spend_txid) = order.spend_txid.clone() else {
                continue;
            };
            if unit
                .orders_with_txid(&spend_txid)?
                .iter()
                .any(|o| o.txid != order.txid)
            {
                continue;
            }

            let Some(remaining) = order
                .token_amount
                .unwrap_or(0)
                .checked_sub(order.fill_amount.unwrap_or(0))
            else {
                debug!("order {}:{} fill amount out of range", order.txid, order.output_index);
                continue;
            };

            let is_buy = self.params.is_buy_order(order.md5.as_deref());
            let output_index = if is_buy {
                BUY_REMAINDER_OUTPUT_INDEX
            } else {
                SELL_REMAINDER_OUTPUT_INDEX
            };
            let mut remainder = open_order(spend_txid, output_index, header);
            remainder.token_pubkey = order.token_pubkey.clone();
            remainder.token_txid = (!is_buy).then(|| order.txid.clone());
            remainder.token_output_index = (!is_buy).then_some(output_index);
            remainder.token_amount = Some(remaining);
            remainder.genesis_txid = Some(order.genesis_txid.clone().unwrap_or(order.txid.clone()));
            remainder.genesis_output_index =
                Some(order.genesis_output_index.unwrap_or(order.output_index));
            remainder.owner_pubkey = order.owner_pubkey.clone();
            remainder.price = order.price;
            remainder.status = OrderStatus::PartiallyOpen;
            remainder.md5 = order.md5.clone();
            unit.put_order(&remainder)?;
            reopened += 1;
        }
        unit.commit()?;
        Ok(reopened)
    }
}

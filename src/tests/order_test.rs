//! Orderbook tracking: buy commits, sell finalizations, fills, cancels and remainders

use super::block_builder::ChainBuilder;
use super::tx_builder::{
    outpoint, p2tr_script, push, service_fee_script, state_hash_items, TxBuilder,
};
use super::*;
use bitcoin::opcodes::all::{OP_CHECKSIG, OP_DROP, OP_PUSHBYTES_0};
use bitcoin::script::Builder;
use bitcoin::{ScriptBuf, Witness};
use catshrew_protocol::constants::{BUY_ORDER_LOCKTIME, SELL_GUARD_WITNESS_SCRIPT};
use catshrew_protocol::{hash160, ScriptArg};
use catshrew_runtime::OrderStatus;

pub(crate) const ALICE: [u8; 20] = [0xa1; 20];
const BUYER_KEY: [u8; 32] = [0xbb; 32];
const SELLER_KEY: [u8; 32] = [0x5e; 32];
pub(crate) const TAKER_KEY: [u8; 32] = [0x7a; 32];
const PRICE: i64 = 100;
const ORDER_SATS: u64 = 10_000;

/// Token deployed at the genesis height with one 500-unit mint to Alice in the next block
pub(crate) struct Market {
    pub indexer: TestIndexer,
    pub deploy: TokenDeploy,
    pub mint: Transaction,
    pub chain: ChainBuilder,
}

impl Market {
    pub fn new() -> Self {
        let indexer = TestIndexer::new();
        let deploy = TokenDeploy::new("cat", OPEN_MINTER_V2_MD5);
        let mint = deploy.first_mint(ALICE, 500);
        let chain = ChainBuilder::new(GENESIS_HEIGHT)
            .add_block_with(vec![deploy.reveal.clone()])
            .add_block_with(vec![mint.clone()]);
        Self {
            indexer,
            deploy,
            mint,
            chain,
        }
    }

    pub fn add_block(mut self, txs: Vec<Transaction>) -> Self {
        self.chain = self.chain.add_block_with(txs);
        self
    }

    pub async fn sync(&self) -> Result<()> {
        self.chain.load(&self.indexer.chain);
        self.indexer.sync_to_tip().await?;
        Ok(())
    }

    pub fn order(&self, tx: &Transaction, vout: u32) -> Result<Option<catshrew_runtime::TokenOrderRow>> {
        self.indexer.store.get_order(&tx.compute_txid().to_string(), vout)
    }
}

fn buy_commit_script(token_script: &ScriptBuf, buyer: &ScriptBuf, price: i64, md5: &str) -> ScriptBuf {
    let args = serde_json::json!({
        "args": [
            hex::encode(token_script.as_bytes()),
            hex::encode(buyer.as_bytes()),
            price
        ],
        "md5": md5
    });
    let mut payload = Vec::new();
    ciborium::into_writer(&args, &mut payload).unwrap();
    let builder = push(Builder::new(), &[3u8; 32])
        .push_opcode(OP_CHECKSIG)
        .push_opcode(OP_PUSHBYTES_0);
    let builder = push(builder, b"order").push_opcode(OP_DROP);
    push(builder, &payload).into_script()
}

/// Parent funding the buy contract at output 1, and the commit that announces it
pub(crate) fn buy_order(deploy: &TokenDeploy, label: &str, md5: &str) -> (Transaction, Transaction) {
    let token_script = deploy.token.script_pubkey();
    let buyer = p2tr_script(BUYER_KEY);
    let contract = buy_artifact()
        .locking_script(&[
            ScriptArg::Bytes(token_script.to_bytes()),
            ScriptArg::Bytes(buyer.to_bytes()),
            ScriptArg::Int(PRICE),
            ScriptArg::Bool(false),
        ])
        .unwrap();
    let parent = TxBuilder::new()
        .fee_input(funding_outpoint(label))
        .output(p2tr_script([0x01; 32]), 1_000)
        .output(contract, ORDER_SATS)
        .build();
    let script = buy_commit_script(&token_script, &buyer, PRICE, md5);
    let commit = TxBuilder::new()
        .lock_time(BUY_ORDER_LOCKTIME)
        .input(outpoint(&parent, 0), Witness::from_slice(&[script.to_bytes()]))
        .output(p2tr_script([0x02; 32]), 546)
        .output(buyer, 546)
        .build();
    (parent, commit)
}

/// Taker transaction spending the order at `order` and Alice's tokens, with `outputs`
/// after the marker and the token output
pub(crate) fn take(
    market: &Market,
    order: OutPoint,
    fill: i64,
    outputs: Vec<ScriptBuf>,
) -> Transaction {
    let mut builder = TxBuilder::new()
        .fee_input(order)
        .spend(outpoint(&market.mint, 2), &market.deploy.token, state_hash_items())
        .spend(
            funding_outpoint("guard deploy"),
            &guard(),
            tx_builder::guard_items(&[([0xbb; 20], fill)]),
        )
        .marker(STATE_ROOT)
        .contract_output(&market.deploy.token);
    for script in outputs {
        builder = builder.output(script, 546);
    }
    builder.build()
}

#[tokio::test]
async fn test_buy_commit_opens_an_order() -> Result<()> {
    let market = Market::new();
    let (parent, commit) = buy_order(&market.deploy, "buy parent", BUY_MD5);
    let market = market.add_block(vec![parent.clone(), commit.clone()]);
    market.sync().await?;

    let order = market.order(&parent, 1)?.expect("buy order row");
    assert_eq!(order.status, OrderStatus::Open);
    assert_eq!(order.token_pubkey, market.deploy.token.key_hex());
    assert_eq!(order.token_amount, Some(ORDER_SATS as i64 / PRICE));
    assert_eq!(order.price, PRICE);
    assert_eq!(order.owner_pubkey, hex::encode(BUYER_KEY));
    assert_eq!(order.md5.as_deref(), Some(BUY_MD5));
    assert_eq!(order.block_height, 4);
    assert_eq!(order.token_txid, None);
    // the commit carries no token state
    assert!(market
        .indexer
        .store
        .get_tx(&commit.compute_txid().to_string())?
        .is_none());
    Ok(())
}

#[tokio::test]
async fn test_buy_commit_for_another_contract_is_ignored() -> Result<()> {
    let market = Market::new();
    let (parent, commit) = buy_order(&market.deploy, "buy parent", "some-other-md5");
    let market = market.add_block(vec![parent.clone(), commit]);
    market.sync().await?;
    assert!(market.order(&parent, 1)?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_partial_fill_reopens_the_remainder_once() -> Result<()> {
    let market = Market::new();
    let (parent, commit) = buy_order(&market.deploy, "buy parent", BUY_MD5);
    let market = market.add_block(vec![parent.clone(), commit]);
    let taker = take(
        &market,
        outpoint(&parent, 1),
        40,
        vec![
            p2tr_script([0x03; 32]),
            p2tr_script([0x04; 32]),
            p2tr_script([0x05; 32]),
            p2tr_script(TAKER_KEY),
        ],
    );
    let market = market.add_block(vec![taker.clone()]).add_block(vec![]);
    market.sync().await?;

    let order = market.order(&parent, 1)?.unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.fill_amount, Some(40));
    assert_eq!(order.taker_pubkey, Some(hex::encode(TAKER_KEY)));
    assert_eq!(order.spend_txid, Some(taker.compute_txid().to_string()));
    assert_eq!(order.spend_input_index, Some(0));
    assert_eq!(order.spend_block_height, Some(5));

    let remainder = market.order(&taker, 3)?.expect("remainder order");
    assert_eq!(remainder.status, OrderStatus::PartiallyOpen);
    assert_eq!(remainder.token_amount, Some(60));
    assert_eq!(remainder.genesis_txid, Some(parent.compute_txid().to_string()));
    assert_eq!(remainder.genesis_output_index, Some(1));
    assert_eq!(remainder.owner_pubkey, order.owner_pubkey);
    assert_eq!(remainder.price, PRICE);
    assert_eq!(remainder.block_height, 5);

    // the empty block after it did not open a second remainder
    let taker_orders = market
        .indexer
        .store
        .orders_with_status(OrderStatus::PartiallyOpen)?;
    assert_eq!(taker_orders.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_fill_with_service_fee_completes_the_order() -> Result<()> {
    let market = Market::new();
    let (parent, commit) = buy_order(&market.deploy, "buy parent", BUY_MD5);
    let market = market.add_block(vec![parent.clone(), commit]);
    let taker = take(
        &market,
        outpoint(&parent, 1),
        100,
        vec![
            p2tr_script([0x03; 32]),
            service_fee_script(),
            p2tr_script([0x05; 32]),
            p2tr_script(TAKER_KEY),
        ],
    );
    let market = market.add_block(vec![taker.clone()]);
    market.sync().await?;

    let order = market.order(&parent, 1)?.unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.fill_amount, Some(100));
    assert!(market.order(&taker, 3)?.is_none());

    let payout = market
        .indexer
        .store
        .get_tx_out(&taker.compute_txid().to_string(), 4)?
        .expect("payout output");
    assert_eq!(payout.locking_script, hex::encode(p2tr_script([0x05; 32]).as_bytes()));
    assert_eq!(payout.token_amount, None);
    Ok(())
}

#[tokio::test]
async fn test_spend_without_guard_cancels_the_order() -> Result<()> {
    let market = Market::new();
    let (parent, commit) = buy_order(&market.deploy, "buy parent", BUY_MD5);
    let market = market.add_block(vec![parent.clone(), commit]);
    let cancel = TxBuilder::new()
        .fee_input(outpoint(&parent, 1))
        .marker(STATE_ROOT)
        .output(p2tr_script(BUYER_KEY), 9_000)
        .build();
    let market = market.add_block(vec![cancel.clone()]);
    market.sync().await?;

    let order = market.order(&parent, 1)?.unwrap();
    assert_eq!(order.status, OrderStatus::Canceled);
    assert_eq!(order.spend_txid, Some(cancel.compute_txid().to_string()));
    assert_eq!(order.taker_pubkey, None);
    Ok(())
}

/// Sell commit with the contract at output 2 and the price as its locktime, and the
/// transfer that moves Alice's tokens into it
fn sell_order(market: &Market, price: u32) -> (Transaction, Transaction) {
    let token_script = market.deploy.token.script_pubkey();
    let seller = p2tr_script(SELLER_KEY);
    let contract = sell_artifact()
        .locking_script(&[
            ScriptArg::Bytes(token_script.to_bytes()),
            ScriptArg::Bytes(seller.to_bytes()),
            ScriptArg::Bytes(hash160(&SELLER_KEY).to_vec()),
            ScriptArg::Int(price as i64),
            ScriptArg::Bool(false),
        ])
        .unwrap();
    let parent = TxBuilder::new()
        .lock_time(price)
        .fee_input(funding_outpoint("sell parent"))
        .output(p2tr_script([0x01; 32]), 546)
        .output(p2tr_script([0x02; 32]), 546)
        .output(contract, 546)
        .build();

    let mut sell_guard = vec![Vec::new(); 41];
    sell_guard.push(hex::decode(SELL_GUARD_WITNESS_SCRIPT).unwrap());
    sell_guard.push(vec![0x01]);
    let finalize = TxBuilder::new()
        .lock_time(2500)
        .input(outpoint(&parent, 2), Witness::from_slice(&sell_guard))
        .spend(outpoint(&market.mint, 2), &market.deploy.token, state_hash_items())
        .spend(
            funding_outpoint("guard deploy"),
            &guard(),
            tx_builder::guard_items(&[([0xcc; 20], 500)]),
        )
        .marker(STATE_ROOT)
        .contract_output(&market.deploy.token)
        .output(p2tr_script([0x03; 32]), 546)
        .output(seller, 546)
        .build();
    (parent, finalize)
}

#[tokio::test]
async fn test_sell_finalization_opens_an_order() -> Result<()> {
    let market = Market::new();
    let (parent, finalize) = sell_order(&market, 1500);
    let market = market.add_block(vec![parent.clone()]).add_block(vec![finalize.clone()]);
    market.sync().await?;

    let order = market.order(&parent, 2)?.expect("sell order row");
    assert_eq!(order.status, OrderStatus::Open);
    assert_eq!(order.token_pubkey, market.deploy.token.key_hex());
    assert_eq!(order.token_txid, Some(finalize.compute_txid().to_string()));
    assert_eq!(order.token_output_index, Some(1));
    assert_eq!(order.token_amount, Some(500));
    assert_eq!(order.owner_pubkey, hex::encode(SELLER_KEY));
    assert_eq!(order.price, 1500);
    assert_eq!(order.md5.as_deref(), Some(SELL_MD5));

    // the finalization is still an ordinary transfer
    let token_out = market
        .indexer
        .store
        .get_tx_out(&finalize.compute_txid().to_string(), 1)?
        .unwrap();
    assert_eq!(token_out.token_amount, Some(500));
    Ok(())
}

#[tokio::test]
async fn test_sell_partial_fill_reopens_at_output_two() -> Result<()> {
    let market = Market::new();
    let (parent, finalize) = sell_order(&market, 1500);
    let market = market.add_block(vec![parent.clone()]).add_block(vec![finalize.clone()]);

    let taker = TxBuilder::new()
        .fee_input(outpoint(&parent, 2))
        .spend(outpoint(&finalize, 1), &market.deploy.token, state_hash_items())
        .spend(
            funding_outpoint("guard deploy"),
            &guard(),
            tx_builder::guard_items(&[([0xdd; 20], 200)]),
        )
        .marker(STATE_ROOT)
        .contract_output(&market.deploy.token)
        .output(p2tr_script([0x03; 32]), 546)
        .output(p2tr_script([0x04; 32]), 546)
        .output(p2tr_script([0x05; 32]), 546)
        .output(p2tr_script(TAKER_KEY), 546)
        .build();
    let market = market.add_block(vec![taker.clone()]);
    market.sync().await?;

    let order = market.order(&parent, 2)?.unwrap();
    assert_eq!(order.status, OrderStatus::PartiallyFilled);
    assert_eq!(order.fill_amount, Some(200));

    let remainder = market.order(&taker, 2)?.expect("sell remainder");
    assert_eq!(remainder.status, OrderStatus::PartiallyOpen);
    assert_eq!(remainder.token_amount, Some(300));
    assert_eq!(remainder.md5.as_deref(), Some(SELL_MD5));
    assert_eq!(remainder.genesis_txid, Some(parent.compute_txid().to_string()));
    assert_eq!(remainder.genesis_output_index, Some(2));
    Ok(())
}

#[tokio::test]
async fn test_orders_are_not_tracked_without_artifacts() -> Result<()> {
    let mut params = protocol_params();
    params.buy_contract = None;
    params.sell_contract = None;
    let market = Market {
        indexer: TestIndexer::with_params(params),
        ..Market::new()
    };
    let (parent, commit) = buy_order(&market.deploy, "buy parent", BUY_MD5);
    let market = market.add_block(vec![parent.clone(), commit]);
    market.sync().await?;
    assert!(market.order(&parent, 1)?.is_none());
    Ok(())
}

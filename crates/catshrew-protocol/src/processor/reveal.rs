use catshrew_runtime::{KeyValueStoreLike, TokenInfoRow, WriteUnit};
use catshrew_sync::ChainSource;

use super::{state_hashes, CatProcessor, TxContext};
use crate::constants::COMMIT_INPUT_WITNESS_MIN_SIZE;
use crate::envelope::{parse_token_info, TokenMetadata};
use crate::error::{CatTxError, ProcessResult};
use crate::taproot::{TaprootInput, XOnlyKey};

/// The single input whose redeem script carries a token info envelope
pub(crate) fn search_commit_input(
    pay_ins: &[Option<TaprootInput>],
) -> Result<(usize, TokenMetadata), CatTxError> {
    let mut commit = None;
    for (index, input) in pay_ins.iter().enumerate() {
        let Some(input) = input else {
            continue;
        };
        if input.witness.len() < COMMIT_INPUT_WITNESS_MIN_SIZE {
            continue;
        }
        if let Some(info) = parse_token_info(&input.redeem_script) {
            if commit.is_some() {
                return Err(CatTxError::MultipleCommitInputs);
            }
            commit = Some((index, info));
        }
    }
    commit.ok_or(CatTxError::MissingCommitInput)
}

/// Minter key of a reveal: output 1, repeated by every later output
pub(crate) fn search_minter_outputs(pay_outs: &[Option<XOnlyKey>]) -> Result<XOnlyKey, CatTxError> {
    let minter = pay_outs
        .get(1)
        .copied()
        .flatten()
        .ok_or(CatTxError::MissingMinterOutput)?;
    if pay_outs[2..].iter().any(|key| *key != Some(minter)) {
        return Err(CatTxError::ForeignRevealOutput);
    }
    Ok(minter)
}

impl<N, S> CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    pub(super) fn process_reveal(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
    ) -> ProcessResult<Vec<Vec<u8>>> {
        let (commit_index, info) = search_commit_input(&ctx.pay_ins)?;
        let Some(commit) = ctx.pay_ins[commit_index].as_ref() else {
            return Err(CatTxError::MissingCommitInput.into());
        };
        let genesis = ctx.tx.input[commit_index].previous_output;
        let genesis_txid = genesis.txid.to_string();
        let token_id = format!("{}_{}", genesis_txid, genesis.vout);

        let hashes = state_hashes(commit)?;
        let minter = search_minter_outputs(&ctx.pay_outs)?;

        unit.put_token(&TokenInfoRow {
            token_id,
            reveal_txid: ctx.txid.clone(),
            reveal_height: ctx.header.height,
            genesis_txid,
            name: info.name,
            symbol: info.symbol,
            decimals: info.decimals,
            raw_info: info.raw,
            minter_pubkey: hex::encode(minter),
            token_pubkey: None,
            first_mint_height: None,
        })?;

        for (index, key) in ctx.pay_outs.iter().enumerate() {
            if key.is_some() {
                unit.put_tx_out(&ctx.base_tx_out(index))?;
            }
        }
        Ok(hashes)
    }
}

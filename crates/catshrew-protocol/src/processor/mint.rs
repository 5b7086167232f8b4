use catshrew_runtime::{KeyValueStoreLike, TokenInfoRow, TokenMintRow, WriteUnit};
use catshrew_sync::{BlockHeader, ChainSource};

use super::{state_hashes, CatProcessor, TxContext};
use crate::constants::*;
use crate::error::{CatTxError, ProcessResult};
use crate::params::ProtocolParams;
use crate::taproot::{hash160, read_int_le, TaprootInput, XOnlyKey};

/// Locate the token output of a mint.
///
/// Outputs from index 1 must be minter outputs up to the first token output, which has to
/// match the token key fixed by earlier mints. After it, minter outputs are not allowed
/// again and single-output minters forbid a second token output.
pub(crate) fn search_mint_token_output(
    pay_outs: &[Option<XOnlyKey>],
    token: &TokenInfoRow,
    params: &ProtocolParams,
) -> Result<(String, usize), CatTxError> {
    let mut found: Option<(String, usize)> = None;
    for (index, key) in pay_outs.iter().enumerate().skip(1) {
        let key = key.map(hex::encode);
        if let Some((token_pubkey, _)) = &found {
            let Some(key) = key else {
                continue;
            };
            if key == token.minter_pubkey {
                return Err(CatTxError::NonConsecutiveMinterOutputs);
            }
            if key == *token_pubkey && params.is_single_output_minter(token.minter_md5()) {
                return Err(CatTxError::MultipleTokenOutputs);
            }
            continue;
        }
        let key = key.ok_or(CatTxError::InvalidMintOutputs)?;
        if key == token.minter_pubkey {
            continue;
        }
        if matches!(&token.token_pubkey, Some(fixed) if *fixed != key) {
            return Err(CatTxError::DivergentTokenPubKey);
        }
        found = Some((key, index));
    }
    found.ok_or(CatTxError::MissingTokenOutput)
}

fn mint_amount(witness: &[u8]) -> Result<i64, CatTxError> {
    if witness.is_empty() || witness.len() > TOKEN_AMOUNT_MAX_BYTES {
        return Err(CatTxError::BadAmountLength("mint"));
    }
    let amount = read_int_le(witness).ok_or(CatTxError::BadAmountLength("mint"))?;
    if amount <= 0 {
        return Err(CatTxError::NonPositiveAmount);
    }
    Ok(amount)
}

impl<N, S> CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    /// Token info of the minter at `minter_pubkey`.
    ///
    /// Only tokens whose key is fixed and whose reveal is settled are cached, so a cached row
    /// never changes until a retraction clears the cache.
    pub(super) fn token_info(
        &self,
        unit: &WriteUnit<S>,
        minter_pubkey: &str,
        header: &BlockHeader,
    ) -> ProcessResult<Option<TokenInfoRow>> {
        if let Some(token) = self.caches.token(minter_pubkey) {
            return Ok(Some(token));
        }
        let token = unit.get_token_by_minter(minter_pubkey)?;
        if let Some(token) = &token {
            let last_processed = header.height.saturating_sub(1);
            if token.token_pubkey.is_some()
                && last_processed.saturating_sub(token.reveal_height)
                    >= TOKEN_INFO_CACHE_BLOCKS_THRESHOLD
            {
                self.caches.insert_token(token.clone());
            }
        }
        Ok(token)
    }

    /// The one input spending a known minter, if any
    pub(super) fn search_minter_input<'c>(
        &self,
        unit: &WriteUnit<S>,
        ctx: &'c TxContext<'_>,
    ) -> ProcessResult<Option<(&'c TaprootInput, TokenInfoRow)>> {
        let mut minter = None;
        for input in ctx.pay_ins.iter().flatten() {
            let Some(token) = self.token_info(unit, &hex::encode(input.pubkey), ctx.header)? else {
                continue;
            };
            if minter.is_some() {
                return Err(CatTxError::MultipleMinterInputs.into());
            }
            minter = Some((input, token));
        }
        Ok(minter)
    }

    pub(super) fn process_mint(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        minter: &TaprootInput,
        token: TokenInfoRow,
    ) -> ProcessResult<Vec<Vec<u8>>> {
        if minter.witness.len() < MINTER_INPUT_WITNESS_MIN_SIZE {
            return Err(CatTxError::ShortWitness("mint").into());
        }
        let hashes = state_hashes(minter)?;

        let owner = &minter.witness[MINTER_INPUT_WITNESS_ADDR_OFFSET];
        if owner.len() != PUBKEY_HASH_BYTES {
            return Err(CatTxError::BadOwnerHashLength.into());
        }
        let owner = hex::encode(owner);
        let amount = mint_amount(&minter.witness[MINTER_INPUT_WITNESS_AMOUNT_OFFSET])?;

        let (token_pubkey, token_index) =
            search_mint_token_output(&ctx.pay_outs, &token, &self.params)?;
        let is_fxp = self.params.is_fxp_minter(token.minter_md5());
        let bonus_owner = if is_fxp && ctx.pay_outs.get(token_index + 1).copied().flatten().is_some() {
            let claimer = minter
                .item(FXP_WITNESS_INDEX)
                .ok_or(CatTxError::MissingBonusOwner)?;
            Some(hex::encode(hash160(claimer)))
        } else {
            None
        };

        let height = ctx.header.height;
        if token.token_pubkey.is_none() {
            let mut first = token;
            first.token_pubkey = Some(token_pubkey.clone());
            first.first_mint_height = Some(height);
            unit.put_token(&first)?;
        }

        unit.put_mint(&TokenMintRow {
            txid: ctx.txid.clone(),
            token_pubkey,
            owner_pubkey_hash: owner.clone(),
            token_amount: if is_fxp { amount * 2 } else { amount },
            block_height: height,
        })?;

        for (index, key) in ctx.pay_outs.iter().enumerate() {
            if key.is_none() {
                continue;
            }
            let mut row = ctx.base_tx_out(index);
            if index == token_index {
                row.owner_pubkey_hash = Some(owner.clone());
                row.token_amount = Some(amount);
            } else if index == token_index + 1 && bonus_owner.is_some() {
                row.owner_pubkey_hash = bonus_owner.clone();
                row.token_amount = Some(amount);
            } else if index > token_index {
                continue;
            }
            unit.put_tx_out(&row)?;
        }
        Ok(hashes)
    }
}

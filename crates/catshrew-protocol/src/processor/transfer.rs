use catshrew_runtime::{KeyValueStoreLike, WriteUnit};
use catshrew_sync::ChainSource;
use std::collections::BTreeMap;

use super::{state_hashes, CatProcessor, TxContext};
use crate::constants::*;
use crate::error::{CatTxError, ProcessResult};
use crate::taproot::{hash160, read_int_le, TaprootInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOutput {
    pub owner_pubkey_hash: String,
    pub amount: i64,
}

/// Token outputs declared by a guard input, keyed by output index.
///
/// The guard witness carries five owner hashes, five amounts and five masks; a non-empty
/// mask at slot `i` declares a token output at index `i + 1`.
pub fn parse_token_outputs(guard: &TaprootInput) -> Result<BTreeMap<u32, TokenOutput>, CatTxError> {
    if guard.witness.len() < GUARD_INPUT_WITNESS_MIN_SIZE {
        return Err(CatTxError::ShortWitness("transfer"));
    }
    let item = |offset: usize, slot: usize| guard.witness[offset + slot].as_slice();

    let mut outputs = BTreeMap::new();
    for slot in 0..CONTRACT_OUTPUT_MAX_COUNT {
        if item(TRANSFER_GUARD_MASK_OFFSET, slot).is_empty() {
            continue;
        }
        let amount = read_int_le(item(TRANSFER_GUARD_AMOUNT_OFFSET, slot))
            .ok_or(CatTxError::BadAmountLength("transfer"))?;
        outputs.insert(
            slot as u32 + 1,
            TokenOutput {
                owner_pubkey_hash: hex::encode(item(TRANSFER_GUARD_ADDR_OFFSET, slot)),
                amount,
            },
        );
    }
    Ok(outputs)
}

impl<N, S> CatProcessor<N, S>
where
    N: ChainSource,
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    pub(super) async fn process_transfer(
        &self,
        unit: &mut WriteUnit<S>,
        ctx: &TxContext<'_>,
        guard: &TaprootInput,
    ) -> ProcessResult<Vec<Vec<u8>>> {
        if guard.witness.len() < GUARD_INPUT_WITNESS_MIN_SIZE {
            return Err(CatTxError::ShortWitness("transfer").into());
        }
        let hashes = state_hashes(guard)?;

        if hash160(guard.redeem_script.as_bytes()) != self.params.transfer_guard_script_hash {
            return Ok(hashes);
        }

        let mut tokens = Vec::new();
        for (index, output) in parse_token_outputs(guard)? {
            if ctx.pay_outs.get(index as usize).copied().flatten().is_none() {
                return Err(CatTxError::TokenSlotNotTaproot(index).into());
            }
            let mut row = ctx.base_tx_out(index as usize);
            row.owner_pubkey_hash = Some(output.owner_pubkey_hash);
            row.token_amount = Some(output.amount);
            unit.put_tx_out(&row)?;
            tokens.push(row);
        }

        let locktime = ctx.tx.lock_time.to_consensus_u32();
        if (SELL_ORDER_LOCKTIME_MIN..=SELL_ORDER_LOCKTIME_MAX).contains(&locktime) {
            self.tag_sell_order(unit, ctx, &tokens).await?;
        }
        Ok(hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;

    fn guard(witness: Vec<Vec<u8>>) -> TaprootInput {
        TaprootInput {
            pubkey: [0; 32],
            redeem_script: ScriptBuf::new(),
            witness,
        }
    }

    fn guard_witness(slots: &[(usize, u8, Vec<u8>)]) -> Vec<Vec<u8>> {
        let mut witness = vec![Vec::new(); GUARD_INPUT_WITNESS_MIN_SIZE + 2];
        for (slot, owner, amount) in slots {
            witness[TRANSFER_GUARD_ADDR_OFFSET + slot] = vec![*owner; 20];
            witness[TRANSFER_GUARD_AMOUNT_OFFSET + slot] = amount.clone();
            witness[TRANSFER_GUARD_MASK_OFFSET + slot] = vec![1];
        }
        witness
    }

    #[test]
    fn masks_select_output_slots() {
        let outputs = parse_token_outputs(&guard(guard_witness(&[
            (0, 0xaa, vec![0x10, 0x27]),
            (2, 0xbb, vec![0x05]),
        ])))
        .unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[&1].amount, 10_000);
        assert_eq!(outputs[&1].owner_pubkey_hash, "aa".repeat(20));
        assert_eq!(outputs[&3].amount, 5);
        assert!(!outputs.contains_key(&2));
    }

    #[test]
    fn malformed_guard_witnesses_are_rejected() {
        assert_eq!(
            parse_token_outputs(&guard(vec![vec![]; 10])),
            Err(CatTxError::ShortWitness("transfer"))
        );
        assert_eq!(
            parse_token_outputs(&guard(guard_witness(&[(1, 0xaa, vec![])]))),
            Err(CatTxError::BadAmountLength("transfer"))
        );
        assert_eq!(
            parse_token_outputs(&guard(guard_witness(&[(1, 0xaa, vec![1; 7])]))),
            Err(CatTxError::BadAmountLength("transfer"))
        );
    }
}

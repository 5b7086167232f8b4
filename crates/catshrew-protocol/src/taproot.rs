//! Taproot output and script-path input parsing

use anyhow::{anyhow, Result};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::key::TapTweak;
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::taproot::{ControlBlock, TapLeafHash, TapNodeHash, TAPROOT_ANNEX_PREFIX};
use bitcoin::{Script, ScriptBuf, TxIn};
use lru_mem::HeapSize;

use crate::constants::*;

pub type XOnlyKey = [u8; 32];

pub fn hash160(data: &[u8]) -> [u8; 20] {
    hash160::Hash::hash(data).to_byte_array()
}

/// Key of a 34-byte `OP_1 <32 bytes>` output script
pub fn parse_taproot_output(script: &Script) -> Option<XOnlyKey> {
    let bytes = script.as_bytes();
    if bytes.len() != TAPROOT_LOCKING_SCRIPT_LENGTH || bytes[..2] != TAPROOT_PREFIX {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[2..]);
    Some(key)
}

/// Script-path spend of a Taproot output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaprootInput {
    /// Output key of the spent output, recomputed from the control block
    pub pubkey: XOnlyKey,
    pub redeem_script: ScriptBuf,
    /// Full witness stack, annex included
    pub witness: Vec<Vec<u8>>,
}

impl TaprootInput {
    pub fn item(&self, index: usize) -> Option<&[u8]> {
        self.witness.get(index).map(|item| item.as_slice())
    }
}

/// Witness-independent part of a parsed input, shared by every spend of the same leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafSpend {
    pub pubkey: XOnlyKey,
    pub redeem_script: ScriptBuf,
}

impl HeapSize for LeafSpend {
    fn heap_size(&self) -> usize {
        self.redeem_script.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LeafKey(pub [u8; 20]);

impl HeapSize for LeafKey {
    fn heap_size(&self) -> usize {
        0
    }
}

/// Redeem script and control block of a script-path witness, annex dropped
pub fn script_path_items(input: &TxIn) -> Option<(&[u8], &[u8])> {
    let witness = &input.witness;
    let mut len = witness.len();
    if len >= 2 {
        if let Some(last) = witness.last() {
            if last.first() == Some(&TAPROOT_ANNEX_PREFIX) {
                len -= 1;
            }
        }
    }
    if len < 2 {
        return None;
    }
    Some((witness.nth(len - 2)?, witness.nth(len - 1)?))
}

/// `hash160(hash160(script) || hash160(control block))`
pub fn leaf_key(script: &[u8], control_block: &[u8]) -> LeafKey {
    let mut preimage = Vec::with_capacity(40);
    preimage.extend_from_slice(&hash160(script));
    preimage.extend_from_slice(&hash160(control_block));
    LeafKey(hash160(&preimage))
}

/// Output key committed to by `script` under `control_block`
pub fn compute_leaf_spend<C: Verification>(
    secp: &Secp256k1<C>,
    script: &[u8],
    control_block: &[u8],
) -> Result<LeafSpend> {
    let control = ControlBlock::decode(control_block)
        .map_err(|e| anyhow!("invalid control block: {}", e))?;
    let redeem_script = ScriptBuf::from_bytes(script.to_vec());
    let leaf = TapLeafHash::from_script(&redeem_script, control.leaf_version);
    let mut node = TapNodeHash::from(leaf);
    for sibling in control.merkle_branch.as_slice() {
        node = TapNodeHash::from_node_hashes(node, *sibling);
    }
    let (output_key, _parity) = control.internal_key.tap_tweak(secp, Some(node));
    Ok(LeafSpend {
        pubkey: output_key.to_inner().serialize(),
        redeem_script,
    })
}

/// Signed little-endian integer of at most [`INT_LE_MAX_BYTES`] bytes
pub fn read_int_le(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > INT_LE_MAX_BYTES {
        return None;
    }
    let mut value: i64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        value |= (*byte as i64) << (8 * i);
    }
    // sign-extend from the top bit of the last byte
    let bits = 8 * bytes.len();
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        value |= -1i64 << bits;
    }
    Some(value)
}

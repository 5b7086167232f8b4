//! Wire constants of the CAT20 protocol and its orderbook contracts

pub const TAPROOT_LOCKING_SCRIPT_LENGTH: usize = 34;
pub const TAPROOT_PREFIX: [u8; 2] = [0x51, 0x20];

/// `OP_RETURN OP_PUSHBYTES_24 "cat" <version 1>`
pub const CAT_MARKER_PREFIX: [u8; 6] = [0x6a, 0x18, 0x63, 0x61, 0x74, 0x01];
pub const STATE_ROOT_HASH_OFFSET: usize = 6;
pub const STATE_ROOT_HASH_BYTES: usize = 20;

pub const CONTRACT_OUTPUT_MAX_COUNT: usize = 5;
pub const STATE_HASH_BYTES: usize = 20;
pub const PUBKEY_HASH_BYTES: usize = 20;

pub const CONTRACT_INPUT_WITNESS_STATE_HASHES_OFFSET: usize = 0;
pub const COMMIT_INPUT_WITNESS_MIN_SIZE: usize = 5;

pub const MINTER_INPUT_WITNESS_MIN_SIZE: usize = 8;
pub const MINTER_INPUT_WITNESS_ADDR_OFFSET: usize = 6;
pub const MINTER_INPUT_WITNESS_AMOUNT_OFFSET: usize = 7;
pub const TOKEN_AMOUNT_MAX_BYTES: usize = 4;
/// Widest little-endian integer a witness field may carry
pub const INT_LE_MAX_BYTES: usize = 6;

pub const GUARD_INPUT_WITNESS_MIN_SIZE: usize = 21;
pub const TRANSFER_GUARD_ADDR_OFFSET: usize = 6;
pub const TRANSFER_GUARD_AMOUNT_OFFSET: usize = 11;
pub const TRANSFER_GUARD_MASK_OFFSET: usize = 16;

/// Witness slot holding the reward claimer's key on FXP minters, and the sell guard's
/// script on sell finalizations
pub const FXP_WITNESS_INDEX: usize = 41;

pub const SELL_GUARD_WITNESS_SCRIPT: &str =
    "512052f5ec24681512889f765a3313b746a0e92b01df3f4e48404236906a1ff462fe";

pub const SERVICE_FEE_SCRIPT: &str =
    "512067fe8e4767ab1a9056b1e7c6166d690e641d3f40e188241f35f803b1f84546c2";

pub const BUY_ORDER_LOCKTIME: u32 = 21380;
pub const SELL_ORDER_LOCKTIME_MIN: u32 = 2138;
pub const SELL_ORDER_LOCKTIME_MAX: u32 = 2138 + 1000;

/// Push at instruction 3 of a buy-order commit script
pub const BUY_ORDER_TAG: &[u8] = b"order";

/// Token info is cached once its reveal is this many blocks behind the last processed block
pub const TOKEN_INFO_CACHE_BLOCKS_THRESHOLD: u32 = 3;

/// Unspendable internal key every contract output commits its script under
pub const NUMS_INTERNAL_KEY: &str =
    "50929b74c1a04954b78b4b6035e97a5e078a5a0f28ec96d547bfee9ace803ac0";

pub const DEFAULT_CACHE_MEMORY_BYTES: usize = 64 * 1024 * 1024;

/// Output index a partially filled order's remainder lands on
pub const BUY_REMAINDER_OUTPUT_INDEX: u32 = 3;
pub const SELL_REMAINDER_OUTPUT_INDEX: u32 = 2;

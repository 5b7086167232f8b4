//! Key layout
//!
//! Primary rows live under a table prefix. Secondary indexes map to the primary key and
//! embed zero-padded heights so that a prefix scan starting at a height visits exactly the
//! rows at or above it, in height order.

pub const TIP: &str = "tip";

pub const BLOCK: &str = "blk/";
pub const BLOCK_HASH: &str = "blkh/";
pub const TX: &str = "tx/";
pub const TX_BY_HEIGHT: &str = "tx@/";
pub const OUT: &str = "out/";
pub const OUT_BY_HEIGHT: &str = "out@/";
pub const OUT_BY_SPEND: &str = "outs/";
pub const OUT_ARCHIVE: &str = "outa/";
pub const OUT_ARCHIVE_BY_SPEND: &str = "outsa/";
pub const TOKEN: &str = "tok/";
pub const TOKEN_BY_MINTER: &str = "tokm/";
pub const TOKEN_BY_REVEAL: &str = "tokr/";
pub const TOKEN_BY_FIRST_MINT: &str = "tokf/";
pub const TOKEN_BY_GENESIS: &str = "tokg/";
pub const MINT: &str = "mint/";
pub const ORDER: &str = "ord/";
pub const ORDER_BY_HEIGHT: &str = "ord@/";
pub const ORDER_BY_SPEND: &str = "ords/";
pub const ORDER_BY_STATUS: &str = "ord#/";

/// Scan start for `prefix` at `height`
pub fn from_height(prefix: &str, height: u32) -> String {
    format!("{}{:010}", prefix, height)
}

/// Scan end bound (exclusive) is expressed through the prefix; this parses the height
/// back out of an index key.
pub fn height_of(prefix: &str, key: &[u8]) -> Option<u32> {
    let key = std::str::from_utf8(key).ok()?;
    key.strip_prefix(prefix)?.get(..10)?.parse().ok()
}

pub fn block(height: u32) -> String {
    format!("{}{:010}", BLOCK, height)
}

pub fn block_hash(hash: &str) -> String {
    format!("{}{}", BLOCK_HASH, hash)
}

pub fn tx(txid: &str) -> String {
    format!("{}{}", TX, txid)
}

pub fn tx_by_height(height: u32, txid: &str) -> String {
    format!("{}{:010}/{}", TX_BY_HEIGHT, height, txid)
}

pub fn out(txid: &str, vout: u32) -> String {
    format!("{}{}/{:010}", OUT, txid, vout)
}

pub fn out_by_height(height: u32, txid: &str, vout: u32) -> String {
    format!("{}{:010}/{}/{:010}", OUT_BY_HEIGHT, height, txid, vout)
}

pub fn out_by_spend(height: u32, spend_txid: &str, vin: u32) -> String {
    format!("{}{:010}/{}/{:010}", OUT_BY_SPEND, height, spend_txid, vin)
}

pub fn out_archive(txid: &str, vout: u32) -> String {
    format!("{}{}/{:010}", OUT_ARCHIVE, txid, vout)
}

pub fn out_archive_by_spend(height: u32, spend_txid: &str, vin: u32) -> String {
    format!("{}{:010}/{}/{:010}", OUT_ARCHIVE_BY_SPEND, height, spend_txid, vin)
}

/// Archive counterpart of a live `out/` key
pub fn archived(out_key: &str) -> Option<String> {
    out_key
        .strip_prefix(OUT)
        .map(|rest| format!("{}{}", OUT_ARCHIVE, rest))
}

pub fn token(token_id: &str) -> String {
    format!("{}{}", TOKEN, token_id)
}

pub fn token_by_minter(minter_pubkey: &str) -> String {
    format!("{}{}", TOKEN_BY_MINTER, minter_pubkey)
}

pub fn token_by_reveal(height: u32, token_id: &str) -> String {
    format!("{}{:010}/{}", TOKEN_BY_REVEAL, height, token_id)
}

pub fn token_by_first_mint(height: u32, token_id: &str) -> String {
    format!("{}{:010}/{}", TOKEN_BY_FIRST_MINT, height, token_id)
}

pub fn token_by_genesis(genesis_txid: &str, token_id: &str) -> String {
    format!("{}{}/{}", TOKEN_BY_GENESIS, genesis_txid, token_id)
}

pub fn token_by_genesis_prefix(genesis_txid: &str) -> String {
    format!("{}{}/", TOKEN_BY_GENESIS, genesis_txid)
}

pub fn mint(height: u32, txid: &str) -> String {
    format!("{}{:010}/{}", MINT, height, txid)
}

pub fn order(txid: &str, vout: u32) -> String {
    format!("{}{}/{:010}", ORDER, txid, vout)
}

pub fn order_txid_prefix(txid: &str) -> String {
    format!("{}{}/", ORDER, txid)
}

pub fn order_by_height(height: u32, txid: &str, vout: u32) -> String {
    format!("{}{:010}/{}/{:010}", ORDER_BY_HEIGHT, height, txid, vout)
}

pub fn order_by_spend(height: u32, spend_txid: &str, vin: u32) -> String {
    format!("{}{:010}/{}/{:010}", ORDER_BY_SPEND, height, spend_txid, vin)
}

pub fn order_by_status(status: &str, txid: &str, vout: u32) -> String {
    format!("{}{}/{}/{:010}", ORDER_BY_STATUS, status, txid, vout)
}

pub fn order_status_prefix(status: &str) -> String {
    format!("{}{}/", ORDER_BY_STATUS, status)
}

//! Rows of the derived protocol state
//!
//! Every row is stored as JSON under the keys described in [`crate::keys`].

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub height: u32,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub time: u32,
}

/// One classified protocol transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxRow {
    pub txid: String,
    pub block_height: u32,
    pub tx_index: u32,
    /// Root hash followed by one state hash per contract output slot, hex encoded
    pub state_hashes: Vec<String>,
}

impl TxRow {
    /// `;`-joined form of [`TxRow::state_hashes`]
    pub fn joined_state_hashes(&self) -> String {
        self.state_hashes.join(";")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxOutRow {
    pub txid: String,
    pub output_index: u32,
    pub block_height: u32,
    pub satoshis: u64,
    pub locking_script: String,
    pub x_only_pubkey: Option<String>,
    pub owner_pubkey_hash: Option<String>,
    pub token_amount: Option<i64>,
    pub spend_txid: Option<String>,
    pub spend_input_index: Option<u32>,
}

impl TxOutRow {
    pub fn is_spent(&self) -> bool {
        self.spend_txid.is_some()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TokenInfoRow {
    /// `{genesis txid}_{genesis output index}`
    pub token_id: String,
    pub reveal_txid: String,
    pub reveal_height: u32,
    pub genesis_txid: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub raw_info: serde_json::Value,
    pub minter_pubkey: String,
    pub token_pubkey: Option<String>,
    pub first_mint_height: Option<u32>,
}

impl TokenInfoRow {
    /// Artifact md5 of the minter contract, as declared in the token metadata
    pub fn minter_md5(&self) -> Option<&str> {
        self.raw_info.get("minterMd5").and_then(|v| v.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenMintRow {
    pub txid: String,
    pub token_pubkey: String,
    pub owner_pubkey_hash: String,
    pub token_amount: i64,
    pub block_height: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyOpen,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyOpen => "partially_open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenOrderRow {
    pub txid: String,
    pub output_index: u32,
    pub token_pubkey: String,
    pub token_txid: Option<String>,
    pub token_output_index: Option<u32>,
    pub token_amount: Option<i64>,
    pub genesis_txid: Option<String>,
    pub genesis_output_index: Option<u32>,
    pub owner_pubkey: String,
    pub price: i64,
    pub block_height: u32,
    pub created_at: u32,
    pub spend_txid: Option<String>,
    pub spend_input_index: Option<u32>,
    pub spend_block_height: Option<u32>,
    pub spend_created_at: Option<u32>,
    pub taker_pubkey: Option<String>,
    pub status: OrderStatus,
    pub fill_amount: Option<i64>,
    pub md5: Option<String>,
}

impl TokenOrderRow {
    /// Status an order returns to when the transaction that spent it is retracted
    pub fn unspent_status(&self) -> OrderStatus {
        if self.genesis_txid.is_some() {
            OrderStatus::PartiallyOpen
        } else {
            OrderStatus::Open
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_status_uses_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap();
        assert_eq!(json, "\"partially_filled\"");
        assert_eq!(OrderStatus::PartiallyOpen.to_string(), "partially_open");
    }

    #[test]
    fn minter_md5_reads_raw_info() {
        let info = TokenInfoRow {
            token_id: "aa_0".into(),
            reveal_txid: "bb".into(),
            reveal_height: 10,
            genesis_txid: "aa".into(),
            name: "cat".into(),
            symbol: "CAT".into(),
            decimals: 2,
            raw_info: serde_json::json!({"name": "cat", "minterMd5": "abc"}),
            minter_pubkey: "cc".into(),
            token_pubkey: None,
            first_mint_height: None,
        };
        assert_eq!(info.minter_md5(), Some("abc"));
    }
}

//! Memory-bounded caches owned by a processor instance
//!
//! Both caches sit behind a std `Mutex` that is only held for a single lookup or insert,
//! never across an `.await`.

use catshrew_runtime::TokenInfoRow;
use log::debug;
use lru_mem::{HeapSize, LruCache};
use std::sync::{Mutex, MutexGuard};

use crate::taproot::{LeafKey, LeafSpend};

/// Token info stored in the cache, sized by its variable-length fields
#[derive(Debug, Clone)]
pub struct CachedToken(pub TokenInfoRow);

impl HeapSize for CachedToken {
    fn heap_size(&self) -> usize {
        let row = &self.0;
        row.token_id.len()
            + row.reveal_txid.len()
            + row.genesis_txid.len()
            + row.name.len()
            + row.symbol.len()
            + row.minter_pubkey.len()
            + row.token_pubkey.as_ref().map_or(0, |k| k.len())
            + row.raw_info.to_string().len()
    }
}

pub struct ProcessorCaches {
    leaves: Mutex<LruCache<LeafKey, LeafSpend>>,
    tokens: Mutex<LruCache<String, CachedToken>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // cache contents stay valid even if a holder panicked
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ProcessorCaches {
    pub fn new(memory_bytes: usize) -> Self {
        let leaves_bytes = memory_bytes / 2;
        Self {
            leaves: Mutex::new(LruCache::new(leaves_bytes)),
            tokens: Mutex::new(LruCache::new(memory_bytes - leaves_bytes)),
        }
    }

    pub fn leaf(&self, key: &LeafKey) -> Option<LeafSpend> {
        lock(&self.leaves).get(key).cloned()
    }

    pub fn insert_leaf(&self, key: LeafKey, spend: LeafSpend) {
        if lock(&self.leaves).insert(key, spend).is_err() {
            debug!("leaf spend {} not cached, entry too large", hex::encode(key.0));
        }
    }

    pub fn token(&self, minter_pubkey: &str) -> Option<TokenInfoRow> {
        lock(&self.tokens).get(minter_pubkey).map(|t| t.0.clone())
    }

    pub fn insert_token(&self, row: TokenInfoRow) {
        let minter = row.minter_pubkey.clone();
        if lock(&self.tokens).insert(minter.clone(), CachedToken(row)).is_err() {
            debug!("token info of minter {} not cached, entry too large", minter);
        }
    }

    pub fn clear(&self) {
        lock(&self.leaves).clear();
        lock(&self.tokens).clear();
    }

    pub fn len(&self) -> (usize, usize) {
        (lock(&self.leaves).len(), lock(&self.tokens).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::ScriptBuf;

    fn token(minter: &str) -> TokenInfoRow {
        TokenInfoRow {
            token_id: format!("{}_0", minter),
            reveal_txid: "aa".into(),
            reveal_height: 1,
            genesis_txid: minter.into(),
            name: "cat".into(),
            symbol: "CAT".into(),
            decimals: 2,
            raw_info: serde_json::json!({"name": "cat"}),
            minter_pubkey: minter.into(),
            token_pubkey: Some("bb".into()),
            first_mint_height: Some(2),
        }
    }

    #[test]
    fn caches_are_cleared_together() {
        let caches = ProcessorCaches::new(1 << 20);
        caches.insert_leaf(
            LeafKey([1; 20]),
            LeafSpend {
                pubkey: [2; 32],
                redeem_script: ScriptBuf::from_bytes(vec![0x51]),
            },
        );
        caches.insert_token(token("m1"));
        assert_eq!(caches.len(), (1, 1));
        assert_eq!(caches.token("m1").unwrap().token_id, "m1_0");
        assert_eq!(caches.leaf(&LeafKey([1; 20])).unwrap().pubkey, [2; 32]);

        caches.clear();
        assert_eq!(caches.len(), (0, 0));
        assert!(caches.token("m1").is_none());
    }

    #[test]
    fn oversized_entries_are_skipped() {
        let caches = ProcessorCaches::new(1 << 16);
        let mut big = token("m2");
        big.name = "n".repeat(1 << 20);
        caches.insert_token(big);
        caches.insert_token(token("m3"));
        assert!(caches.token("m2").is_none());
        assert_eq!(caches.token("m3").unwrap().token_id, "m3_0");
    }

    #[test]
    fn memory_budget_evicts_old_tokens() {
        let caches = ProcessorCaches::new(2048);
        for i in 0..64 {
            caches.insert_token(token(&format!("minter{:02}", i)));
        }
        let (_, tokens) = caches.len();
        assert!(tokens < 64);
        assert!(caches.token("minter63").is_some());
    }
}

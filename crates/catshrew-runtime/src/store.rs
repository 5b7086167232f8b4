//! Typed entity store over a [`KeyValueStoreLike`] backend
//!
//! Nothing touches the backend except through a [`WriteUnit`]. A unit buffers its writes in
//! an overlay that its own reads see, and [`WriteUnit::commit`] hands the whole overlay to the
//! backend as one batch. Dropping a unit without committing discards it.

use anyhow::{anyhow, Result};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::entities::*;
use crate::keys;
use crate::traits::{BatchLike, KeyValueStoreLike};

/// Rows retracted by [`WriteUnit::delete_from_height`]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Retraction {
    pub blocks: usize,
    pub txs: usize,
    pub tx_outs: usize,
    pub unspent_outs: usize,
    pub tokens: usize,
    pub mints: usize,
    pub orders: usize,
    pub reopened_orders: usize,
}

#[derive(Clone)]
pub struct IndexStore<S: KeyValueStoreLike + Clone> {
    kv: S,
}

impl<S: KeyValueStoreLike + Clone> IndexStore<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn backend(&self) -> &S {
        &self.kv
    }

    pub fn begin(&self) -> WriteUnit<S> {
        WriteUnit {
            kv: self.kv.clone(),
            pending: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.kv.is_open()
    }

    pub fn last_block(&self) -> Result<Option<BlockRow>> {
        self.begin().last_block()
    }

    pub fn block_exists(&self, hash: &str) -> Result<bool> {
        self.begin().block_exists(hash)
    }

    pub fn get_block(&self, height: u32) -> Result<Option<BlockRow>> {
        self.begin().get_block(height)
    }

    pub fn get_tx(&self, txid: &str) -> Result<Option<TxRow>> {
        self.begin().get_tx(txid)
    }

    pub fn get_tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutRow>> {
        self.begin().get_tx_out(txid, vout)
    }

    pub fn get_archived_tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutRow>> {
        self.begin().get_json(&keys::out_archive(txid, vout))
    }

    pub fn get_token(&self, token_id: &str) -> Result<Option<TokenInfoRow>> {
        self.begin().get_token(token_id)
    }

    pub fn get_order(&self, txid: &str, vout: u32) -> Result<Option<TokenOrderRow>> {
        self.begin().get_order(txid, vout)
    }

    pub fn mints_from(&self, height: u32) -> Result<Vec<TokenMintRow>> {
        self.begin().mints_from(height)
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<TokenOrderRow>> {
        self.begin().orders_with_status(status)
    }

    /// Every entry of every table, for comparing two stores.
    pub fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        Ok(self.kv.scan_prefix(b"")?)
    }
}

/// All-or-nothing write scope
pub struct WriteUnit<S: KeyValueStoreLike + Clone> {
    kv: S,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<S: KeyValueStoreLike + Clone> WriteUnit<S> {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn commit(self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut kv = self.kv;
        let mut batch = kv.create_batch();
        for (key, value) in self.pending {
            match value {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        kv.write(batch)?;
        Ok(())
    }

    fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.pending.get(key.as_bytes()) {
            return Ok(value.clone());
        }
        Ok(self.kv.get_immutable(key)?)
    }

    fn put_raw(&mut self, key: String, value: Vec<u8>) {
        self.pending.insert(key.into_bytes(), Some(value));
    }

    fn delete_raw(&mut self, key: String) {
        self.pending.insert(key.into_bytes(), None);
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(&mut self, key: String, row: &T) -> Result<()> {
        let bytes = serde_json::to_vec(row)?;
        self.put_raw(key, bytes);
        Ok(())
    }

    /// Up to `limit` live entries with key `>= start` under `prefix`, overlay applied.
    fn scan(&self, start: &str, prefix: &str, limit: usize) -> Result<Vec<(String, Vec<u8>)>> {
        let in_range = |key: &[u8]| key >= start.as_bytes() && key.starts_with(prefix.as_bytes());
        let deletes = self
            .pending
            .iter()
            .filter(|(key, value)| value.is_none() && in_range(key.as_slice()))
            .count();

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .kv
            .scan_from(start.as_bytes(), prefix.as_bytes(), limit.saturating_add(deletes))?
            .into_iter()
            .collect();
        for (key, value) in self.pending.iter().filter(|(key, _)| in_range(key.as_slice())) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged
            .into_iter()
            .take(limit)
            .map(|(key, value)| Ok((String::from_utf8(key)?, value)))
            .collect()
    }

    fn scan_all(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        self.scan(prefix, prefix, usize::MAX)
    }

    fn scan_height(&self, prefix: &str, height: u32) -> Result<Vec<(String, Vec<u8>)>> {
        self.scan(&keys::from_height(prefix, height), prefix, usize::MAX)
    }

    /// Index entries store the primary key they point at.
    fn index_target(value: &[u8]) -> Result<String> {
        Ok(String::from_utf8(value.to_vec())?)
    }

    // blocks

    pub fn get_block(&self, height: u32) -> Result<Option<BlockRow>> {
        self.get_json(&keys::block(height))
    }

    pub fn block_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.get_raw(&keys::block_hash(hash))?.is_some())
    }

    pub fn last_block(&self) -> Result<Option<BlockRow>> {
        match self.get_json::<u32>(keys::TIP)? {
            Some(height) => self.get_block(height),
            None => Ok(None),
        }
    }

    pub fn put_block(&mut self, row: &BlockRow) -> Result<()> {
        if let Some(existing) = self.get_block(row.height)? {
            self.delete_raw(keys::block_hash(&existing.hash));
        }
        self.put_json(keys::block(row.height), row)?;
        self.put_raw(
            keys::block_hash(&row.hash),
            row.height.to_string().into_bytes(),
        );
        let tip = self.get_json::<u32>(keys::TIP)?;
        if tip.map_or(true, |tip| row.height >= tip) {
            self.put_json(keys::TIP.to_string(), &row.height)?;
        }
        Ok(())
    }

    // transactions

    pub fn get_tx(&self, txid: &str) -> Result<Option<TxRow>> {
        self.get_json(&keys::tx(txid))
    }

    pub fn put_tx(&mut self, row: &TxRow) -> Result<()> {
        self.put_json(keys::tx(&row.txid), row)?;
        let key = keys::tx(&row.txid);
        self.put_raw(keys::tx_by_height(row.block_height, &row.txid), key.into_bytes());
        Ok(())
    }

    // outputs

    pub fn get_tx_out(&self, txid: &str, vout: u32) -> Result<Option<TxOutRow>> {
        self.get_json(&keys::out(txid, vout))
    }

    pub fn put_tx_out(&mut self, row: &TxOutRow) -> Result<()> {
        let key = keys::out(&row.txid, row.output_index);
        self.put_json(key.clone(), row)?;
        self.put_raw(
            keys::out_by_height(row.block_height, &row.txid, row.output_index),
            key.into_bytes(),
        );
        Ok(())
    }

    /// Record `spend_txid:vin` at `height` as the spender of `txid:vout`.
    ///
    /// Outputs this indexer never stored are ignored; returns whether a row was marked.
    pub fn mark_tx_out_spent(
        &mut self,
        txid: &str,
        vout: u32,
        spend_txid: &str,
        vin: u32,
        height: u32,
    ) -> Result<bool> {
        let key = keys::out(txid, vout);
        let mut row = match self.get_json::<TxOutRow>(&key)? {
            Some(row) => row,
            None => return Ok(false),
        };
        row.spend_txid = Some(spend_txid.to_string());
        row.spend_input_index = Some(vin);
        self.put_json(key.clone(), &row)?;
        self.put_raw(keys::out_by_spend(height, spend_txid, vin), key.into_bytes());
        Ok(true)
    }

    // tokens

    pub fn get_token(&self, token_id: &str) -> Result<Option<TokenInfoRow>> {
        self.get_json(&keys::token(token_id))
    }

    pub fn get_token_by_minter(&self, minter_pubkey: &str) -> Result<Option<TokenInfoRow>> {
        match self.get_raw(&keys::token_by_minter(minter_pubkey))? {
            Some(token_id) => self.get_token(&String::from_utf8(token_id)?),
            None => Ok(None),
        }
    }

    pub fn put_token(&mut self, row: &TokenInfoRow) -> Result<()> {
        if let Some(existing) = self.get_token(&row.token_id)? {
            self.remove_token_indexes(&existing);
        }
        let id = row.token_id.as_bytes().to_vec();
        self.put_json(keys::token(&row.token_id), row)?;
        self.put_raw(keys::token_by_minter(&row.minter_pubkey), id.clone());
        self.put_raw(keys::token_by_reveal(row.reveal_height, &row.token_id), id.clone());
        self.put_raw(keys::token_by_genesis(&row.genesis_txid, &row.token_id), id.clone());
        if let Some(height) = row.first_mint_height {
            self.put_raw(keys::token_by_first_mint(height, &row.token_id), id);
        }
        Ok(())
    }

    fn remove_token_indexes(&mut self, row: &TokenInfoRow) {
        self.delete_raw(keys::token_by_minter(&row.minter_pubkey));
        self.delete_raw(keys::token_by_reveal(row.reveal_height, &row.token_id));
        self.delete_raw(keys::token_by_genesis(&row.genesis_txid, &row.token_id));
        if let Some(height) = row.first_mint_height {
            self.delete_raw(keys::token_by_first_mint(height, &row.token_id));
        }
    }

    fn remove_token(&mut self, token_id: &str) -> Result<bool> {
        match self.get_token(token_id)? {
            Some(row) => {
                self.remove_token_indexes(&row);
                self.delete_raw(keys::token(token_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // mints

    pub fn put_mint(&mut self, row: &TokenMintRow) -> Result<()> {
        self.put_json(keys::mint(row.block_height, &row.txid), row)
    }

    pub fn mints_from(&self, height: u32) -> Result<Vec<TokenMintRow>> {
        self.scan_height(keys::MINT, height)?
            .into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect()
    }

    // orders

    pub fn get_order(&self, txid: &str, vout: u32) -> Result<Option<TokenOrderRow>> {
        self.get_json(&keys::order(txid, vout))
    }

    /// Insert or replace an order, keeping the status and spend indexes in step.
    pub fn put_order(&mut self, row: &TokenOrderRow) -> Result<()> {
        let key = keys::order(&row.txid, row.output_index);
        if let Some(existing) = self.get_json::<TokenOrderRow>(&key)? {
            self.remove_order_indexes(&existing);
        }
        self.put_json(key.clone(), row)?;
        self.put_raw(
            keys::order_by_height(row.block_height, &row.txid, row.output_index),
            key.clone().into_bytes(),
        );
        self.put_raw(
            keys::order_by_status(row.status.as_str(), &row.txid, row.output_index),
            key.clone().into_bytes(),
        );
        if let (Some(spend_txid), Some(vin), Some(height)) = (
            &row.spend_txid,
            row.spend_input_index,
            row.spend_block_height,
        ) {
            self.put_raw(keys::order_by_spend(height, spend_txid, vin), key.into_bytes());
        }
        Ok(())
    }

    fn remove_order_indexes(&mut self, row: &TokenOrderRow) {
        self.delete_raw(keys::order_by_status(
            row.status.as_str(),
            &row.txid,
            row.output_index,
        ));
        if let (Some(spend_txid), Some(vin), Some(height)) = (
            &row.spend_txid,
            row.spend_input_index,
            row.spend_block_height,
        ) {
            self.delete_raw(keys::order_by_spend(height, spend_txid, vin));
        }
    }

    pub fn orders_with_txid(&self, txid: &str) -> Result<Vec<TokenOrderRow>> {
        self.scan_all(&keys::order_txid_prefix(txid))?
            .into_iter()
            .map(|(_, value)| Ok(serde_json::from_slice(&value)?))
            .collect()
    }

    pub fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<TokenOrderRow>> {
        let mut rows = Vec::new();
        for (_, target) in self.scan_all(&keys::order_status_prefix(status.as_str()))? {
            let key = Self::index_target(&target)?;
            match self.get_json::<TokenOrderRow>(&key)? {
                Some(row) => rows.push(row),
                None => return Err(anyhow!("status index points at missing order {}", key)),
            }
        }
        Ok(rows)
    }

    // retraction

    /// Delete every row derived at or above `height` and unwind the spend marks made there.
    pub fn delete_from_height(&mut self, height: u32) -> Result<Retraction> {
        let mut retraction = Retraction::default();

        for (key, value) in self.scan_height(keys::BLOCK, height)? {
            let row: BlockRow = serde_json::from_slice(&value)?;
            self.delete_raw(keys::block_hash(&row.hash));
            self.delete_raw(key);
            retraction.blocks += 1;
        }
        if let Some(tip) = self.get_json::<u32>(keys::TIP)? {
            if tip >= height {
                let below = height.checked_sub(1);
                match below {
                    Some(below) if self.get_block(below)?.is_some() => {
                        self.put_json(keys::TIP.to_string(), &below)?
                    }
                    _ => self.delete_raw(keys::TIP.to_string()),
                }
            }
        }

        let mut deleted_txids = HashSet::new();
        for (index_key, target) in self.scan_height(keys::TX_BY_HEIGHT, height)? {
            let key = Self::index_target(&target)?;
            if let Some(txid) = key.strip_prefix(keys::TX) {
                deleted_txids.insert(txid.to_string());
            }
            self.delete_raw(key);
            self.delete_raw(index_key);
            retraction.txs += 1;
        }

        for (index_key, target) in self.scan_height(keys::OUT_BY_HEIGHT, height)? {
            let key = Self::index_target(&target)?;
            if let Some(archived) = keys::archived(&key) {
                self.delete_raw(archived);
            }
            self.delete_raw(key);
            self.delete_raw(index_key);
            retraction.tx_outs += 1;
        }

        let mut spends = self.scan_height(keys::OUT_BY_SPEND, height)?;
        spends.extend(self.scan_height(keys::OUT_ARCHIVE_BY_SPEND, height)?);
        for (index_key, target) in spends {
            let key = Self::index_target(&target)?;
            let archived = keys::archived(&key);
            let row = match self.get_json::<TxOutRow>(&key)? {
                Some(row) => Some(row),
                None => match &archived {
                    Some(archived) => self.get_json::<TxOutRow>(archived)?,
                    None => None,
                },
            };
            if let Some(mut row) = row {
                row.spend_txid = None;
                row.spend_input_index = None;
                self.put_json(key, &row)?;
                if let Some(archived) = archived {
                    self.delete_raw(archived);
                }
                retraction.unspent_outs += 1;
            }
            self.delete_raw(index_key);
        }

        for (_, token_id) in self.scan_height(keys::TOKEN_BY_REVEAL, height)? {
            if self.remove_token(&String::from_utf8(token_id)?)? {
                retraction.tokens += 1;
            }
        }
        for txid in &deleted_txids {
            for (_, token_id) in self.scan_all(&keys::token_by_genesis_prefix(txid))? {
                if self.remove_token(&String::from_utf8(token_id)?)? {
                    retraction.tokens += 1;
                }
            }
        }
        for (index_key, token_id) in self.scan_height(keys::TOKEN_BY_FIRST_MINT, height)? {
            self.delete_raw(index_key);
            if let Some(mut row) = self.get_token(&String::from_utf8(token_id)?)? {
                row.token_pubkey = None;
                row.first_mint_height = None;
                self.put_token(&row)?;
            }
        }

        for (key, _) in self.scan_height(keys::MINT, height)? {
            self.delete_raw(key);
            retraction.mints += 1;
        }

        for (index_key, target) in self.scan_height(keys::ORDER_BY_HEIGHT, height)? {
            let key = Self::index_target(&target)?;
            if let Some(row) = self.get_json::<TokenOrderRow>(&key)? {
                self.remove_order_indexes(&row);
            }
            self.delete_raw(key);
            self.delete_raw(index_key);
            retraction.orders += 1;
        }

        for (index_key, target) in self.scan_height(keys::ORDER_BY_SPEND, height)? {
            let key = Self::index_target(&target)?;
            self.delete_raw(index_key);
            if let Some(mut row) = self.get_json::<TokenOrderRow>(&key)? {
                row.status = row.unspent_status();
                row.spend_txid = None;
                row.spend_input_index = None;
                row.spend_block_height = None;
                row.spend_created_at = None;
                row.taker_pubkey = None;
                row.fill_amount = None;
                self.put_order(&row)?;
                retraction.reopened_orders += 1;
            }
        }

        debug!("retraction from #{}: {:?}", height, retraction);
        Ok(retraction)
    }

    /// Move up to `limit` outputs spent below `before_height` into the archive table,
    /// oldest spend first.
    pub fn archive_spent_outputs(&mut self, before_height: u32, limit: usize) -> Result<usize> {
        let mut moved = 0;
        for (index_key, target) in self.scan(keys::OUT_BY_SPEND, keys::OUT_BY_SPEND, limit)? {
            let spent_at = match keys::height_of(keys::OUT_BY_SPEND, index_key.as_bytes()) {
                Some(spent_at) if spent_at < before_height => spent_at,
                _ => break,
            };
            let key = Self::index_target(&target)?;
            let suffix = &index_key[keys::OUT_BY_SPEND.len()..];
            self.delete_raw(index_key.clone());
            self.put_raw(
                format!("{}{}", keys::OUT_ARCHIVE_BY_SPEND, suffix),
                key.clone().into_bytes(),
            );
            if let (Some(value), Some(archived)) = (self.get_raw(&key)?, keys::archived(&key)) {
                self.put_raw(archived, value);
                self.delete_raw(key);
                moved += 1;
            }
            debug!("archived output spent at #{}", spent_at);
        }
        Ok(moved)
    }
}

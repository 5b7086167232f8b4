//! [`StorageAdapter`] implementation for the sync loop

use async_trait::async_trait;
use catshrew_sync::{BlockHeader, StorageAdapter, SyncError, SyncResult};
use log::info;

use crate::entities::BlockRow;
use crate::store::IndexStore;
use crate::traits::KeyValueStoreLike;

impl From<&BlockHeader> for BlockRow {
    fn from(header: &BlockHeader) -> Self {
        BlockRow {
            height: header.height,
            hash: header.hash.clone(),
            previous_hash: header.previousblockhash.clone(),
            time: header.time,
        }
    }
}

impl From<BlockRow> for BlockHeader {
    fn from(row: BlockRow) -> Self {
        BlockHeader {
            hash: row.hash,
            height: row.height,
            previousblockhash: row.previous_hash,
            time: row.time,
        }
    }
}

pub fn storage_error(e: anyhow::Error) -> SyncError {
    SyncError::Storage(format!("{:#}", e))
}

#[async_trait]
impl<S> StorageAdapter for IndexStore<S>
where
    S: KeyValueStoreLike + Clone + Send + Sync,
{
    async fn get_last_block(&self) -> SyncResult<Option<BlockHeader>> {
        Ok(self.last_block().map_err(storage_error)?.map(Into::into))
    }

    async fn block_exists(&self, hash: &str) -> SyncResult<bool> {
        IndexStore::block_exists(self, hash).map_err(storage_error)
    }

    async fn save_block(&mut self, header: &BlockHeader) -> SyncResult<()> {
        let mut unit = self.begin();
        unit.put_block(&BlockRow::from(header)).map_err(storage_error)?;
        unit.commit().map_err(storage_error)
    }

    async fn delete_from_height(&mut self, height: u32) -> SyncResult<()> {
        let mut unit = self.begin();
        let retraction = unit.delete_from_height(height).map_err(storage_error)?;
        unit.commit().map_err(storage_error)?;
        if retraction.blocks > 0 || retraction.txs > 0 {
            info!(
                "deleted {} blocks, {} txs, {} tx outputs, {} tokens, {} orders from #{}",
                retraction.blocks,
                retraction.txs,
                retraction.tx_outs,
                retraction.tokens,
                retraction.orders,
                height
            );
        }
        Ok(())
    }

    async fn archive_spent_outputs(&mut self, before_height: u32, limit: usize) -> SyncResult<usize> {
        let mut unit = self.begin();
        let moved = unit
            .archive_spent_outputs(before_height, limit)
            .map_err(storage_error)?;
        unit.commit().map_err(storage_error)?;
        Ok(moved)
    }

    async fn is_available(&self) -> bool {
        self.is_open()
    }
}

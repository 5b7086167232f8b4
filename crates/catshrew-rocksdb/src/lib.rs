//! RocksDB implementation of KeyValueStoreLike trait

use anyhow::Result;
use catshrew_runtime::{BatchLike, KeyValueStoreLike};
use log::info;
use rocksdb::{Options, WriteBatch, DB};
use std::sync::Arc;

#[derive(Clone)]
pub struct RocksDBAdapter {
    pub db: Arc<DB>,
}

impl RocksDBAdapter {
    pub fn new(db: Arc<DB>) -> Self {
        RocksDBAdapter { db }
    }

    pub fn open(path: String, opts: Options) -> Result<RocksDBAdapter> {
        let db = DB::open(&opts, &path)?;
        info!("opened database at {}", path);
        Ok(RocksDBAdapter { db: Arc::new(db) })
    }

    /// Options tuned for the indexer's write-heavy, append-mostly workload
    pub fn get_optimized_options() -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(256 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.increase_parallelism(num_cpus::get() as i32);
        opts
    }

    pub fn open_optimized(path: String) -> Result<RocksDBAdapter> {
        Self::open(path, Self::get_optimized_options())
    }
}

pub struct RocksDBBatch(pub WriteBatch);

impl BatchLike for RocksDBBatch {
    fn default() -> Self {
        Self(WriteBatch::default())
    }

    fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, k: K, v: V) {
        self.0.put(k, v);
    }

    fn delete<K: AsRef<[u8]>>(&mut self, k: K) {
        self.0.delete(k);
    }
}

impl KeyValueStoreLike for RocksDBAdapter {
    type Batch = RocksDBBatch;
    type Error = rocksdb::Error;

    fn write(&mut self, batch: RocksDBBatch) -> Result<(), Self::Error> {
        self.db.write(batch.0)
    }

    fn get_immutable<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>, Self::Error> {
        self.db.get(key)
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<(), Self::Error> {
        self.db.delete(key)
    }

    fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) -> Result<(), Self::Error> {
        self.db.put(key, value)
    }

    fn scan_from<K: AsRef<[u8]>>(
        &self,
        start: K,
        prefix: K,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        let mut results = Vec::new();
        let prefix = prefix.as_ref();

        let mut iter = self.db.raw_iterator();
        iter.seek(start.as_ref());

        while iter.valid() && results.len() < limit {
            if let Some(key) = iter.key() {
                if !key.starts_with(prefix) {
                    break;
                }
                if let Some(value) = iter.value() {
                    results.push((key.to_vec(), value.to_vec()));
                }
            }
            iter.next();
        }
        iter.status()?;

        Ok(results)
    }

    fn create_batch(&self) -> Self::Batch {
        RocksDBBatch::default()
    }
}

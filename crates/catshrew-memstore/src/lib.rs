//! In-memory ordered key-value store for tests and ephemeral runs

use catshrew_runtime::{BatchLike, KeyValueStoreLike};
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone, Default)]
pub struct MemStore {
    pub db: Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.db.lock().map(|db| db.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>> {
        self.db
            .lock()
            .map_err(|_| Error::new(ErrorKind::Other, "memstore lock poisoned"))
    }
}

enum BatchOperation {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

pub struct MemStoreBatch {
    operations: Vec<BatchOperation>,
}

impl BatchLike for MemStoreBatch {
    fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) {
        self.operations.push(BatchOperation::Put(
            key.as_ref().to_vec(),
            value.as_ref().to_vec(),
        ));
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) {
        self.operations
            .push(BatchOperation::Delete(key.as_ref().to_vec()));
    }

    fn default() -> Self {
        MemStoreBatch {
            operations: Vec::new(),
        }
    }
}

impl KeyValueStoreLike for MemStore {
    type Batch = MemStoreBatch;
    type Error = Error;

    fn write(&mut self, batch: Self::Batch) -> Result<()> {
        let mut db = self.lock()?;
        for operation in batch.operations {
            match operation {
                BatchOperation::Put(key, value) => {
                    db.insert(key, value);
                }
                BatchOperation::Delete(key) => {
                    db.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn get_immutable<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key.as_ref()).cloned())
    }

    fn put<K, V>(&mut self, key: K, value: V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        self.lock()?
            .insert(key.as_ref().to_vec(), value.as_ref().to_vec());
        Ok(())
    }

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<()> {
        self.lock()?.remove(key.as_ref());
        Ok(())
    }

    fn scan_from<K: AsRef<[u8]>>(
        &self,
        start: K,
        prefix: K,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.lock()?;
        Ok(db
            .range(start.as_ref().to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix.as_ref()))
            .take(limit)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_is_applied_in_order() -> Result<()> {
        let mut store = MemStore::new();
        let mut batch = store.create_batch();
        batch.put(b"k", b"1");
        batch.delete(b"k");
        batch.put(b"j", b"2");
        store.write(batch)?;
        assert_eq!(store.get_immutable(b"k")?, None);
        assert_eq!(store.get_immutable(b"j")?, Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
        Ok(())
    }

    #[test]
    fn scan_stops_at_prefix_end() -> Result<()> {
        let mut store = MemStore::new();
        for key in ["out/1", "out/2", "outa/1", "tok/1"] {
            store.put(key, b"")?;
        }
        let found: Vec<Vec<u8>> = store
            .scan_prefix(b"out/")?
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(found, vec![b"out/1".to_vec(), b"out/2".to_vec()]);
        assert_eq!(store.scan_from(&b"out/2"[..], &b"out/"[..], 10)?.len(), 1);
        Ok(())
    }
}

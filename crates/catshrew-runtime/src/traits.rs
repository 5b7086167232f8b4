//! Core traits for generic key-value storage backends

/// Write batch applied atomically by [`KeyValueStoreLike::write`]
pub trait BatchLike {
    fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V);
    fn delete<K: AsRef<[u8]>>(&mut self, key: K);
    fn default() -> Self;
}

/// Ordered key-value store.
///
/// Handles are cheap to clone and clones share the same underlying data.
pub trait KeyValueStoreLike {
    type Error: std::fmt::Debug + Send + Sync + std::error::Error + 'static;
    type Batch: BatchLike;

    /// Apply every operation of `batch` or none of them.
    fn write(&mut self, batch: Self::Batch) -> Result<(), Self::Error>;

    fn get_immutable<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>, Self::Error>;

    fn put<K, V>(&mut self, key: K, value: V) -> Result<(), Self::Error>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>;

    fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<(), Self::Error>;

    /// All entries whose key starts with `prefix`, in key order.
    fn scan_prefix<K: AsRef<[u8]>>(&self, prefix: K) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error> {
        self.scan_from(prefix.as_ref(), prefix.as_ref(), usize::MAX)
    }

    /// Up to `limit` entries with key `>= start` that still start with `prefix`, in key order.
    fn scan_from<K: AsRef<[u8]>>(
        &self,
        start: K,
        prefix: K,
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Self::Error>;

    fn create_batch(&self) -> Self::Batch {
        <Self::Batch as BatchLike>::default()
    }

    fn is_open(&self) -> bool {
        true
    }
}

//! Catshrew Test Suite
//!
//! End-to-end tests driving the CAT20 indexer over a mock chain, with the in-memory store
//! for most scenarios and RocksDB for persistence.

pub mod tests;

// Re-export test utilities for external use
pub use tests::block_builder::{BlockBuilder, ChainBuilder};
pub use tests::tx_builder::{Contract, TxBuilder};
pub use tests::TestIndexer;

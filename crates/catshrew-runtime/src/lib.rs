//! Derived-state storage for the catshrew indexer
//!
//! [`KeyValueStoreLike`] abstracts the ordered key-value backend (RocksDB in production,
//! an in-memory map in tests). [`IndexStore`] lays the protocol entities out on top of it and
//! hands out [`WriteUnit`]s, the all-or-nothing write scope used for every transaction, block
//! and reorg retraction.

pub mod adapter;
pub mod entities;
pub mod keys;
pub mod store;
pub mod traits;

pub use adapter::*;
pub use entities::*;
pub use store::*;
pub use traits::*;

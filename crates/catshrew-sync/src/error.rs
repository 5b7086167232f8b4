//! Error types for catshrew-sync

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Bitcoin node error: {0}")]
    BitcoinNode(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Chain reorganization error: {0}")]
    Reorg(String),

    #[error("Invalid block at height {height}: {message}")]
    InvalidBlock { height: u32, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl SyncError {
    /// Upstream failures the sync loops absorb with a sleep instead of exiting.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::BitcoinNode(_) | SyncError::NotFound(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

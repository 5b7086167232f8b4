//! Error types for transaction processing

use catshrew_runtime::storage_error;
use catshrew_sync::SyncError;
use thiserror::Error;

/// Protocol violation confined to one transaction. The transaction's writes are discarded
/// and processing continues with the next one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatTxError {
    #[error("invalid mint tx, multiple minter inputs found")]
    MultipleMinterInputs,

    #[error("invalid reveal tx, multiple commit inputs found")]
    MultipleCommitInputs,

    #[error("invalid reveal tx, missing commit input")]
    MissingCommitInput,

    #[error("invalid reveal tx, missing minter output")]
    MissingMinterOutput,

    #[error("invalid reveal tx, output other than minter")]
    ForeignRevealOutput,

    #[error("invalid {0} tx, invalid witness field")]
    ShortWitness(&'static str),

    #[error("invalid state hash length")]
    BadStateHashLength,

    #[error("invalid mint tx, invalid byte length of owner pubkey hash")]
    BadOwnerHashLength,

    #[error("invalid {0} tx, invalid byte length of token amount")]
    BadAmountLength(&'static str),

    #[error("invalid mint tx, token amount should be positive")]
    NonPositiveAmount,

    #[error("invalid mint tx, invalid output structure")]
    InvalidMintOutputs,

    #[error("invalid mint tx, minter outputs are not consecutive")]
    NonConsecutiveMinterOutputs,

    #[error("invalid mint tx, multiple token outputs found")]
    MultipleTokenOutputs,

    #[error("invalid mint tx, invalid token output with a different pubkey")]
    DivergentTokenPubKey,

    #[error("invalid mint tx, missing token output")]
    MissingTokenOutput,

    #[error("invalid mint tx, missing reward owner")]
    MissingBonusOwner,

    #[error("invalid transfer tx, token output {0} is not taproot")]
    TokenSlotNotTaproot(u32),
}

/// Failure while processing one transaction
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(transparent)]
    Protocol(#[from] CatTxError),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl From<anyhow::Error> for ProcessError {
    fn from(e: anyhow::Error) -> Self {
        ProcessError::Sync(storage_error(e))
    }
}

pub type ProcessResult<T> = Result<T, ProcessError>;

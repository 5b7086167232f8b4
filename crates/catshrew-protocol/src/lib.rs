//! CAT20 protocol interpretation
//!
//! Parses the fixed witness layouts of the CAT20 contracts and turns each protocol
//! transaction into rows of the [`catshrew_runtime`] store. [`CatProcessor`] plugs into the
//! sync loop as its [`catshrew_sync::BlockProcessor`].

pub mod cache;
pub mod constants;
pub mod contract;
pub mod envelope;
pub mod error;
pub mod params;
pub mod processor;
pub mod taproot;

pub use contract::{script_path_spend, ContractArtifact, ScriptArg, ScriptPathSpend};
pub use envelope::{decode_buy_order, parse_token_info, BuyOrderArgs, TokenMetadata};
pub use error::{CatTxError, ProcessError, ProcessResult};
pub use params::ProtocolParams;
pub use processor::{order_status_from_shape, CatProcessor, TxKind};
pub use taproot::{hash160, parse_taproot_output, TaprootInput, XOnlyKey};

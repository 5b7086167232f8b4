pub mod error;
pub mod mempool;
pub mod sync;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use error::*;
pub use mempool::*;
pub use sync::*;
pub use traits::*;
pub use types::*;

//! Fundamental types for headcast.
//!
//! Defines the chain-tip snapshot ([`Head`]) and the primitives it is built
//! from: block hashes and timestamps.

pub mod block;
pub mod error;
pub mod head;
pub mod time;

pub use block::BlockHash;
pub use error::TypesError;
pub use head::Head;
pub use time::Timestamp;

//! # cosmos-core
//! Entity model, Merkle proofs and collaborator traits for the Cosmos SPV wallet.

pub mod bump;
pub mod error;
pub mod merkle;
pub mod ray;
pub mod traits;
pub mod types;
pub mod vertex;

pub use error::{CosmosError, NetworkError, TxDbError};
pub use traits::{Imported, Network, TxDb, WritableTxDb};

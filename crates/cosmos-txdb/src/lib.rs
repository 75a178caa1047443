//! # cosmos-txdb
//! SPV transaction database for the Cosmos wallet.
//!
//! - [`LocalTxDb`]: headers, proofs, transactions and indices, persisted as JSON
//! - [`CachedRemoteTxDb`]: fetch-on-miss layer over a local store and a network
//! - [`Session`]: commit-or-discard mutation with persistence on success
//! - [`broadcast_tree`]: import and propagate a multi-transaction payment proof

pub mod broadcast;
pub mod local;
pub mod persist;
pub mod remote;
pub mod session;

#[cfg(test)]
mod fixtures;

pub use broadcast::{Aggregate, BroadcastTreeResult, ProofNode, SpvProof, broadcast_tree};
pub use local::LocalTxDb;
pub use remote::CachedRemoteTxDb;
pub use session::Session;

//! Error types for the Cosmos wallet core.
use bitcoin::{BlockHash, OutPoint, TxMerkleNode, Txid};
use thiserror::Error;

use crate::types::InPoint;

/// Errors raised by a transaction database.
///
/// `InvalidProof`, `HeaderConflict` and `ChainInconsistent` are data-integrity
/// failures: they mean either the server is lying or the local cache is
/// corrupted, and the caller decides whether to purge and resynchronize.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxDbError {
    #[error("merkle proof for {txid} does not verify against root {root}")]
    InvalidProof { txid: Txid, root: TxMerkleNode },
    #[error("unconfirmed or invalid tx cannot be ordered")]
    UnconfirmedOrdering,
    #[error("outpoint {outpoint} already redeemed by {existing}")]
    DuplicateRedeem { outpoint: OutPoint, existing: InPoint },
    #[error("missing antecedent: {0}")]
    MissingAntecedent(Txid),
    #[error("header conflict at height {height}: have {existing}, got {incoming}")]
    HeaderConflict { height: u64, existing: BlockHash, incoming: BlockHash },
    #[error("header at height {height} does not link to its predecessor")]
    ChainInconsistent { height: u64 },
    #[error("unknown transaction: {0}")]
    UnknownTransaction(Txid),
    #[error("unknown header: {0}")]
    UnknownHeader(BlockHash),
    #[error("output index out of range: {0}")]
    OutputOutOfRange(OutPoint),
    #[error("input index out of range: {0}")]
    InputOutOfRange(InPoint),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("storage: {0}")]
    Storage(String),
}

/// Errors from a network collaborator.
///
/// A single provider failing during broadcast never surfaces as one of these;
/// it is folded into the aggregate [`BroadcastOutcome`](crate::types::BroadcastOutcome).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rate limited by {0}")]
    RateLimited(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("no provider configured for {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum CosmosError {
    #[error(transparent)]
    TxDb(#[from] TxDbError),
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl From<bitcoin::consensus::encode::Error> for TxDbError {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        TxDbError::Serialization(e.to_string())
    }
}

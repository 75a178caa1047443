//! One trait per thing the wallet needs from the outside world.
//!
//! Providers are shared across the broadcast threads, so they must be
//! `Send + Sync`.

use bitcoin::{BlockHash, Txid};

use cosmos_core::error::NetworkError;
use cosmos_core::types::{BroadcastOutcome, FeeRate, HeaderEntry, TxProof};

/// An endpoint that accepts raw transactions.
pub trait BroadcastProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether an acceptance from this provider counts toward the aggregate.
    /// Providers known to report false positives are untrusted.
    fn trusted(&self) -> bool;

    /// Submit a serialized transaction.
    ///
    /// `Err` is a transport failure. A provider that answered but refused the
    /// transaction returns `Ok(BroadcastOutcome::Rejected(..))`.
    fn submit(&self, raw: &[u8]) -> Result<BroadcastOutcome, NetworkError>;
}

/// Lookup of mined data by id.
pub trait TransactionSource: Send + Sync {
    /// Serialized transaction, `None` if unknown.
    fn raw_transaction(&self, txid: &Txid) -> Result<Option<Vec<u8>>, NetworkError>;

    /// Merkle proof binding `txid` to a block, `None` if not mined.
    fn merkle_proof(&self, txid: &Txid) -> Result<Option<TxProof>, NetworkError>;

    fn header(&self, hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError>;
}

pub trait FeeSource: Send + Sync {
    /// The mining fee currently asked for a standard transaction.
    fn fee_rate(&self) -> Result<FeeRate, NetworkError>;
}

pub trait PriceSource: Send + Sync {
    /// USD price of one coin on the day containing the unix `timestamp`.
    ///
    /// A rate-limited response is reported as [`NetworkError::RateLimited`]
    /// so the caller can retry.
    fn price_at(&self, timestamp: u32) -> Result<f64, NetworkError>;
}

//! Trait interfaces between the wallet crates.
//!
//! - [`Network`]: blocking access to the Bitcoin network (cosmos-network implements)
//! - [`TxDb`]: read side of a transaction database (local and cached-remote stores)
//! - [`WritableTxDb`]: mutation side, implemented by both stores

use std::collections::BTreeSet;

use bitcoin::{Address, BlockHash, OutPoint, Transaction, TxMerkleNode, TxOut, Txid};

use crate::error::{NetworkError, TxDbError};
use crate::merkle::MerklePath;
use crate::ray::Ray;
use crate::types::{BroadcastOutcome, FeeRate, HeaderEntry, InPoint, ScriptHash, TxProof};
use crate::vertex::Vertex;

/// Everything the wallet asks of the network. All calls block.
pub trait Network {
    /// Submit a transaction. Never fails outright: transport problems are
    /// folded into the outcome.
    fn broadcast(&self, tx: &Transaction) -> BroadcastOutcome;

    /// Raw transaction by id. `None` if no provider knows it.
    fn fetch_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, NetworkError>;

    /// Merkle proof for a mined transaction. `None` if unconfirmed or unknown.
    fn fetch_proof(&self, txid: &Txid) -> Result<Option<TxProof>, NetworkError>;

    /// Header with its height.
    fn fetch_header(&self, hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError>;

    fn current_fee_rate(&self) -> Result<FeeRate, NetworkError>;

    /// USD price of one coin at a unix timestamp.
    fn historical_price(&self, timestamp: u32) -> Result<f64, NetworkError>;
}

/// Read access to a transaction database.
pub trait TxDb {
    /// The transaction with its confirmation.
    ///
    /// An absent or unproven transaction yields a vertex that is not
    /// [`valid`](Vertex::valid) rather than an error.
    fn vertex(&mut self, txid: &Txid) -> Result<Vertex, TxDbError>;

    /// Every event indexed under `address`, in chronological order.
    fn by_address(&self, address: &Address) -> Result<BTreeSet<Ray>, TxDbError>;

    /// Every event indexed under `script_hash`, in chronological order.
    fn by_script_hash(&self, script_hash: &ScriptHash) -> Result<BTreeSet<Ray>, TxDbError>;

    /// The input that spent `outpoint`, if known.
    fn redeeming(&self, outpoint: &OutPoint) -> Result<Option<Ray>, TxDbError>;

    /// The output at `outpoint` of a confirmed transaction.
    fn output(&mut self, outpoint: &OutPoint) -> Result<Option<TxOut>, TxDbError> {
        let vertex = self.vertex(&outpoint.txid)?;
        if !vertex.valid() {
            return Ok(None);
        }
        Ok(vertex
            .transaction
            .and_then(|tx| tx.output.get(outpoint.vout as usize).cloned()))
    }

    /// Satoshi value of the output at `outpoint`.
    fn value(&mut self, outpoint: &OutPoint) -> Result<Option<u64>, TxDbError> {
        Ok(self.output(outpoint)?.map(|o| o.value.to_sat()))
    }
}

/// What an import did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Imported {
    New,
    AlreadyKnown,
}

/// Mutation access to a transaction database.
pub trait WritableTxDb: TxDb {
    /// Verify `path` against `header` and store the transaction, proof and
    /// header. Nothing is changed if verification fails.
    fn import(
        &mut self,
        tx: &Transaction,
        path: &MerklePath,
        header: &HeaderEntry,
    ) -> Result<Imported, TxDbError>;

    /// Store a transaction that has no proof yet.
    fn insert_pending(&mut self, tx: &Transaction);

    fn add_address(&mut self, address: &Address, outpoint: OutPoint);

    fn add_script(&mut self, script_hash: ScriptHash, outpoint: OutPoint);

    /// Record the input that spent `outpoint`.
    ///
    /// A different redeemer for an already-redeemed outpoint is rejected with
    /// [`TxDbError::DuplicateRedeem`]; repeating the same one is a no-op.
    fn set_redeem(&mut self, outpoint: OutPoint, inpoint: InPoint) -> Result<(), TxDbError>;

    /// Transactions stored without a proof.
    fn pending(&self) -> BTreeSet<Txid>;

    /// Drop a transaction with its proof binding and pending membership.
    /// Returns whether anything was removed.
    fn remove(&mut self, txid: &Txid) -> bool;

    /// Raw transaction, confirmed or pending.
    fn transaction(&self, txid: &Txid) -> Option<Transaction>;

    fn header_by_height(&self, height: u64) -> Option<HeaderEntry>;

    fn header_by_hash(&self, hash: &BlockHash) -> Option<HeaderEntry>;

    fn header_by_root(&self, root: &TxMerkleNode) -> Option<HeaderEntry>;
}

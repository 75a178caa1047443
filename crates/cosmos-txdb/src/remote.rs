//! Read-through cache over a [`LocalTxDb`] and a [`Network`].
//!
//! Reads are served locally when possible. A transaction without a valid
//! confirmation is fetched together with its proof and header, verified
//! exactly as a local import would, and stored. Address, script and redeem
//! indices are never fetched; they come only from the local store.

use std::collections::BTreeSet;

use bitcoin::{Address, BlockHash, OutPoint, Transaction, TxMerkleNode, Txid};
use tracing::{debug, warn};

use cosmos_core::error::TxDbError;
use cosmos_core::merkle::MerklePath;
use cosmos_core::ray::Ray;
use cosmos_core::traits::{Imported, Network, TxDb, WritableTxDb};
use cosmos_core::types::{HeaderEntry, InPoint, ScriptHash};
use cosmos_core::vertex::Vertex;

use crate::local::LocalTxDb;

pub struct CachedRemoteTxDb<'a, N: Network + ?Sized> {
    net: &'a N,
    local: &'a mut LocalTxDb,
}

impl<'a, N: Network + ?Sized> CachedRemoteTxDb<'a, N> {
    pub fn new(net: &'a N, local: &'a mut LocalTxDb) -> Self {
        Self { net, local }
    }

    pub fn local(&self) -> &LocalTxDb {
        &*self.local
    }

    pub fn network(&self) -> &N {
        self.net
    }

    /// Fetch `txid` with its proof and header and import it.
    ///
    /// `Ok(None)` means the network could not supply a complete proof.
    /// A proof that was supplied but does not verify is an error.
    pub fn fetch_and_import(&mut self, txid: &Txid) -> Result<Option<Imported>, TxDbError> {
        let Some(tx) = self.resolve_transaction(txid) else {
            return Ok(None);
        };

        let proof = match self.net.fetch_proof(txid) {
            Ok(Some(proof)) => proof,
            Ok(None) => {
                debug!(%txid, "remote: no proof available");
                return Ok(None);
            }
            Err(e) => {
                warn!(%txid, error = %e, "remote: proof fetch failed");
                return Ok(None);
            }
        };

        let Some(header) = self.resolve_header(&proof.block_hash) else {
            return Ok(None);
        };

        self.local.import(&tx, &proof.path, &header).map(Some)
    }

    /// Try to confirm every pending transaction. Returns the ones that were.
    pub fn update_pending(&mut self) -> Result<Vec<Txid>, TxDbError> {
        let mut confirmed = Vec::new();
        for txid in self.local.pending() {
            if self.fetch_and_import(&txid)?.is_some() {
                confirmed.push(txid);
            }
        }
        debug!(confirmed = confirmed.len(), still_pending = self.local.pending().len(), "remote: pending updated");
        Ok(confirmed)
    }

    fn resolve_transaction(&self, txid: &Txid) -> Option<Transaction> {
        if let Some(tx) = self.local.transaction(txid) {
            return Some(tx);
        }
        match self.net.fetch_transaction(txid) {
            Ok(Some(tx)) if tx.compute_txid() == *txid => Some(tx),
            Ok(Some(tx)) => {
                warn!(%txid, got = %tx.compute_txid(), "remote: network returned the wrong transaction");
                None
            }
            Ok(None) => {
                debug!(%txid, "remote: transaction unknown to network");
                None
            }
            Err(e) => {
                warn!(%txid, error = %e, "remote: transaction fetch failed");
                None
            }
        }
    }

    fn resolve_header(&self, hash: &BlockHash) -> Option<HeaderEntry> {
        if let Some(header) = self.local.header_by_hash(hash) {
            return Some(header);
        }
        match self.net.fetch_header(hash) {
            Ok(Some(header)) if header.hash() == *hash => Some(header),
            Ok(Some(header)) => {
                warn!(%hash, got = %header.hash(), "remote: network returned the wrong header");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(%hash, error = %e, "remote: header fetch failed");
                None
            }
        }
    }
}

impl<N: Network + ?Sized> TxDb for CachedRemoteTxDb<'_, N> {
    fn vertex(&mut self, txid: &Txid) -> Result<Vertex, TxDbError> {
        let local = self.local.lookup(txid);
        if local.valid() {
            return Ok(local);
        }
        if self.fetch_and_import(txid)?.is_some() {
            return Ok(self.local.lookup(txid));
        }
        Ok(local)
    }

    fn by_address(&self, address: &Address) -> Result<BTreeSet<Ray>, TxDbError> {
        self.local.by_address(address)
    }

    fn by_script_hash(&self, script_hash: &ScriptHash) -> Result<BTreeSet<Ray>, TxDbError> {
        self.local.by_script_hash(script_hash)
    }

    fn redeeming(&self, outpoint: &OutPoint) -> Result<Option<Ray>, TxDbError> {
        self.local.redeeming(outpoint)
    }
}

impl<N: Network + ?Sized> WritableTxDb for CachedRemoteTxDb<'_, N> {
    fn import(
        &mut self,
        tx: &Transaction,
        path: &MerklePath,
        header: &HeaderEntry,
    ) -> Result<Imported, TxDbError> {
        self.local.import(tx, path, header)
    }

    fn insert_pending(&mut self, tx: &Transaction) {
        self.local.insert_pending(tx)
    }

    fn add_address(&mut self, address: &Address, outpoint: OutPoint) {
        self.local.add_address(address, outpoint)
    }

    fn add_script(&mut self, script_hash: ScriptHash, outpoint: OutPoint) {
        self.local.add_script(script_hash, outpoint)
    }

    fn set_redeem(&mut self, outpoint: OutPoint, inpoint: InPoint) -> Result<(), TxDbError> {
        self.local.set_redeem(outpoint, inpoint)
    }

    fn pending(&self) -> BTreeSet<Txid> {
        self.local.pending()
    }

    fn remove(&mut self, txid: &Txid) -> bool {
        self.local.remove(txid)
    }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.local.transaction(txid)
    }

    fn header_by_height(&self, height: u64) -> Option<HeaderEntry> {
        self.local.header_by_height(height)
    }

    fn header_by_hash(&self, hash: &BlockHash) -> Option<HeaderEntry> {
        self.local.header_by_hash(hash)
    }

    fn header_by_root(&self, root: &TxMerkleNode) -> Option<HeaderEntry> {
        self.local.header_by_root(root)
    }
}

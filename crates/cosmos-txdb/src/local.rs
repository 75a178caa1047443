//! In-memory SPV transaction store.
//!
//! Holds headers, Merkle proofs, raw transactions and the address, script
//! and redeem indices. Every import is checked in full before anything is
//! written, so a failed import leaves the store untouched.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{Address, BlockHash, OutPoint, Transaction, TxMerkleNode, Txid};
use tracing::{debug, warn};

use cosmos_core::error::TxDbError;
use cosmos_core::merkle::MerklePath;
use cosmos_core::ray::Ray;
use cosmos_core::traits::{Imported, TxDb, WritableTxDb};
use cosmos_core::types::{HeaderEntry, InPoint, ScriptHash};
use cosmos_core::vertex::{Confirmation, Vertex};

/// A header together with the paths of every transaction proven under it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct HeightEntry {
    pub(crate) header: HeaderEntry,
    pub(crate) paths: BTreeMap<Txid, MerklePath>,
}

/// The authoritative local transaction database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LocalTxDb {
    pub(crate) by_height: BTreeMap<u64, HeightEntry>,
    pub(crate) by_hash: BTreeMap<BlockHash, u64>,
    pub(crate) by_root: BTreeMap<TxMerkleNode, u64>,
    /// Height at which each proven transaction is bound.
    pub(crate) by_txid: BTreeMap<Txid, u64>,
    pub(crate) transactions: BTreeMap<Txid, Transaction>,
    /// Keyed by the address string so that the index is network-agnostic.
    pub(crate) addresses: BTreeMap<String, BTreeSet<OutPoint>>,
    pub(crate) scripts: BTreeMap<ScriptHash, BTreeSet<OutPoint>>,
    pub(crate) redeems: BTreeMap<OutPoint, InPoint>,
    pub(crate) pending: BTreeSet<Txid>,
}

impl LocalTxDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// The transaction with its confirmation, without touching the network.
    pub fn lookup(&self, txid: &Txid) -> Vertex {
        let Some(tx) = self.transactions.get(txid) else {
            return Vertex::default();
        };
        let confirmation = self.by_txid.get(txid).and_then(|height| {
            let entry = self.by_height.get(height)?;
            let path = entry.paths.get(txid)?;
            Some(Confirmation::new(entry.header, path.clone()))
        });
        Vertex { transaction: Some(tx.clone()), confirmation }
    }

    /// Highest known header.
    pub fn latest(&self) -> Option<HeaderEntry> {
        self.by_height.last_key_value().map(|(_, e)| e.header)
    }

    /// The header `entry` links back to, if it is known.
    pub fn previous(&self, entry: &HeaderEntry) -> Option<HeaderEntry> {
        let height = entry.height.checked_sub(1)?;
        self.by_height
            .get(&height)
            .map(|e| e.header)
            .filter(|prev| prev.hash() == entry.prev_hash())
    }

    pub fn header_count(&self) -> usize {
        self.by_height.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Ids of every transaction with a proof.
    pub fn confirmed(&self) -> impl Iterator<Item = &Txid> {
        self.by_txid.keys()
    }

    /// All known headers in height order.
    pub fn headers(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.by_height.values().map(|e| &e.header)
    }

    /// Add a header without any proof. The same chain checks as
    /// [`import`](WritableTxDb::import) apply.
    pub fn insert_header(&mut self, header: &HeaderEntry) -> Result<Imported, TxDbError> {
        if self.check_header(header)? {
            return Ok(Imported::AlreadyKnown);
        }
        self.bind_header(header);
        Ok(Imported::New)
    }

    /// Drop the header at `height` together with its hash and root keys.
    ///
    /// Transactions proven under it keep their bytes and go back to the
    /// pending set, so they can be re-imported under a competing header.
    /// Returns those transactions.
    pub fn remove_header(&mut self, height: u64) -> Vec<Txid> {
        let Some(entry) = self.by_height.remove(&height) else {
            return Vec::new();
        };
        let hash = entry.header.hash();
        if self.by_hash.get(&hash) == Some(&height) {
            self.by_hash.remove(&hash);
        }
        let root = entry.header.merkle_root();
        if self.by_root.get(&root) == Some(&height) {
            self.by_root.remove(&root);
        }

        let unbound: Vec<Txid> = entry.paths.into_keys().collect();
        for txid in &unbound {
            self.by_txid.remove(txid);
            if self.transactions.contains_key(txid) {
                self.pending.insert(*txid);
            }
        }
        warn!(height, %hash, unbound = unbound.len(), "txdb: header removed");
        unbound
    }

    fn value_of(&self, outpoint: &OutPoint) -> Option<u64> {
        self.transactions
            .get(&outpoint.txid)?
            .output
            .get(outpoint.vout as usize)
            .map(|o| o.value.to_sat())
    }

    /// Checks that `header` fits the chain. Returns whether it is already stored.
    fn check_header(&self, header: &HeaderEntry) -> Result<bool, TxDbError> {
        let hash = header.hash();

        if let Some(existing) = self.by_height.get(&header.height) {
            let existing = existing.header.hash();
            if existing != hash {
                return Err(TxDbError::HeaderConflict { height: header.height, existing, incoming: hash });
            }
            return Ok(true);
        }

        if let Some(&height) = self.by_hash.get(&hash) {
            if height != header.height {
                return Err(TxDbError::ChainInconsistent { height: header.height });
            }
        }

        if let Some(prev) = header.height.checked_sub(1).and_then(|h| self.by_height.get(&h)) {
            if prev.header.hash() != header.prev_hash() {
                return Err(TxDbError::ChainInconsistent { height: header.height });
            }
        }

        if let Some((height, next)) = header
            .height
            .checked_add(1)
            .and_then(|h| self.by_height.get(&h).map(|next| (h, next)))
        {
            if next.header.prev_hash() != hash {
                return Err(TxDbError::ChainInconsistent { height });
            }
        }

        Ok(false)
    }

    fn bind_header(&mut self, header: &HeaderEntry) {
        self.by_height
            .entry(header.height)
            .or_insert_with(|| HeightEntry { header: *header, paths: BTreeMap::new() });
        self.by_hash.insert(header.hash(), header.height);
        self.by_root.insert(header.merkle_root(), header.height);
    }

    fn rays(&self, outpoints: Option<&BTreeSet<OutPoint>>) -> Result<BTreeSet<Ray>, TxDbError> {
        let mut rays = BTreeSet::new();
        for outpoint in outpoints.into_iter().flatten() {
            let vertex = self.lookup(&outpoint.txid);
            if !vertex.valid() {
                debug!(%outpoint, "txdb: skipping output of unconfirmed tx");
                continue;
            }
            rays.insert(Ray::from_output(&vertex, *outpoint)?);
        }
        Ok(rays)
    }
}

impl TxDb for LocalTxDb {
    fn vertex(&mut self, txid: &Txid) -> Result<Vertex, TxDbError> {
        Ok(self.lookup(txid))
    }

    fn by_address(&self, address: &Address) -> Result<BTreeSet<Ray>, TxDbError> {
        self.rays(self.addresses.get(&address.to_string()))
    }

    fn by_script_hash(&self, script_hash: &ScriptHash) -> Result<BTreeSet<Ray>, TxDbError> {
        self.rays(self.scripts.get(script_hash))
    }

    fn redeeming(&self, outpoint: &OutPoint) -> Result<Option<Ray>, TxDbError> {
        let Some(inpoint) = self.redeems.get(outpoint) else {
            return Ok(None);
        };
        let vertex = self.lookup(&inpoint.txid);
        if !vertex.valid() {
            debug!(%outpoint, %inpoint, "txdb: redeemer not yet confirmed");
            return Ok(None);
        }
        let value = self.value_of(outpoint).unwrap_or_default();
        Ray::from_input(&vertex, *inpoint, value).map(Some)
    }
}

impl WritableTxDb for LocalTxDb {
    fn import(
        &mut self,
        tx: &Transaction,
        path: &MerklePath,
        header: &HeaderEntry,
    ) -> Result<Imported, TxDbError> {
        let txid = tx.compute_txid();
        let root = header.merkle_root();

        if !path.verify(&txid, &root) {
            warn!(%txid, %root, height = header.height, "txdb: proof does not verify");
            return Err(TxDbError::InvalidProof { txid, root });
        }

        let header_known = self.check_header(header)?;

        let bound_here = self.by_txid.get(&txid) == Some(&header.height);
        if header_known && bound_here && self.transactions.contains_key(&txid) {
            return Ok(Imported::AlreadyKnown);
        }

        // Validation done; from here on nothing can fail.
        if let Some(old) = self.by_txid.get(&txid).copied().filter(|h| *h != header.height) {
            warn!(%txid, old, new = header.height, "txdb: rebinding tx to a different block");
            if let Some(entry) = self.by_height.get_mut(&old) {
                entry.paths.remove(&txid);
            }
        }

        self.bind_header(header);
        if let Some(entry) = self.by_height.get_mut(&header.height) {
            entry.paths.insert(txid, path.clone());
        }
        self.by_txid.insert(txid, header.height);
        self.transactions.insert(txid, tx.clone());
        self.pending.remove(&txid);

        debug!(%txid, height = header.height, index = path.index, "txdb: imported");
        Ok(Imported::New)
    }

    fn insert_pending(&mut self, tx: &Transaction) {
        let txid = tx.compute_txid();
        if self.by_txid.contains_key(&txid) {
            return;
        }
        self.transactions.insert(txid, tx.clone());
        self.pending.insert(txid);
        debug!(%txid, "txdb: pending");
    }

    fn add_address(&mut self, address: &Address, outpoint: OutPoint) {
        if self.addresses.entry(address.to_string()).or_default().insert(outpoint) {
            debug!(%address, %outpoint, "txdb: indexed address");
        }
    }

    fn add_script(&mut self, script_hash: ScriptHash, outpoint: OutPoint) {
        if self.scripts.entry(script_hash).or_default().insert(outpoint) {
            debug!(%script_hash, %outpoint, "txdb: indexed script");
        }
    }

    fn set_redeem(&mut self, outpoint: OutPoint, inpoint: InPoint) -> Result<(), TxDbError> {
        match self.redeems.get(&outpoint) {
            Some(existing) if *existing == inpoint => Ok(()),
            Some(existing) => {
                warn!(%outpoint, %existing, incoming = %inpoint, "txdb: second redeemer rejected");
                Err(TxDbError::DuplicateRedeem { outpoint, existing: *existing })
            }
            None => {
                self.redeems.insert(outpoint, inpoint);
                Ok(())
            }
        }
    }

    fn pending(&self) -> BTreeSet<Txid> {
        self.pending.clone()
    }

    fn remove(&mut self, txid: &Txid) -> bool {
        let mut removed = self.transactions.remove(txid).is_some();
        removed |= self.pending.remove(txid);
        if let Some(height) = self.by_txid.remove(txid) {
            if let Some(entry) = self.by_height.get_mut(&height) {
                entry.paths.remove(txid);
            }
            removed = true;
        }
        if removed {
            debug!(%txid, "txdb: removed");
        }
        removed
    }

    fn transaction(&self, txid: &Txid) -> Option<Transaction> {
        self.transactions.get(txid).cloned()
    }

    fn header_by_height(&self, height: u64) -> Option<HeaderEntry> {
        self.by_height.get(&height).map(|e| e.header)
    }

    fn header_by_hash(&self, hash: &BlockHash) -> Option<HeaderEntry> {
        self.by_hash.get(hash).and_then(|h| self.header_by_height(*h))
    }

    fn header_by_root(&self, root: &TxMerkleNode) -> Option<HeaderEntry> {
        self.by_root.get(root).and_then(|h| self.header_by_height(*h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Chain, address, spend, tx};

    // ------------------------------------------------------------------
    // import
    // ------------------------------------------------------------------

    #[test]
    fn import_then_lookup_is_valid() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000]), tx(2, &[6_000])]);
        let mut db = LocalTxDb::new();

        let (t, path) = block.proof(1);
        assert_eq!(db.import(&t, &path, &block.header), Ok(Imported::New));

        let v = db.lookup(&t.compute_txid());
        assert!(v.valid());
        assert_eq!(v.index(), Some(1));
        assert_eq!(db.header_by_height(block.header.height), Some(block.header));
        assert_eq!(db.header_by_hash(&block.header.hash()), Some(block.header));
        assert_eq!(db.header_by_root(&block.header.merkle_root()), Some(block.header));
    }

    #[test]
    fn import_twice_is_idempotent() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000])]);
        let mut db = LocalTxDb::new();
        let (t, path) = block.proof(0);

        db.import(&t, &path, &block.header).unwrap();
        let snapshot = db.clone();
        assert_eq!(db.import(&t, &path, &block.header), Ok(Imported::AlreadyKnown));
        assert_eq!(db, snapshot);
    }

    #[test]
    fn invalid_proof_leaves_store_unchanged() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000]), tx(2, &[1])]);
        let mut db = LocalTxDb::new();
        let (good, good_path) = block.proof(0);
        db.import(&good, &good_path, &block.header).unwrap();
        let snapshot = db.clone();

        let (other, _) = block.proof(1);
        let result = db.import(&other, &good_path, &block.header);
        assert!(matches!(result, Err(TxDbError::InvalidProof { .. })));
        assert_eq!(db, snapshot);
    }

    #[test]
    fn import_clears_pending() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000])]);
        let mut db = LocalTxDb::new();
        let (t, path) = block.proof(0);

        db.insert_pending(&t);
        assert!(db.pending().contains(&t.compute_txid()));
        assert!(!db.lookup(&t.compute_txid()).valid());

        db.import(&t, &path, &block.header).unwrap();
        assert!(db.pending().is_empty());
        assert!(db.lookup(&t.compute_txid()).valid());
    }

    #[test]
    fn pending_ignored_for_confirmed_tx() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000])]);
        let mut db = LocalTxDb::new();
        let (t, path) = block.proof(0);
        db.import(&t, &path, &block.header).unwrap();
        db.insert_pending(&t);
        assert!(db.pending().is_empty());
    }

    // ------------------------------------------------------------------
    // Header chain
    // ------------------------------------------------------------------

    #[test]
    fn competing_header_at_same_height_conflicts() {
        let mut chain = Chain::new();
        let a = chain.mine(vec![tx(1, &[1])]);
        let mut fork = Chain::starting_at(a.header.height);
        let b = fork.mine(vec![tx(2, &[1])]);
        let mut db = LocalTxDb::new();

        let (ta, pa) = a.proof(0);
        db.import(&ta, &pa, &a.header).unwrap();
        let snapshot = db.clone();

        let (tb, pb) = b.proof(0);
        assert!(matches!(
            db.import(&tb, &pb, &b.header),
            Err(TxDbError::HeaderConflict { .. })
        ));
        assert_eq!(db, snapshot);
    }

    #[test]
    fn broken_link_is_chain_inconsistent() {
        let mut chain = Chain::new();
        let a = chain.mine(vec![tx(1, &[1])]);
        let mut fork = Chain::starting_at(a.header.height + 1);
        let b = fork.mine(vec![tx(2, &[1])]);
        let mut db = LocalTxDb::new();

        let (ta, pa) = a.proof(0);
        db.import(&ta, &pa, &a.header).unwrap();

        let (tb, pb) = b.proof(0);
        assert_eq!(
            db.import(&tb, &pb, &b.header),
            Err(TxDbError::ChainInconsistent { height: b.header.height })
        );
    }

    #[test]
    fn latest_and_previous() {
        let mut chain = Chain::new();
        let a = chain.mine(vec![tx(1, &[1])]);
        let b = chain.mine(vec![tx(2, &[1])]);
        let mut db = LocalTxDb::new();

        for block in [&a, &b] {
            let (t, p) = block.proof(0);
            db.import(&t, &p, &block.header).unwrap();
        }
        assert_eq!(db.latest(), Some(b.header));
        assert_eq!(db.previous(&b.header), Some(a.header));
        assert_eq!(db.previous(&a.header), None);
    }

    #[test]
    fn insert_header_without_proof() {
        let mut chain = Chain::new();
        let a = chain.mine(vec![tx(1, &[1])]);
        let mut db = LocalTxDb::new();
        assert_eq!(db.insert_header(&a.header), Ok(Imported::New));
        assert_eq!(db.insert_header(&a.header), Ok(Imported::AlreadyKnown));
        assert_eq!(db.header_count(), 1);
        assert_eq!(db.transaction_count(), 0);
    }

    #[test]
    fn header_at_max_height_is_not_a_panic() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[1])]);
        let top = HeaderEntry::new(u64::MAX, block.header.header);
        let (t, p) = block.proof(0);
        let mut db = LocalTxDb::new();

        assert_eq!(db.import(&t, &p, &top), Ok(Imported::New));
        assert_eq!(db.latest(), Some(top));
        assert_eq!(db.import(&t, &p, &top), Ok(Imported::AlreadyKnown));
    }

    #[test]
    fn reorged_header_can_be_replaced() {
        let shared = tx(1, &[1]);
        let a = Chain::new().mine(vec![shared.clone(), tx(2, &[1])]);
        let competing = Chain::new().mine(vec![shared.clone(), tx(3, &[1])]);
        let txid = shared.compute_txid();
        let mut db = LocalTxDb::new();

        let (t, p) = a.proof(0);
        db.import(&t, &p, &a.header).unwrap();
        let (t2, p2) = competing.proof(0);
        assert!(matches!(
            db.import(&t2, &p2, &competing.header),
            Err(TxDbError::HeaderConflict { height: 1, .. })
        ));

        assert_eq!(db.remove_header(a.header.height), vec![txid]);
        assert_eq!(db.header_count(), 0);
        assert!(db.header_by_hash(&a.header.hash()).is_none());
        assert!(db.header_by_root(&a.header.merkle_root()).is_none());
        assert!(!db.lookup(&txid).valid());
        assert!(db.pending().contains(&txid));

        assert_eq!(db.import(&t2, &p2, &competing.header), Ok(Imported::New));
        assert_eq!(db.lookup(&txid).index(), Some(0));
        assert_eq!(db.header_by_height(1), Some(competing.header));
        assert!(db.pending().is_empty());
    }

    #[test]
    fn remove_unknown_header_is_noop() {
        let mut db = LocalTxDb::new();
        assert!(db.remove_header(7).is_empty());
        assert_eq!(db, LocalTxDb::new());
    }

    // ------------------------------------------------------------------
    // Indices
    // ------------------------------------------------------------------

    #[test]
    fn by_address_returns_output_rays() {
        let mut chain = Chain::new();
        let funding = tx(1, &[5_000, 7_000]);
        let block = chain.mine(vec![funding.clone()]);
        let mut db = LocalTxDb::new();
        let (t, p) = block.proof(0);
        db.import(&t, &p, &block.header).unwrap();

        let addr = address(1);
        let txid = funding.compute_txid();
        db.add_address(&addr, OutPoint::new(txid, 0));
        db.add_address(&addr, OutPoint::new(txid, 1));
        db.add_address(&addr, OutPoint::new(txid, 1));

        let rays = db.by_address(&addr).unwrap();
        let values: Vec<u64> = rays.iter().map(Ray::value).collect();
        assert_eq!(values, vec![5_000, 7_000]);
        assert!(db.by_address(&address(2)).unwrap().is_empty());
    }

    #[test]
    fn by_script_hash_returns_output_rays() {
        let mut chain = Chain::new();
        let funding = tx(1, &[5_000]);
        let block = chain.mine(vec![funding.clone()]);
        let mut db = LocalTxDb::new();
        let (t, p) = block.proof(0);
        db.import(&t, &p, &block.header).unwrap();

        let hash = ScriptHash::from_script(&funding.output[0].script_pubkey);
        db.add_script(hash, OutPoint::new(funding.compute_txid(), 0));
        assert_eq!(db.by_script_hash(&hash).unwrap().len(), 1);
    }

    #[test]
    fn unconfirmed_outputs_are_skipped() {
        let pending = tx(1, &[5_000]);
        let mut db = LocalTxDb::new();
        db.insert_pending(&pending);
        db.add_address(&address(1), OutPoint::new(pending.compute_txid(), 0));
        assert!(db.by_address(&address(1)).unwrap().is_empty());
    }

    #[test]
    fn redeeming_returns_input_ray_with_spent_value() {
        let mut chain = Chain::new();
        let funding = tx(1, &[5_000]);
        let op = OutPoint::new(funding.compute_txid(), 0);
        let spender = spend(&[op], &[4_000]);
        let block = chain.mine(vec![funding.clone(), spender.clone()]);
        let mut db = LocalTxDb::new();
        for i in 0..2 {
            let (t, p) = block.proof(i);
            db.import(&t, &p, &block.header).unwrap();
        }

        assert_eq!(db.redeeming(&op).unwrap(), None);
        let ip = InPoint::new(spender.compute_txid(), 0);
        db.set_redeem(op, ip).unwrap();

        let ray = db.redeeming(&op).unwrap().unwrap();
        assert_eq!(ray.inpoint(), Some(ip));
        assert_eq!(ray.value(), 5_000);
    }

    #[test]
    fn second_redeemer_is_rejected() {
        let op = OutPoint::new(tx(1, &[1]).compute_txid(), 0);
        let first = InPoint::new(tx(2, &[1]).compute_txid(), 0);
        let second = InPoint::new(tx(3, &[1]).compute_txid(), 0);
        let mut db = LocalTxDb::new();

        db.set_redeem(op, first).unwrap();
        db.set_redeem(op, first).unwrap();
        assert_eq!(
            db.set_redeem(op, second),
            Err(TxDbError::DuplicateRedeem { outpoint: op, existing: first })
        );
        assert_eq!(db.redeems.get(&op), Some(&first));
    }

    // ------------------------------------------------------------------
    // remove
    // ------------------------------------------------------------------

    #[test]
    fn remove_cascades() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[1])]);
        let mut db = LocalTxDb::new();
        let (t, p) = block.proof(0);
        let txid = t.compute_txid();
        db.import(&t, &p, &block.header).unwrap();

        assert!(db.remove(&txid));
        assert!(!db.lookup(&txid).valid());
        assert!(db.transaction(&txid).is_none());
        assert_eq!(db.confirmed().count(), 0);
        // Headers stay.
        assert_eq!(db.header_count(), 1);
        assert!(!db.remove(&txid));
    }

    #[test]
    fn remove_pending() {
        let t = tx(1, &[1]);
        let mut db = LocalTxDb::new();
        db.insert_pending(&t);
        assert!(db.remove(&t.compute_txid()));
        assert!(db.pending().is_empty());
    }

    #[test]
    fn output_and_value_helpers() {
        let mut chain = Chain::new();
        let block = chain.mine(vec![tx(1, &[5_000])]);
        let mut db = LocalTxDb::new();
        let (t, p) = block.proof(0);
        db.import(&t, &p, &block.header).unwrap();

        let op = OutPoint::new(t.compute_txid(), 0);
        assert_eq!(db.value(&op), Ok(Some(5_000)));
        assert_eq!(db.value(&OutPoint::new(t.compute_txid(), 4)), Ok(None));
    }
}

//! A transaction paired with its proof of inclusion in a block.

use std::cmp::Ordering;

use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};

use crate::error::TxDbError;
use crate::merkle::MerklePath;
use crate::types::HeaderEntry;

/// Where a transaction was mined: the header and the path to its root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub header: HeaderEntry,
    pub path: MerklePath,
}

impl Confirmation {
    pub fn new(header: HeaderEntry, path: MerklePath) -> Self {
        Self { header, path }
    }

    pub fn verify(&self, txid: &Txid) -> bool {
        self.path.verify(txid, &self.header.merkle_root())
    }

    /// Position in the chain: height, then index within the block.
    pub fn position(&self) -> (u64, u64) {
        (self.header.height, self.path.index)
    }
}

/// A transaction with an optional confirmation.
///
/// A vertex returned by a lookup may be empty or unconfirmed; callers check
/// [`valid`](Self::valid) before relying on it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Vertex {
    pub transaction: Option<Transaction>,
    pub confirmation: Option<Confirmation>,
}

impl Vertex {
    pub fn confirmed(transaction: Transaction, confirmation: Confirmation) -> Self {
        Self { transaction: Some(transaction), confirmation: Some(confirmation) }
    }

    pub fn unconfirmed(transaction: Transaction) -> Self {
        Self { transaction: Some(transaction), confirmation: None }
    }

    pub fn txid(&self) -> Option<Txid> {
        self.transaction.as_ref().map(Transaction::compute_txid)
    }

    /// The transaction is present and its path verifies against its header.
    pub fn valid(&self) -> bool {
        match (&self.transaction, &self.confirmation) {
            (Some(tx), Some(c)) => c.verify(&tx.compute_txid()),
            _ => false,
        }
    }

    /// Timestamp of the confirming block.
    pub fn when(&self) -> Option<u32> {
        self.confirmation.as_ref().map(|c| c.header.timestamp())
    }

    /// Index of the transaction in its block.
    pub fn index(&self) -> Option<u64> {
        self.confirmation.as_ref().map(|c| c.path.index)
    }

    /// Order two vertices by chain position.
    ///
    /// Fails with [`TxDbError::UnconfirmedOrdering`] if either side is not
    /// [`valid`](Self::valid).
    pub fn try_cmp(&self, other: &Vertex) -> Result<Ordering, TxDbError> {
        match (self.position(), other.position()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(TxDbError::UnconfirmedOrdering),
        }
    }

    /// Same transaction confirmed at the same place.
    pub fn try_eq(&self, other: &Vertex) -> Result<bool, TxDbError> {
        if !self.valid() || !other.valid() {
            return Err(TxDbError::UnconfirmedOrdering);
        }
        Ok(self.transaction == other.transaction && self.confirmation == other.confirmation)
    }

    fn position(&self) -> Option<(u64, u64)> {
        if !self.valid() {
            return None;
        }
        self.confirmation.as_ref().map(Confirmation::position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::MerkleTree;
    use bitcoin::absolute::LockTime;
    use bitcoin::block::{self, Header};
    use bitcoin::hashes::Hash;
    use bitcoin::pow::CompactTarget;
    use bitcoin::{Amount, BlockHash, ScriptBuf, TxIn, TxOut, transaction};

    fn tx(tag: u64) -> Transaction {
        Transaction {
            version: transaction::Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn::default()],
            output: vec![TxOut { value: Amount::from_sat(tag), script_pubkey: ScriptBuf::new() }],
        }
    }

    /// A block at `height` containing `txs`; returns a vertex for each.
    fn block(height: u64, txs: Vec<Transaction>) -> Vec<Vertex> {
        let ids: Vec<Txid> = txs.iter().map(Transaction::compute_txid).collect();
        let tree = MerkleTree::from_txids(&ids);
        let header = Header {
            version: block::Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: tree.root(),
            time: 1_700_000_000 + height as u32,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };
        let entry = HeaderEntry::new(height, header);
        txs.into_iter()
            .enumerate()
            .map(|(i, tx)| Vertex::confirmed(tx, Confirmation::new(entry, tree.path(i).unwrap())))
            .collect()
    }

    #[test]
    fn confirmed_vertex_is_valid() {
        let v = block(10, vec![tx(1), tx(2)]);
        assert!(v[0].valid());
        assert!(v[1].valid());
        assert_eq!(v[1].index(), Some(1));
        assert_eq!(v[0].when(), Some(1_700_000_010));
    }

    #[test]
    fn default_vertex_is_invalid() {
        let v = Vertex::default();
        assert!(!v.valid());
        assert!(v.txid().is_none());
    }

    #[test]
    fn unconfirmed_vertex_is_invalid() {
        assert!(!Vertex::unconfirmed(tx(1)).valid());
    }

    #[test]
    fn wrong_path_is_invalid() {
        let mut v = block(10, vec![tx(1), tx(2)]);
        let other = v[1].confirmation.clone().unwrap();
        v[0].confirmation = Some(other);
        assert!(!v[0].valid());
    }

    // --- Ordering ---

    #[test]
    fn orders_by_height_then_index() {
        let early = block(5, vec![tx(1), tx(2)]);
        let late = block(6, vec![tx(3)]);
        assert_eq!(early[0].try_cmp(&early[1]), Ok(Ordering::Less));
        assert_eq!(late[0].try_cmp(&early[1]), Ok(Ordering::Greater));
        assert_eq!(early[1].try_cmp(&early[1]), Ok(Ordering::Equal));
    }

    #[test]
    fn ordering_unconfirmed_fails() {
        let v = block(5, vec![tx(1)]);
        let u = Vertex::unconfirmed(tx(2));
        assert_eq!(v[0].try_cmp(&u), Err(TxDbError::UnconfirmedOrdering));
        assert_eq!(u.try_cmp(&v[0]), Err(TxDbError::UnconfirmedOrdering));
        assert_eq!(u.try_eq(&u), Err(TxDbError::UnconfirmedOrdering));
    }

    #[test]
    fn equality_of_valid_vertices() {
        let v = block(5, vec![tx(1), tx(2)]);
        assert_eq!(v[0].try_eq(&v[0].clone()), Ok(true));
        assert_eq!(v[0].try_eq(&v[1]), Ok(false));
    }
}

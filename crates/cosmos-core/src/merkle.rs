//! Bitcoin Merkle trees and single-transaction inclusion paths.
//!
//! Leaves are transaction ids in internal byte order. An internal node is
//! `SHA256d(left || right)`. A layer with an odd number of nodes pairs its
//! last node with itself, which a path records as a [`Step::Duplicate`]
//! rather than repeating the hash.

use bitcoin::hashes::Hash;
use bitcoin::{TxMerkleNode, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Double SHA-256 of `data`.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

/// The leaf node for a transaction id.
pub fn leaf(txid: &Txid) -> TxMerkleNode {
    TxMerkleNode::from_byte_array(txid.to_byte_array())
}

/// Compute an internal node: `SHA256d(left || right)`.
pub fn node_hash(left: &TxMerkleNode, right: &TxMerkleNode) -> TxMerkleNode {
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(left.as_byte_array());
    data[32..].copy_from_slice(right.as_byte_array());
    TxMerkleNode::from_byte_array(sha256d(&data))
}

/// Compute the Merkle root of a block's transaction ids.
///
/// Returns an all-zero node for an empty slice; no valid block is empty.
pub fn merkle_root(txids: &[Txid]) -> TxMerkleNode {
    if txids.is_empty() {
        return TxMerkleNode::all_zeros();
    }

    let mut current: Vec<TxMerkleNode> = txids.iter().map(leaf).collect();

    while current.len() > 1 {
        current = next_layer(&current);
    }

    current[0]
}

fn next_layer(layer: &[TxMerkleNode]) -> Vec<TxMerkleNode> {
    layer
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            node_hash(left, pair.get(1).unwrap_or(left))
        })
        .collect()
}

/// Full Merkle tree over a block's transactions, for extracting paths.
#[derive(Clone, Debug)]
pub struct MerkleTree {
    txids: Vec<Txid>,
    /// `layers[0]` = leaves, `layers[last]` = `[root]`.
    layers: Vec<Vec<TxMerkleNode>>,
}

impl MerkleTree {
    pub fn from_txids(txids: &[Txid]) -> Self {
        if txids.is_empty() {
            return Self { txids: Vec::new(), layers: Vec::new() };
        }

        let mut layers = vec![txids.iter().map(leaf).collect::<Vec<_>>()];
        while let Some(top) = layers.last().filter(|l| l.len() > 1) {
            let next = next_layer(top);
            layers.push(next);
        }

        Self { txids: txids.to_vec(), layers }
    }

    pub fn root(&self) -> TxMerkleNode {
        self.layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or_else(TxMerkleNode::all_zeros)
    }

    pub fn len(&self) -> usize {
        self.txids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.txids.is_empty()
    }

    pub fn txids(&self) -> &[Txid] {
        &self.txids
    }

    /// Inclusion path for the transaction at `index`, or `None` if out of bounds.
    pub fn path(&self, index: usize) -> Option<MerklePath> {
        if index >= self.txids.len() {
            return None;
        }

        let mut branch = Vec::with_capacity(self.layers.len().saturating_sub(1));
        let mut pos = index;

        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = pos ^ 1;
            branch.push(match layer.get(sibling) {
                Some(hash) => Step::Hash(*hash),
                None => Step::Duplicate,
            });
            pos /= 2;
        }

        Some(MerklePath { index: index as u64, branch })
    }

    /// Inclusion path for `txid`, if it is in the tree.
    pub fn path_for(&self, txid: &Txid) -> Option<MerklePath> {
        let index = self.txids.iter().position(|t| t == txid)?;
        self.path(index)
    }
}

/// One level of a Merkle path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    /// The sibling node's hash.
    Hash(TxMerkleNode),
    /// The node is last in an odd layer and is paired with itself.
    Duplicate,
}

/// Inclusion path for a single transaction: its position in the block and
/// the sibling at every level from the leaves up.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    pub index: u64,
    pub branch: Vec<Step>,
}

impl MerklePath {
    pub fn new(index: u64, branch: Vec<Step>) -> Self {
        Self { index, branch }
    }

    /// Recompute the root this path commits `txid` to.
    ///
    /// Returns `None` for a structurally impossible path: a duplicate step
    /// on a right-hand node, or an index that does not fit in the tree.
    pub fn root(&self, txid: &Txid) -> Option<TxMerkleNode> {
        let mut current = leaf(txid);
        let mut pos = self.index;

        for step in &self.branch {
            current = match step {
                Step::Hash(sibling) if pos & 1 == 0 => node_hash(&current, sibling),
                Step::Hash(sibling) => node_hash(sibling, &current),
                Step::Duplicate if pos & 1 == 0 => node_hash(&current, &current),
                Step::Duplicate => return None,
            };
            pos >>= 1;
        }

        (pos == 0).then_some(current)
    }

    /// Whether this path commits `txid` to `root`.
    pub fn verify(&self, txid: &Txid, root: &TxMerkleNode) -> bool {
        self.root(txid).is_some_and(|r| r == *root)
    }

    /// Number of levels below the root.
    pub fn depth(&self) -> usize {
        self.branch.len()
    }
}

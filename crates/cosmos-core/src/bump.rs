//! Compact multi-transaction Merkle proofs (BUMP, BRC-74).
//!
//! One tree per block height shared by every proven transaction in that
//! block. `path[0]` holds the leaves; `path[n]` holds the nodes at level `n`
//! needed to recompute the root. Nodes that can be derived from the level
//! below are omitted.

use std::collections::BTreeMap;

use bitcoin::hashes::Hash;
use bitcoin::{TxMerkleNode, Txid};
use serde::{Deserialize, Serialize};

use crate::merkle::{MerklePath, Step, leaf, node_hash};

fn is_false(b: &bool) -> bool {
    !*b
}

/// One node stored in a [`Bump`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BumpLeaf {
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<TxMerkleNode>,
    /// This leaf is a transaction the proof is about.
    #[serde(default, skip_serializing_if = "is_false")]
    pub txid: bool,
    /// This node is the last of an odd layer and pairs with itself.
    #[serde(default, skip_serializing_if = "is_false")]
    pub duplicate: bool,
}

impl BumpLeaf {
    fn hash(offset: u64, hash: TxMerkleNode) -> Self {
        Self { offset, hash: Some(hash), txid: false, duplicate: false }
    }

    fn client(offset: u64, hash: TxMerkleNode) -> Self {
        Self { offset, hash: Some(hash), txid: true, duplicate: false }
    }

    fn duplicate(offset: u64) -> Self {
        Self { offset, hash: None, txid: false, duplicate: true }
    }
}

/// A compact Merkle proof for several transactions in one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bump {
    pub block_height: u64,
    pub path: Vec<Vec<BumpLeaf>>,
}

impl Bump {
    /// Merge single-transaction paths into one tree.
    ///
    /// Returns `None` if `paths` is empty, if any path is malformed, or if
    /// the paths do not all commit to the same root.
    pub fn from_paths(block_height: u64, paths: &[(Txid, MerklePath)]) -> Option<Self> {
        let (first_txid, first_path) = paths.first()?;
        let depth = first_path.depth();
        let root = first_path.root(first_txid)?;

        let mut levels: Vec<BTreeMap<u64, BumpLeaf>> = vec![BTreeMap::new(); depth.max(1)];

        for (txid, path) in paths {
            if path.depth() != depth || path.root(txid)? != root {
                return None;
            }

            let node = leaf(txid);
            levels[0]
                .entry(path.index)
                .and_modify(|l| *l = BumpLeaf::client(path.index, node))
                .or_insert_with(|| BumpLeaf::client(path.index, node));

            for (level, step) in path.branch.iter().enumerate() {
                let offset = (path.index >> level) ^ 1;
                levels[level].entry(offset).or_insert_with(|| match step {
                    Step::Hash(hash) => BumpLeaf::hash(offset, *hash),
                    Step::Duplicate => BumpLeaf::duplicate(offset),
                });
            }
        }

        // Drop interior nodes that the level below already determines.
        for level in 1..levels.len() {
            let (below, rest) = levels.split_at_mut(level);
            let below: &[BTreeMap<u64, BumpLeaf>] = below;
            let redundant: Vec<u64> = rest[0]
                .values()
                .filter(|l| !l.duplicate)
                .map(|l| l.offset)
                .filter(|o| derivable(below, level - 1, o * 2) && derivable(below, level - 1, o * 2 + 1))
                .collect();
            for offset in redundant {
                rest[0].remove(&offset);
            }
        }

        Some(Self {
            block_height,
            path: levels.into_iter().map(|l| l.into_values().collect()).collect(),
        })
    }

    /// Number of levels below the root.
    ///
    /// A single-transaction block has one leaf and no levels; any larger tree
    /// carries at least two leaves at level 0.
    pub fn depth(&self) -> usize {
        match self.path.as_slice() {
            [only] if only.len() <= 1 => 0,
            levels => levels.len(),
        }
    }

    fn leaf_at(&self, level: usize, offset: u64) -> Option<&BumpLeaf> {
        let leaves = self.path.get(level)?;
        leaves
            .binary_search_by_key(&offset, |l| l.offset)
            .ok()
            .map(|i| &leaves[i])
    }

    fn node_at(&self, level: usize, offset: u64) -> Option<TxMerkleNode> {
        if let Some(l) = self.leaf_at(level, offset) {
            if l.duplicate {
                // Only a right-hand node may duplicate its left sibling.
                return if offset & 1 == 1 { self.node_at(level, offset ^ 1) } else { None };
            }
            if let Some(hash) = l.hash {
                return Some(hash);
            }
        }
        if level == 0 {
            return None;
        }
        let left = self.node_at(level - 1, offset * 2)?;
        let right = self.node_at(level - 1, offset * 2 + 1)?;
        Some(node_hash(&left, &right))
    }

    /// The Merkle root this proof commits to.
    pub fn root(&self) -> Option<TxMerkleNode> {
        self.node_at(self.depth(), 0)
    }

    /// Transactions proven by this tree, in block order.
    pub fn txids(&self) -> Vec<Txid> {
        self.path
            .first()
            .map(|leaves| {
                leaves
                    .iter()
                    .filter(|l| l.txid)
                    .filter_map(|l| l.hash)
                    .map(|h| Txid::from_byte_array(h.to_byte_array()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, txid: &Txid) -> bool {
        self.client_offset(txid).is_some()
    }

    fn client_offset(&self, txid: &Txid) -> Option<u64> {
        let node = leaf(txid);
        self.path
            .first()?
            .iter()
            .find(|l| l.txid && l.hash == Some(node))
            .map(|l| l.offset)
    }

    /// Extract the single-transaction path for `txid`.
    pub fn path(&self, txid: &Txid) -> Option<MerklePath> {
        let index = self.client_offset(txid)?;
        let branch = (0..self.depth())
            .map(|level| {
                let offset = (index >> level) ^ 1;
                match self.leaf_at(level, offset) {
                    Some(l) if l.duplicate => Some(Step::Duplicate),
                    _ => self.node_at(level, offset).map(Step::Hash),
                }
            })
            .collect::<Option<Vec<_>>>()?;
        Some(MerklePath { index, branch })
    }

    /// Every contained transaction's path resolves to one common root.
    pub fn valid(&self) -> bool {
        let Some(root) = self.root() else {
            return false;
        };
        let txids = self.txids();
        !txids.is_empty()
            && txids
                .iter()
                .all(|t| self.path(t).is_some_and(|p| p.verify(t, &root)))
    }
}

fn derivable(levels: &[BTreeMap<u64, BumpLeaf>], level: usize, offset: u64) -> bool {
    if levels[level].contains_key(&offset) {
        return true;
    }
    level > 0
        && derivable(levels, level - 1, offset * 2)
        && derivable(levels, level - 1, offset * 2 + 1)
}

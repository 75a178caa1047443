//! Synthetic chains for unit tests.

use bitcoin::absolute::LockTime;
use bitcoin::block::{self, Header};
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{
    Address, Amount, BlockHash, Network, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction,
    TxIn, TxOut, Witness, transaction,
};

use cosmos_core::merkle::{MerklePath, MerkleTree};
use cosmos_core::types::HeaderEntry;

pub fn address(seed: u8) -> Address {
    Address::p2pkh(PubkeyHash::from_byte_array([seed; 20]), Network::Regtest)
}

fn outputs(seed: u8, values: &[u64]) -> Vec<TxOut> {
    values
        .iter()
        .map(|v| TxOut { value: Amount::from_sat(*v), script_pubkey: address(seed).script_pubkey() })
        .collect()
}

/// A coinbase-like transaction paying `values` to `address(seed)`.
pub fn tx(seed: u8, values: &[u64]) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(vec![seed, 0x51]),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }],
        output: outputs(seed, values),
    }
}

/// A transaction spending `from` into `values`.
pub fn spend(from: &[OutPoint], values: &[u64]) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: from
            .iter()
            .map(|op| TxIn {
                previous_output: *op,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs(0xEE, values),
    }
}

pub struct Block {
    pub header: HeaderEntry,
    pub txs: Vec<Transaction>,
    pub tree: MerkleTree,
}

impl Block {
    pub fn proof(&self, index: usize) -> (Transaction, MerklePath) {
        (self.txs[index].clone(), self.tree.path(index).unwrap())
    }
}

/// Mines linked headers with valid Merkle roots (no proof of work).
pub struct Chain {
    height: u64,
    prev: BlockHash,
}

impl Chain {
    pub fn new() -> Self {
        Self { height: 1, prev: BlockHash::all_zeros() }
    }

    /// A chain whose first block sits at `height` on an unrelated parent.
    pub fn starting_at(height: u64) -> Self {
        Self { height, prev: BlockHash::from_byte_array([0xAB; 32]) }
    }

    pub fn mine(&mut self, txs: Vec<Transaction>) -> Block {
        let ids: Vec<_> = txs.iter().map(Transaction::compute_txid).collect();
        let tree = MerkleTree::from_txids(&ids);
        let header = Header {
            version: block::Version::ONE,
            prev_blockhash: self.prev,
            merkle_root: tree.root(),
            time: 1_700_000_000 + self.height as u32 * 600,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 0,
        };
        let entry = HeaderEntry::new(self.height, header);
        self.prev = entry.hash();
        self.height += 1;
        Block { header: entry, txs, tree }
    }
}

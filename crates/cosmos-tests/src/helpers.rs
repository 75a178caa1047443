//! Shared test helpers: synthetic chains, wallet keys and network doubles.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};

use bitcoin::absolute::LockTime;
use bitcoin::bip32::{Xpriv, Xpub};
use bitcoin::block::{self, Header};
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{
    Address, Amount, BlockHash, Network, OutPoint, PubkeyHash, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Txid, Witness, transaction,
};

use cosmos_core::error::{NetworkError, TxDbError};
use cosmos_core::merkle::{MerklePath, MerkleTree, Step};
use cosmos_core::traits::WritableTxDb;
use cosmos_core::types::{BroadcastError, BroadcastOutcome, FeeRate, HeaderEntry, InPoint, ScriptHash, TxProof};
use cosmos_network::BroadcastProvider;
use cosmos_wallet::AddressSequence;

pub const NETWORK: Network = Network::Regtest;

/// An address nobody in the tests owns.
pub fn stranger(seed: u8) -> Address {
    Address::p2pkh(PubkeyHash::from_byte_array([seed; 20]), NETWORK)
}

/// Receive sequence `m/0` of a master key made from `seed`.
pub fn wallet(seed: u8) -> AddressSequence {
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(NETWORK, &[seed; 32]).expect("valid seed length");
    let key = Xpub::from_priv(&secp, &master);
    AddressSequence::new(key, "m/0".parse().expect("valid path"), NETWORK)
}

fn input(previous_output: OutPoint, marker: u8) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::from_bytes(vec![marker]),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

fn outputs(to: &[(Address, u64)]) -> Vec<TxOut> {
    to.iter()
        .map(|(address, value)| TxOut { value: Amount::from_sat(*value), script_pubkey: address.script_pubkey() })
        .collect()
}

/// A coinbase-like transaction; `marker` keeps txids distinct.
pub fn pay(marker: u8, to: &[(Address, u64)]) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: vec![input(OutPoint::null(), marker)],
        output: outputs(to),
    }
}

/// A transaction spending `from` into `to`.
pub fn spend(from: &[OutPoint], to: &[(Address, u64)]) -> Transaction {
    Transaction {
        version: transaction::Version::ONE,
        lock_time: LockTime::ZERO,
        input: from.iter().map(|op| input(*op, 0)).collect(),
        output: outputs(to),
    }
}

pub fn outpoint(tx: &Transaction, vout: u32) -> OutPoint {
    OutPoint::new(tx.compute_txid(), vout)
}

pub struct Block {
    pub header: HeaderEntry,
    pub txs: Vec<Transaction>,
    pub tree: MerkleTree,
}

impl Block {
    pub fn proof(&self, index: usize) -> (Transaction, MerklePath) {
        let path = self.tree.path(index).expect("index within block");
        (self.txs[index].clone(), path)
    }

    pub fn txid(&self, index: usize) -> Txid {
        self.txs[index].compute_txid()
    }
}

/// Mines linked headers with valid Merkle roots. There is no proof of work.
pub struct Chain {
    height: u64,
    prev: BlockHash,
    time: u32,
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl Chain {
    pub fn new() -> Self {
        Self { height: 1, prev: BlockHash::all_zeros(), time: 1_700_000_000 }
    }

    pub fn mine(&mut self, txs: Vec<Transaction>) -> Block {
        let ids: Vec<_> = txs.iter().map(Transaction::compute_txid).collect();
        let tree = MerkleTree::from_txids(&ids);
        let header = Header {
            version: block::Version::ONE,
            prev_blockhash: self.prev,
            merkle_root: tree.root(),
            time: self.time,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: self.height as u32,
        };
        let entry = HeaderEntry::new(self.height, header);
        self.prev = entry.hash();
        self.height += 1;
        self.time += 600;
        Block { header: entry, txs, tree }
    }
}

/// Import every transaction of `block` and index it the way a wallet
/// would: outputs under their address and script hash, inputs as the
/// redeemers of what they spend.
pub fn record<D: WritableTxDb + ?Sized>(db: &mut D, block: &Block) -> Result<(), TxDbError> {
    for i in 0..block.txs.len() {
        let (tx, path) = block.proof(i);
        db.import(&tx, &path, &block.header)?;
        let txid = tx.compute_txid();

        for (vout, out) in tx.output.iter().enumerate() {
            let point = OutPoint::new(txid, vout as u32);
            if let Ok(address) = Address::from_script(&out.script_pubkey, NETWORK) {
                db.add_address(&address, point);
            }
            db.add_script(ScriptHash::from_script(&out.script_pubkey), point);
        }
        for (vin, txin) in tx.input.iter().enumerate() {
            if !txin.previous_output.is_null() {
                db.set_redeem(txin.previous_output, InPoint::new(txid, vin as u32))?;
            }
        }
    }
    Ok(())
}

/// Network double serving whatever was published to it. Broadcasts are
/// accepted unless the txid was marked for rejection.
#[derive(Default)]
pub struct MockNetwork {
    txs: RefCell<BTreeMap<Txid, Transaction>>,
    proofs: RefCell<BTreeMap<Txid, TxProof>>,
    headers: RefCell<BTreeMap<BlockHash, HeaderEntry>>,
    rejected: RefCell<BTreeSet<Txid>>,
    broadcasts: RefCell<Vec<Txid>>,
    failing: Cell<bool>,
    calls: Cell<usize>,
}

impl MockNetwork {
    pub fn publish(&self, block: &Block) {
        let hash = block.header.hash();
        for (i, tx) in block.txs.iter().enumerate() {
            let (_, path) = block.proof(i);
            self.add_transaction(tx);
            self.proofs.borrow_mut().insert(tx.compute_txid(), TxProof { block_hash: hash, path });
        }
        self.headers.borrow_mut().insert(hash, block.header);
    }

    /// Serve `tx` without any proof.
    pub fn add_transaction(&self, tx: &Transaction) {
        self.txs.borrow_mut().insert(tx.compute_txid(), tx.clone());
    }

    /// Replace the first step of the proof served for `txid`.
    pub fn corrupt_proof(&self, txid: &Txid, step: Step) {
        if let Some(proof) = self.proofs.borrow_mut().get_mut(txid) {
            proof.path.branch[0] = step;
        }
    }

    pub fn forget_headers(&self) {
        self.headers.borrow_mut().clear();
    }

    /// Every later fetch fails with a transport error.
    pub fn fail_fetches(&self) {
        self.failing.set(true);
    }

    pub fn reject(&self, txid: Txid) {
        self.rejected.borrow_mut().insert(txid);
    }

    pub fn broadcasts(&self) -> Vec<Txid> {
        self.broadcasts.borrow().clone()
    }

    /// Calls made so far, broadcasts included.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    fn touch(&self) -> Result<(), NetworkError> {
        self.calls.set(self.calls.get() + 1);
        if self.failing.get() {
            return Err(NetworkError::Transport("mock offline".into()));
        }
        Ok(())
    }
}

impl cosmos_core::Network for MockNetwork {
    fn broadcast(&self, tx: &Transaction) -> BroadcastOutcome {
        let txid = tx.compute_txid();
        self.calls.set(self.calls.get() + 1);
        self.broadcasts.borrow_mut().push(txid);
        if self.rejected.borrow().contains(&txid) {
            BroadcastOutcome::Rejected(BroadcastError::InvalidTransaction("mock".into()))
        } else {
            BroadcastOutcome::Accepted
        }
    }

    fn fetch_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, NetworkError> {
        self.touch()?;
        Ok(self.txs.borrow().get(txid).cloned())
    }

    fn fetch_proof(&self, txid: &Txid) -> Result<Option<TxProof>, NetworkError> {
        self.touch()?;
        Ok(self.proofs.borrow().get(txid).cloned())
    }

    fn fetch_header(&self, hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError> {
        self.touch()?;
        Ok(self.headers.borrow().get(hash).copied())
    }

    fn current_fee_rate(&self) -> Result<FeeRate, NetworkError> {
        self.touch()?;
        Ok(FeeRate::new(50, 1000))
    }

    fn historical_price(&self, _timestamp: u32) -> Result<f64, NetworkError> {
        self.touch()?;
        Ok(42.0)
    }
}

/// Broadcast provider with a canned reply.
pub struct ScriptedProvider {
    pub name: &'static str,
    pub trusted: bool,
    pub reply: Result<BroadcastOutcome, NetworkError>,
}

impl ScriptedProvider {
    pub fn boxed(name: &'static str, trusted: bool, reply: Result<BroadcastOutcome, NetworkError>) -> Box<Self> {
        Box::new(Self { name, trusted, reply })
    }

    pub fn offline(name: &'static str) -> Box<Self> {
        Self::boxed(name, true, Err(NetworkError::Transport("connection refused".into())))
    }
}

impl BroadcastProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn trusted(&self) -> bool {
        self.trusted
    }

    fn submit(&self, _raw: &[u8]) -> Result<BroadcastOutcome, NetworkError> {
        self.reply.clone()
    }
}

/// Lookup, fee and price source that knows nothing.
pub struct Offline;

impl cosmos_network::TransactionSource for Offline {
    fn raw_transaction(&self, _txid: &Txid) -> Result<Option<Vec<u8>>, NetworkError> {
        Ok(None)
    }

    fn merkle_proof(&self, _txid: &Txid) -> Result<Option<TxProof>, NetworkError> {
        Ok(None)
    }

    fn header(&self, _hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError> {
        Ok(None)
    }
}

impl cosmos_network::FeeSource for Offline {
    fn fee_rate(&self) -> Result<FeeRate, NetworkError> {
        Err(NetworkError::Unavailable("fee".into()))
    }
}

impl cosmos_network::PriceSource for Offline {
    fn price_at(&self, _timestamp: u32) -> Result<f64, NetworkError> {
        Err(NetworkError::Unavailable("price".into()))
    }
}

/// A redundant network over `providers` with nothing behind its lookups.
pub fn redundant(providers: Vec<Box<dyn BroadcastProvider>>) -> cosmos_network::RedundantNetwork {
    providers
        .into_iter()
        .fold(cosmos_network::RedundantNetwork::new(Box::new(Offline), Box::new(Offline), Box::new(Offline)), |net, p| {
            net.with_broadcaster(p)
        })
}

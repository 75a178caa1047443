//! JSON persistence for [`LocalTxDb`].
//!
//! The document keeps one entry per height carrying either a BUMP (`tree`)
//! or, for a header with no proven transactions, a bare `height`. Raw
//! transactions are base64. Loading re-verifies every tree against its
//! header and rebuilds the hash, root and txid indices from the entries.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bitcoin::block::Header;
use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Transaction, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cosmos_core::bump::Bump;
use cosmos_core::error::TxDbError;
use cosmos_core::types::{HeaderEntry, InPoint, ScriptHash, header_hex};

use crate::local::{HeightEntry, LocalTxDb};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum EntryDocument {
    Proven {
        #[serde(with = "header_hex")]
        header: Header,
        tree: Bump,
    },
    Bare {
        #[serde(with = "header_hex")]
        header: Header,
        height: u64,
    },
}

#[derive(Serialize, Deserialize)]
struct RedeemDocument {
    outpoint: OutPoint,
    inpoint: InPoint,
}

#[derive(Serialize, Deserialize)]
struct StoreDocument {
    by_height: Vec<EntryDocument>,
    by_hash: BTreeMap<String, u64>,
    by_root: BTreeMap<String, u64>,
    txs: BTreeMap<String, String>,
    #[serde(default)]
    addresses: BTreeMap<String, Vec<OutPoint>>,
    #[serde(default)]
    scripts: BTreeMap<String, Vec<OutPoint>>,
    #[serde(default)]
    redeems: Vec<RedeemDocument>,
    #[serde(default)]
    pending: Vec<Txid>,
}

fn bad(msg: impl Into<String>) -> TxDbError {
    TxDbError::Serialization(msg.into())
}

impl LocalTxDb {
    /// Encode the whole store as a JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value, TxDbError> {
        let mut by_height = Vec::with_capacity(self.by_height.len());
        for (height, entry) in &self.by_height {
            let paths: Vec<_> = entry.paths.iter().map(|(t, p)| (*t, p.clone())).collect();
            let doc = match Bump::from_paths(*height, &paths) {
                Some(tree) => EntryDocument::Proven { header: entry.header.header, tree },
                None => EntryDocument::Bare { header: entry.header.header, height: *height },
            };
            by_height.push(doc);
        }

        let doc = StoreDocument {
            by_height,
            by_hash: self.by_hash.iter().map(|(h, n)| (h.to_string(), *n)).collect(),
            by_root: self.by_root.iter().map(|(r, n)| (r.to_string(), *n)).collect(),
            txs: self
                .transactions
                .iter()
                .map(|(t, tx)| (t.to_string(), BASE64.encode(serialize(tx))))
                .collect(),
            addresses: self
                .addresses
                .iter()
                .map(|(a, ops)| (a.clone(), ops.iter().copied().collect()))
                .collect(),
            scripts: self
                .scripts
                .iter()
                .map(|(s, ops)| (s.to_string(), ops.iter().copied().collect()))
                .collect(),
            redeems: self
                .redeems
                .iter()
                .map(|(outpoint, inpoint)| RedeemDocument { outpoint: *outpoint, inpoint: *inpoint })
                .collect(),
            pending: self.pending.iter().copied().collect(),
        };

        serde_json::to_value(doc).map_err(|e| bad(e.to_string()))
    }

    /// Rebuild a store from [`to_json`](Self::to_json) output.
    pub fn from_json(value: serde_json::Value) -> Result<Self, TxDbError> {
        let doc: StoreDocument = serde_json::from_value(value).map_err(|e| bad(e.to_string()))?;
        let mut db = LocalTxDb::new();

        for entry in doc.by_height {
            let (header, paths) = match entry {
                EntryDocument::Bare { header, height } => (HeaderEntry::new(height, header), BTreeMap::new()),
                EntryDocument::Proven { header, tree } => {
                    let header = HeaderEntry::new(tree.block_height, header);
                    let root = header.merkle_root();
                    if !tree.valid() || tree.root() != Some(root) {
                        let txid = tree.txids().first().copied().unwrap_or_else(Txid::all_zeros);
                        return Err(TxDbError::InvalidProof { txid, root });
                    }
                    let mut paths = BTreeMap::new();
                    for txid in tree.txids() {
                        let path = tree.path(&txid).ok_or(TxDbError::InvalidProof { txid, root })?;
                        paths.insert(txid, path);
                    }
                    (header, paths)
                }
            };

            if let Some(prev) = header.height.checked_sub(1).and_then(|h| db.by_height.get(&h)) {
                if prev.header.hash() != header.prev_hash() {
                    return Err(TxDbError::ChainInconsistent { height: header.height });
                }
            }

            for txid in paths.keys() {
                db.by_txid.insert(*txid, header.height);
            }
            db.by_hash.insert(header.hash(), header.height);
            db.by_root.insert(header.merkle_root(), header.height);
            if db.by_height.insert(header.height, HeightEntry { header, paths }).is_some() {
                return Err(bad(format!("duplicate entry at height {}", header.height)));
            }
        }

        check_index("by_hash", &doc.by_hash, db.by_hash.iter().map(|(h, n)| (h.to_string(), *n)))?;
        check_index("by_root", &doc.by_root, db.by_root.iter().map(|(r, n)| (r.to_string(), *n)))?;

        for (key, encoded) in doc.txs {
            let txid: Txid = key.parse().map_err(|_| bad(format!("invalid txid {key}")))?;
            let bytes = BASE64.decode(encoded).map_err(|e| bad(e.to_string()))?;
            let tx: Transaction = deserialize(&bytes)?;
            if tx.compute_txid() != txid {
                return Err(bad(format!("transaction stored under wrong id {txid}")));
            }
            db.transactions.insert(txid, tx);
        }

        for (address, ops) in doc.addresses {
            db.addresses.insert(address, ops.into_iter().collect());
        }
        for (script, ops) in doc.scripts {
            let hash: ScriptHash = script.parse().map_err(|_| bad(format!("invalid script hash {script}")))?;
            db.scripts.insert(hash, ops.into_iter().collect::<BTreeSet<_>>());
        }
        for r in doc.redeems {
            db.redeems.insert(r.outpoint, r.inpoint);
        }
        db.pending = doc.pending.into_iter().collect();

        Ok(db)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, TxDbError> {
        serde_json::to_vec_pretty(&self.to_json()?).map_err(|e| bad(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TxDbError> {
        let value = serde_json::from_slice(bytes).map_err(|e| bad(e.to_string()))?;
        Self::from_json(value)
    }

    /// Write the store to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<(), TxDbError> {
        let bytes = self.to_bytes()?;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| TxDbError::Storage(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| TxDbError::Storage(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| TxDbError::Storage(e.to_string()))?;
        debug!(path = %path.display(), headers = self.header_count(), txs = self.transaction_count(), "txdb: saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TxDbError> {
        let bytes = fs::read(path).map_err(|e| TxDbError::Storage(e.to_string()))?;
        let db = Self::from_bytes(&bytes)?;
        info!(path = %path.display(), headers = db.header_count(), txs = db.transaction_count(), "txdb: loaded");
        Ok(db)
    }
}

fn check_index(
    name: &str,
    stored: &BTreeMap<String, u64>,
    rebuilt: impl Iterator<Item = (String, u64)>,
) -> Result<(), TxDbError> {
    let rebuilt: BTreeMap<String, u64> = rebuilt.collect();
    if *stored != rebuilt {
        return Err(bad(format!("{name} index does not match headers")));
    }
    Ok(())
}

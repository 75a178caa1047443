//! Spendable outputs owned by the wallet.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{OutPoint, TxOut, Txid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WalletError;
use crate::keys::Derivation;

/// An output the wallet can spend and the key that unlocks it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeemable {
    pub prevout: TxOut,
    pub derivation: Derivation,
}

impl Redeemable {
    pub fn value(&self) -> u64 {
        self.prevout.value.to_sat()
    }
}

/// The change one transaction makes to the account: outputs it creates for
/// the wallet and wallet outputs it spends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountDiff {
    pub txid: Txid,
    pub insert: BTreeMap<u32, Redeemable>,
    pub remove: BTreeSet<OutPoint>,
}

impl AccountDiff {
    pub fn new(txid: Txid) -> Self {
        Self { txid, insert: BTreeMap::new(), remove: BTreeSet::new() }
    }

    /// Satoshis this diff adds to the wallet.
    pub fn value(&self) -> u64 {
        self.insert.values().map(Redeemable::value).sum()
    }
}

/// Outputs keyed by transaction, then output index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    utxos: BTreeMap<Txid, BTreeMap<u32, Redeemable>>,
}

impl Account {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, diff: &AccountDiff) {
        for outpoint in &diff.remove {
            if let Some(outputs) = self.utxos.get_mut(&outpoint.txid) {
                outputs.remove(&outpoint.vout);
                if outputs.is_empty() {
                    self.utxos.remove(&outpoint.txid);
                }
            }
        }
        if !diff.insert.is_empty() {
            self.utxos
                .entry(diff.txid)
                .or_default()
                .extend(diff.insert.iter().map(|(vout, r)| (*vout, r.clone())));
        }
        debug!(txid = %diff.txid, inserted = diff.insert.len(), removed = diff.remove.len(), "account: diff applied");
    }

    /// Total satoshis held.
    pub fn value(&self) -> u64 {
        self.outputs().map(|(_, r)| r.value()).sum()
    }

    pub fn len(&self) -> usize {
        self.utxos.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&Redeemable> {
        self.utxos.get(&outpoint.txid)?.get(&outpoint.vout)
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.get(outpoint).is_some()
    }

    pub fn outputs(&self) -> impl Iterator<Item = (OutPoint, &Redeemable)> {
        self.utxos
            .iter()
            .flat_map(|(txid, outputs)| outputs.iter().map(|(vout, r)| (OutPoint::new(*txid, *vout), r)))
    }

    /// Outputs, in outpoint order, until their sum reaches `amount`.
    pub fn cover(&self, amount: u64) -> Result<Vec<OutPoint>, WalletError> {
        let mut selected = Vec::new();
        let mut total = 0u64;
        for (outpoint, r) in self.outputs() {
            if total >= amount {
                break;
            }
            total = total.saturating_add(r.value());
            selected.push(outpoint);
        }
        if total < amount {
            return Err(WalletError::InsufficientFunds { have: self.value(), need: amount });
        }
        Ok(selected)
    }
}

//! Wallet state: named address sequences, the account and its history.
//!
//! Stored as one JSON file next to the transaction database.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use cosmos_core::ray::Ray;

use crate::account::Account;
use crate::error::WalletError;
use crate::keys::AddressSequence;
use crate::restore::Restored;

/// Address sequences by name, with the names used for receiving and change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addresses {
    sequences: BTreeMap<String, AddressSequence>,
    receive: String,
    change: String,
}

impl Addresses {
    pub const RECEIVE: &'static str = "receive";
    pub const CHANGE: &'static str = "change";

    /// Receive and change sequences under their default names.
    pub fn new(receive: AddressSequence, change: AddressSequence) -> Self {
        let sequences = BTreeMap::from([
            (Self::RECEIVE.to_string(), receive),
            (Self::CHANGE.to_string(), change),
        ]);
        Self { sequences, receive: Self::RECEIVE.to_string(), change: Self::CHANGE.to_string() }
    }

    pub fn sequence(&self, name: &str) -> Result<&AddressSequence, WalletError> {
        self.sequences
            .get(name)
            .ok_or_else(|| WalletError::NoSuchAddress(name.to_string()))
    }

    pub fn receive(&self) -> Result<&AddressSequence, WalletError> {
        self.sequence(&self.receive)
    }

    pub fn change(&self) -> Result<&AddressSequence, WalletError> {
        self.sequence(&self.change)
    }

    /// Add or replace a sequence.
    pub fn insert(&mut self, name: impl Into<String>, sequence: AddressSequence) {
        self.sequences.insert(name.into(), sequence);
    }

    /// Move the cursor of an existing sequence.
    pub fn advance(&mut self, name: &str, last: u32) -> Result<(), WalletError> {
        let sequence = self
            .sequences
            .get_mut(name)
            .ok_or_else(|| WalletError::NoSuchAddress(name.to_string()))?;
        sequence.last = sequence.last.max(last);
        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sequences.keys().map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletState {
    pub addresses: Addresses,
    pub account: Account,
    #[serde(default)]
    pub history: BTreeSet<Ray>,
}

impl WalletState {
    pub fn new(addresses: Addresses) -> Self {
        Self { addresses, account: Account::new(), history: BTreeSet::new() }
    }

    /// Fold the result of restoring sequence `name` into this state.
    pub fn apply_restore(&mut self, name: &str, restored: &Restored) -> Result<(), WalletError> {
        self.addresses.advance(name, restored.last.last)?;
        for diff in &restored.diffs {
            self.account.apply(diff);
        }
        self.history.extend(restored.events.iter().cloned());
        info!(sequence = name, next = restored.last.last, value = self.account.value(), "wallet: restore applied");
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        serde_json::to_string_pretty(self).map_err(|e| WalletError::Serialization(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        serde_json::from_str(json).map_err(|e| WalletError::CorruptedFile(e.to_string()))
    }

    /// Write to `path` through a temporary file so a crash never leaves a
    /// half-written wallet.
    pub fn save(&self, path: &Path) -> Result<(), WalletError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| WalletError::IoError(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, self.to_json()?).map_err(|e| WalletError::IoError(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| WalletError::IoError(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let json = std::fs::read_to_string(path).map_err(|e| WalletError::IoError(e.to_string()))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::bip32::{Xpriv, Xpub};
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, Network, TxOut, Txid};
    use bitcoin::secp256k1::Secp256k1;

    use crate::account::{AccountDiff, Redeemable};
    use crate::restore::Totals;

    fn addresses() -> Addresses {
        let key = Xpub::from_priv(&Secp256k1::new(), &Xpriv::new_master(Network::Regtest, &[5; 32]).unwrap());
        Addresses::new(
            AddressSequence::new(key, "m/0".parse().unwrap(), Network::Regtest),
            AddressSequence::new(key, "m/1".parse().unwrap(), Network::Regtest),
        )
    }

    // --- addresses ---

    #[test]
    fn receive_and_change_are_distinct() {
        let a = addresses();
        assert_ne!(a.receive().unwrap().address(0).unwrap(), a.change().unwrap().address(0).unwrap());
    }

    #[test]
    fn unknown_name_is_no_such_address() {
        assert_eq!(addresses().sequence("savings"), Err(WalletError::NoSuchAddress("savings".into())));
        assert!(matches!(addresses().advance("savings", 3), Err(WalletError::NoSuchAddress(_))));
    }

    #[test]
    fn advance_never_moves_back() {
        let mut a = addresses();
        a.advance(Addresses::RECEIVE, 7).unwrap();
        a.advance(Addresses::RECEIVE, 3).unwrap();
        assert_eq!(a.receive().unwrap().last, 7);
    }

    #[test]
    fn insert_adds_named_sequence() {
        let mut a = addresses();
        let seq = a.receive().unwrap().clone().at(2);
        a.insert("savings", seq.clone());
        assert_eq!(a.sequence("savings").unwrap(), &seq);
        assert_eq!(a.names().collect::<Vec<_>>(), vec!["change", "receive", "savings"]);
    }

    // --- restore ---

    #[test]
    fn apply_restore_updates_cursor_and_account() {
        let mut state = WalletState::new(addresses());
        let seq = state.addresses.receive().unwrap().clone();
        let mut diff = AccountDiff::new(Txid::all_zeros());
        diff.insert.insert(
            0,
            Redeemable {
                prevout: TxOut {
                    value: Amount::from_sat(900),
                    script_pubkey: seq.address(0).unwrap().script_pubkey(),
                },
                derivation: seq.derivation(0).unwrap(),
            },
        );
        let restored = Restored {
            events: BTreeSet::new(),
            diffs: vec![diff],
            last: seq.clone().at(1),
            totals: Totals { received: 900, spent: 0, held: 900 },
            scanned: 11,
        };

        state.apply_restore(Addresses::RECEIVE, &restored).unwrap();
        assert_eq!(state.addresses.receive().unwrap().last, 1);
        assert_eq!(state.account.value(), 900);
    }

    // --- persistence ---

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wallet.json");
        let mut state = WalletState::new(addresses());
        state.addresses.advance(Addresses::CHANGE, 4).unwrap();

        state.save(&path).unwrap();
        assert_eq!(WalletState::load(&path).unwrap(), state);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn load_corrupted_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(WalletState::load(&path), Err(WalletError::CorruptedFile(_))));
    }

    #[test]
    fn load_nonexistent_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(WalletState::load(&dir.path().join("missing.json")), Err(WalletError::IoError(_))));
    }
}

//! BIP-32 public derivation and P2PKH address sequences.
//!
//! Only public derivation is done here, so a sequence never needs the
//! private key. Hardened indices are rejected.

use bitcoin::bip32::{ChildNumber, DerivationPath, Xpub};
use bitcoin::secp256k1::{Secp256k1, Verification};
use bitcoin::{Address, Network};
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// A key and the path to derive from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Derivation {
    pub key: Xpub,
    pub path: DerivationPath,
}

impl Derivation {
    pub fn new(key: Xpub, path: DerivationPath) -> Self {
        Self { key, path }
    }

    pub fn derive<C: Verification>(&self, secp: &Secp256k1<C>) -> Result<Xpub, WalletError> {
        self.key
            .derive_pub(secp, &self.path)
            .map_err(|e| WalletError::KeyDerivation(e.to_string()))
    }

    /// The P2PKH address of the derived key.
    pub fn address<C: Verification>(&self, secp: &Secp256k1<C>, network: Network) -> Result<Address, WalletError> {
        let key = self.derive(secp)?;
        Ok(Address::p2pkh(key.to_pub().pubkey_hash(), network))
    }
}

/// An unbounded run of addresses `key / path / i`, with a cursor at the
/// next unused index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSequence {
    pub key: Xpub,
    pub path: DerivationPath,
    /// Next index to hand out.
    pub last: u32,
    pub network: Network,
}

impl AddressSequence {
    pub fn new(key: Xpub, path: DerivationPath, network: Network) -> Self {
        Self { key, path, last: 0, network }
    }

    /// The same sequence with its cursor at `last`.
    pub fn at(mut self, last: u32) -> Self {
        self.last = last;
        self
    }

    /// The sequence with its cursor advanced by one.
    pub fn next(&self) -> Self {
        Self { last: self.last.saturating_add(1), ..self.clone() }
    }

    pub fn derivation(&self, index: u32) -> Result<Derivation, WalletError> {
        let child = ChildNumber::from_normal_idx(index).map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
        Ok(Derivation::new(self.key, self.path.child(child)))
    }

    pub fn address(&self, index: u32) -> Result<Address, WalletError> {
        self.derivation(index)?
            .address(&Secp256k1::verification_only(), self.network)
    }

    /// The address at the cursor.
    pub fn last_address(&self) -> Result<Address, WalletError> {
        self.address(self.last)
    }
}

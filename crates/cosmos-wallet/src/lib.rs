//! # cosmos-wallet: keys, restore and account state.
//!
//! Rebuilds a wallet from an extended public key by scanning derived
//! addresses against a transaction database until a gap limit of unused
//! addresses is reached.
//!
//! # Modules
//!
//! - [`error`]: `WalletError` enum
//! - [`config`]: `WalletConfig` defaults and presets
//! - [`keys`]: BIP-32 derivations and P2PKH address sequences
//! - [`restore`]: gap-limit restore scanner
//! - [`account`]: spendable outputs owned by the wallet
//! - [`wallet`]: named address sequences plus account, persisted as JSON

pub mod account;
pub mod config;
pub mod error;
pub mod keys;
pub mod restore;
pub mod wallet;

pub use account::{Account, AccountDiff, Redeemable};
pub use config::WalletConfig;
pub use error::WalletError;
pub use keys::{AddressSequence, Derivation};
pub use restore::{Restore, Restored, Totals};
pub use wallet::{Addresses, WalletState};

//! Wallet error types.

use cosmos_core::error::TxDbError;
use thiserror::Error;

/// Errors that can occur in wallet operations.
///
/// `InsufficientFunds` and `NoSuchAddress` are the caller's problem; the
/// rest come from keys, files or the transaction database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// The account cannot cover the requested amount.
    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds {
        /// Satoshis held.
        have: u64,
        /// Satoshis requested.
        need: u64,
    },

    /// No address sequence under this name.
    #[error("no such address: {0}")]
    NoSuchAddress(String),

    #[error("key derivation: {0}")]
    KeyDerivation(String),

    /// Wallet file is corrupted or has invalid format.
    #[error("corrupted file: {0}")]
    CorruptedFile(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("serialization: {0}")]
    Serialization(String),

    #[error(transparent)]
    TxDb(#[from] TxDbError),
}

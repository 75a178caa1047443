//! Wallet configuration.

use std::path::PathBuf;

use bitcoin::Network;
use cosmos_core::types::FeeRate;

/// Consecutive unused addresses scanned before a restore stops.
pub const DEFAULT_MAX_LOOK_AHEAD: u32 = 10;

/// Wallet-level configuration.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub network: Network,
    /// Directory holding the transaction database and wallet file.
    pub data_dir: PathBuf,
    /// Gap limit for restores.
    pub max_look_ahead: u32,
    /// Largest output to create when splitting a payment.
    pub max_sats_per_output: u64,
    /// Smallest output to create when splitting a payment.
    pub min_sats_per_output: u64,
    /// Target mean output size when splitting a payment.
    pub mean_sats_per_output: u64,
    /// Fee rate used when no quote is available.
    pub fee_rate: FeeRate,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cosmos");

        Self {
            network: Network::Bitcoin,
            data_dir,
            max_look_ahead: DEFAULT_MAX_LOOK_AHEAD,
            max_sats_per_output: 5_000_000,
            min_sats_per_output: 123_456,
            mean_sats_per_output: 1_234_567,
            fee_rate: FeeRate::new(50, 1000),
        }
    }
}

impl WalletConfig {
    pub fn mainnet() -> Self {
        Self::default()
    }

    /// Testnet keeps its files in a separate subdirectory.
    pub fn testnet() -> Self {
        let base = Self::default();
        Self {
            network: Network::Testnet,
            data_dir: base.data_dir.join("testnet"),
            ..base
        }
    }

    /// Path of the transaction database.
    pub fn txdb_path(&self) -> PathBuf {
        self.data_dir.join("txdb.json")
    }

    /// Path of the wallet state file.
    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join("wallet.json")
    }
}

//! Endpoint configuration for the network collaborator.

use std::time::Duration;

use crate::retry::RetryPolicy;

pub const WHATSONCHAIN_MAINNET: &str = "https://api.whatsonchain.com/v1/bsv/main";
pub const WHATSONCHAIN_TESTNET: &str = "https://api.whatsonchain.com/v1/bsv/test";
pub const GORILLA_MAINNET: &str = "https://mapi.gorillapool.io/mapi";
pub const GORILLA_TESTNET: &str = "https://testnet-mapi.gorillapool.io/mapi";
pub const COINGECKO: &str = "https://api.coingecko.com/api/v3";

/// Where to find each provider and how long to wait for it.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// WhatsOnChain REST base, including the chain segment.
    pub whatsonchain_url: String,
    /// mAPI base URL (GorillaPool by default).
    pub mapi_url: String,
    /// Bearer token for the mAPI endpoint, if it requires one.
    pub mapi_token: Option<String>,
    /// CoinGecko REST base.
    pub coingecko_url: String,
    /// CoinGecko coin id to price.
    pub coin_id: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Applied to rate-limited price lookups.
    pub price_retry: RetryPolicy,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            whatsonchain_url: WHATSONCHAIN_MAINNET.to_string(),
            mapi_url: GORILLA_MAINNET.to_string(),
            mapi_token: None,
            coingecko_url: COINGECKO.to_string(),
            coin_id: "bitcoin-cash-sv".to_string(),
            timeout: Duration::from_secs(30),
            price_retry: RetryPolicy::default(),
        }
    }
}

impl NetworkConfig {
    /// Configuration preset for mainnet.
    pub fn mainnet() -> Self {
        Self::default()
    }

    /// Configuration preset for testnet: testnet explorer and miner endpoints.
    pub fn testnet() -> Self {
        Self {
            whatsonchain_url: WHATSONCHAIN_TESTNET.to_string(),
            mapi_url: GORILLA_TESTNET.to_string(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_mainnet() {
        let cfg = NetworkConfig::default();
        assert_eq!(cfg.whatsonchain_url, WHATSONCHAIN_MAINNET);
        assert_eq!(cfg.mapi_url, GORILLA_MAINNET);
        assert!(cfg.mapi_token.is_none());
    }

    #[test]
    fn default_prices_bsv() {
        assert_eq!(NetworkConfig::default().coin_id, "bitcoin-cash-sv");
    }

    #[test]
    fn default_retry_waits_thirty_seconds() {
        assert_eq!(NetworkConfig::default().price_retry.wait, Duration::from_secs(30));
    }

    #[test]
    fn testnet_switches_endpoints() {
        let cfg = NetworkConfig::testnet();
        assert!(cfg.whatsonchain_url.ends_with("/test"));
        assert_eq!(cfg.mapi_url, GORILLA_TESTNET);
        assert_eq!(cfg.coingecko_url, COINGECKO);
    }

    #[test]
    fn mainnet_matches_default() {
        let a = NetworkConfig::mainnet();
        let b = NetworkConfig::default();
        assert_eq!(a.whatsonchain_url, b.whatsonchain_url);
        assert_eq!(a.timeout, b.timeout);
    }

    #[test]
    fn config_is_clone_and_debug() {
        let cfg = NetworkConfig::default();
        let cfg2 = cfg.clone();
        assert_eq!(format!("{:?}", cfg), format!("{:?}", cfg2));
    }
}

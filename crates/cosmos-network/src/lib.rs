//! # cosmos-network
//! The network collaborator behind the Cosmos wallet.
//!
//! - [`RedundantNetwork`]: implements [`cosmos_core::Network`] over a set of providers
//! - [`provider`]: the provider traits, one per concern
//! - [`http`]: WhatsOnChain, mAPI and CoinGecko over blocking HTTP
//! - [`RetryPolicy`]: bounded wait-and-resubmit for rate-limited calls

pub mod config;
pub mod http;
pub mod provider;
pub mod redundant;
pub mod retry;

pub use config::NetworkConfig;
pub use provider::{BroadcastProvider, FeeSource, PriceSource, TransactionSource};
pub use redundant::RedundantNetwork;
pub use retry::RetryPolicy;

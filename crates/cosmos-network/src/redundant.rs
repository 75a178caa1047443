//! [`Network`] over several independent providers.
//!
//! Broadcasts go to every provider at once on scoped threads. Their verdicts
//! are collected under one lock, indexed by provider, and folded only after
//! all threads have joined, so the decision never depends on which provider
//! answered first.

use std::collections::BTreeMap;
use std::thread;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{BlockHash, Transaction, Txid};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use cosmos_core::error::NetworkError;
use cosmos_core::traits::Network;
use cosmos_core::types::{BroadcastError, BroadcastOutcome, FeeRate, HeaderEntry, TxProof};

use crate::config::NetworkConfig;
use crate::http::{CoinGecko, Mapi, WhatsOnChain};
use crate::provider::{BroadcastProvider, FeeSource, PriceSource, TransactionSource};
use crate::retry::RetryPolicy;

pub struct RedundantNetwork {
    broadcasters: Vec<Box<dyn BroadcastProvider>>,
    source: Box<dyn TransactionSource>,
    fees: Box<dyn FeeSource>,
    prices: Box<dyn PriceSource>,
    retry: RetryPolicy,
    cache: Mutex<BTreeMap<Txid, Transaction>>,
}

impl RedundantNetwork {
    /// A network with no broadcast providers yet.
    pub fn new(
        source: Box<dyn TransactionSource>,
        fees: Box<dyn FeeSource>,
        prices: Box<dyn PriceSource>,
    ) -> Self {
        Self {
            broadcasters: Vec::new(),
            source,
            fees,
            prices,
            retry: RetryPolicy::default(),
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// WhatsOnChain for lookups and as an untrusted broadcaster, mAPI for
    /// fees and trusted broadcast, CoinGecko for prices.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let source = WhatsOnChain::new(&config.whatsonchain_url, config.timeout)?;
        let woc_broadcast = WhatsOnChain::new(&config.whatsonchain_url, config.timeout)?;
        let fees = Mapi::new(&config.mapi_url, config.mapi_token.clone(), config.timeout)?;
        let mapi_broadcast = Mapi::new(&config.mapi_url, config.mapi_token.clone(), config.timeout)?;
        let prices = CoinGecko::new(&config.coingecko_url, &config.coin_id, config.timeout)?;

        Ok(Self::new(Box::new(source), Box::new(fees), Box::new(prices))
            .with_broadcaster(Box::new(woc_broadcast))
            .with_broadcaster(Box::new(mapi_broadcast))
            .with_retry(config.price_retry))
    }

    pub fn with_broadcaster(mut self, provider: Box<dyn BroadcastProvider>) -> Self {
        self.broadcasters.push(provider);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn broadcasters(&self) -> impl Iterator<Item = &dyn BroadcastProvider> {
        self.broadcasters.iter().map(|p| &**p)
    }

    /// Number of transactions held in the response cache.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Submit `raw` to every provider in parallel. Slot `i` holds provider
    /// `i`'s verdict; a transport error counts as a declined connection.
    fn submit_all(&self, txid: &Txid, raw: &[u8]) -> Vec<BroadcastOutcome> {
        let verdicts = Mutex::new(vec![None; self.broadcasters.len()]);

        thread::scope(|scope| {
            for (slot, provider) in self.broadcasters.iter().enumerate() {
                let verdicts = &verdicts;
                scope.spawn(move || {
                    let verdict = match provider.submit(raw) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            warn!(%txid, provider = provider.name(), error = %e, "broadcast: provider failed");
                            BroadcastOutcome::Rejected(BroadcastError::NetworkConnectionFail)
                        }
                    };
                    verdicts.lock()[slot] = Some(verdict);
                });
            }
        });

        verdicts
            .into_inner()
            .into_iter()
            .map(|v| v.unwrap_or(BroadcastOutcome::Rejected(BroadcastError::NetworkConnectionFail)))
            .collect()
    }
}

/// Fold per-provider verdicts into one outcome: accepted iff a trusted
/// provider accepted. Otherwise the first trusted provider's specific
/// refusal, falling back to a connection failure.
fn aggregate(verdicts: &[(bool, BroadcastOutcome)]) -> BroadcastOutcome {
    if verdicts.iter().any(|(trusted, v)| *trusted && v.is_accepted()) {
        return BroadcastOutcome::Accepted;
    }
    let refusal = verdicts.iter().find_map(|(trusted, v)| match v {
        BroadcastOutcome::Rejected(BroadcastError::NetworkConnectionFail) => None,
        BroadcastOutcome::Rejected(e) if *trusted => Some(e.clone()),
        _ => None,
    });
    if let Some(e) = refusal {
        return BroadcastOutcome::Rejected(e);
    }
    if verdicts.iter().any(|(trusted, _)| *trusted) {
        BroadcastOutcome::Rejected(BroadcastError::NetworkConnectionFail)
    } else {
        BroadcastOutcome::Rejected(BroadcastError::Unknown("no trusted broadcast provider".into()))
    }
}

impl Network for RedundantNetwork {
    fn broadcast(&self, tx: &Transaction) -> BroadcastOutcome {
        let txid = tx.compute_txid();
        let raw = serialize(tx);
        debug!(%txid, size = raw.len(), providers = self.broadcasters.len(), "broadcast: submitting");

        let verdicts = self.submit_all(&txid, &raw);
        let labelled: Vec<(bool, BroadcastOutcome)> = self
            .broadcasters
            .iter()
            .zip(verdicts)
            .map(|(provider, verdict)| {
                info!(%txid, provider = provider.name(), trusted = provider.trusted(), %verdict, "broadcast: verdict");
                (provider.trusted(), verdict)
            })
            .collect();

        let outcome = aggregate(&labelled);
        if outcome.is_accepted() {
            self.cache.lock().insert(txid, tx.clone());
        }
        outcome
    }

    fn fetch_transaction(&self, txid: &Txid) -> Result<Option<Transaction>, NetworkError> {
        if let Some(tx) = self.cache.lock().get(txid) {
            return Ok(Some(tx.clone()));
        }

        let Some(raw) = self.source.raw_transaction(txid)? else {
            return Ok(None);
        };
        let tx: Transaction =
            deserialize(&raw).map_err(|e| NetworkError::InvalidResponse(format!("transaction {txid}: {e}")))?;
        if tx.compute_txid() != *txid {
            return Err(NetworkError::InvalidResponse(format!(
                "asked for {txid}, got {}",
                tx.compute_txid()
            )));
        }

        self.cache.lock().insert(*txid, tx.clone());
        Ok(Some(tx))
    }

    fn fetch_proof(&self, txid: &Txid) -> Result<Option<TxProof>, NetworkError> {
        self.source.merkle_proof(txid)
    }

    fn fetch_header(&self, hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError> {
        self.source.header(hash)
    }

    fn current_fee_rate(&self) -> Result<FeeRate, NetworkError> {
        self.fees.fee_rate()
    }

    fn historical_price(&self, timestamp: u32) -> Result<f64, NetworkError> {
        self.retry.run(|| self.prices.price_at(timestamp))
    }
}

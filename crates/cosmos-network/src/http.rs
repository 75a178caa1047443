//! HTTP providers over `reqwest::blocking`.
//!
//! - [`WhatsOnChain`]: raw transactions, TSC Merkle proofs, headers, and an
//!   untrusted broadcast endpoint
//! - [`Mapi`]: merchant API of a mining pool; trusted broadcast and fee quotes
//! - [`CoinGecko`]: historical USD price
//!
//! Response parsing lives in free functions so it can be tested offline.

use std::time::Duration;

use bitcoin::block::{self, Header};
use bitcoin::hashes::Hash;
use bitcoin::pow::CompactTarget;
use bitcoin::{BlockHash, TxMerkleNode, Txid};
use chrono::DateTime;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use cosmos_core::error::NetworkError;
use cosmos_core::merkle::{MerklePath, Step};
use cosmos_core::types::{BroadcastError, BroadcastOutcome, FeeRate, HeaderEntry, TxProof};

use crate::provider::{BroadcastProvider, FeeSource, PriceSource, TransactionSource};

fn transport(e: reqwest::Error) -> NetworkError {
    NetworkError::Transport(e.to_string())
}

fn invalid(who: &str, what: impl std::fmt::Display) -> NetworkError {
    NetworkError::InvalidResponse(format!("{who}: {what}"))
}

fn client(timeout: Duration) -> Result<Client, NetworkError> {
    Client::builder().timeout(timeout).build().map_err(transport)
}

/// Body of a successful response, `None` on 404.
fn read_body(who: &str, resp: Response) -> Result<Option<String>, NetworkError> {
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(NetworkError::RateLimited(who.to_string()));
    }
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    let text = resp.text().map_err(transport)?;
    if !status.is_success() {
        return Err(invalid(who, format!("{status}: {}", text.trim())));
    }
    Ok(Some(text))
}

/// Send a broadcast request. A client error is the provider refusing the
/// transaction; anything else that is not success is a transport problem.
fn submit_request(who: &str, request: RequestBuilder) -> Result<(StatusCode, String), NetworkError> {
    let resp = request.send().map_err(transport)?;
    let status = resp.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(NetworkError::RateLimited(who.to_string()));
    }
    let text = resp.text().map_err(transport)?;
    if status.is_server_error() {
        return Err(NetworkError::Transport(format!("{who}: {status}")));
    }
    Ok((status, text))
}

/// Map a provider's free-form refusal message onto a broadcast error.
pub fn classify_rejection(description: &str) -> BroadcastError {
    let description = description.trim().trim_matches('"');
    let lower = description.to_ascii_lowercase();
    if description.is_empty() {
        BroadcastError::Unknown(String::new())
    } else if lower.contains("fee") {
        BroadcastError::InsufficientFee
    } else {
        BroadcastError::InvalidTransaction(description.to_string())
    }
}

// ------------------------------------------------------------------
// WhatsOnChain
// ------------------------------------------------------------------

const WOC: &str = "whatsonchain";

pub struct WhatsOnChain {
    client: Client,
    base: String,
}

impl WhatsOnChain {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        Ok(Self { client: client(timeout)?, base: base.into() })
    }

    fn get(&self, path: &str) -> Result<Option<String>, NetworkError> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "woc: GET");
        let resp = self.client.get(&url).send().map_err(transport)?;
        read_body(WOC, resp)
    }
}

impl BroadcastProvider for WhatsOnChain {
    fn name(&self) -> &str {
        WOC
    }

    /// Reports acceptance for transactions that never make it into a block
    /// often enough that it cannot be counted on.
    fn trusted(&self) -> bool {
        false
    }

    fn submit(&self, raw: &[u8]) -> Result<BroadcastOutcome, NetworkError> {
        let request = self
            .client
            .post(format!("{}/tx/raw", self.base))
            .json(&json!({ "txhex": hex::encode(raw) }));
        let (status, text) = submit_request(WOC, request)?;
        if status.is_success() {
            Ok(BroadcastOutcome::Accepted)
        } else {
            Ok(BroadcastOutcome::Rejected(classify_rejection(&text)))
        }
    }
}

impl TransactionSource for WhatsOnChain {
    fn raw_transaction(&self, txid: &Txid) -> Result<Option<Vec<u8>>, NetworkError> {
        let Some(body) = self.get(&format!("/tx/{txid}/hex"))? else {
            return Ok(None);
        };
        hex::decode(body.trim()).map(Some).map_err(|e| invalid(WOC, e))
    }

    fn merkle_proof(&self, txid: &Txid) -> Result<Option<TxProof>, NetworkError> {
        match self.get(&format!("/tx/{txid}/proof/tsc"))? {
            Some(body) => parse_tsc_proof(txid, &body),
            None => Ok(None),
        }
    }

    fn header(&self, hash: &BlockHash) -> Result<Option<HeaderEntry>, NetworkError> {
        match self.get(&format!("/block/{hash}/header"))? {
            Some(body) => parse_header(hash, &body).map(Some),
            None => Ok(None),
        }
    }
}

/// A proof in the TSC format: nodes in display hex, `*` for a duplicate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TscProof {
    index: u64,
    tx_or_id: String,
    target: String,
    nodes: Vec<String>,
}

/// Parse a TSC proof response. Unmined transactions come back as `null`
/// or an empty list.
pub fn parse_tsc_proof(txid: &Txid, body: &str) -> Result<Option<TxProof>, NetworkError> {
    let value: Value = serde_json::from_str(body).map_err(|e| invalid(WOC, e))?;
    let value = match value {
        Value::Null => return Ok(None),
        Value::Array(items) => match items.into_iter().next() {
            Some(first) => first,
            None => return Ok(None),
        },
        other => other,
    };
    let proof: TscProof = serde_json::from_value(value).map_err(|e| invalid(WOC, e))?;

    // txOrId may carry the full transaction instead of its id.
    if proof.tx_or_id.len() == 64 && proof.tx_or_id != txid.to_string() {
        return Err(invalid(WOC, format!("proof is for {} not {txid}", proof.tx_or_id)));
    }

    let block_hash: BlockHash = proof.target.parse().map_err(|e| invalid(WOC, e))?;
    let branch = proof
        .nodes
        .iter()
        .map(|node| match node.as_str() {
            "*" => Ok(Step::Duplicate),
            hash => hash.parse::<TxMerkleNode>().map(Step::Hash).map_err(|e| invalid(WOC, e)),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(TxProof { block_hash, path: MerklePath::new(proof.index, branch) }))
}

#[derive(Debug, Deserialize)]
struct HeaderJson {
    height: u64,
    version: i32,
    merkleroot: String,
    time: u32,
    nonce: u32,
    bits: String,
    #[serde(default)]
    previousblockhash: Option<String>,
}

/// Rebuild a header from its JSON description and check it hashes to `hash`.
pub fn parse_header(hash: &BlockHash, body: &str) -> Result<HeaderEntry, NetworkError> {
    let json: HeaderJson = serde_json::from_str(body).map_err(|e| invalid(WOC, e))?;
    let prev_blockhash: BlockHash = match &json.previousblockhash {
        Some(prev) => prev.parse().map_err(|e| invalid(WOC, e))?,
        None => BlockHash::all_zeros(),
    };
    let bits = u32::from_str_radix(&json.bits, 16).map_err(|e| invalid(WOC, e))?;
    let header = Header {
        version: block::Version::from_consensus(json.version),
        prev_blockhash,
        merkle_root: json.merkleroot.parse().map_err(|e| invalid(WOC, e))?,
        time: json.time,
        bits: CompactTarget::from_consensus(bits),
        nonce: json.nonce,
    };
    let entry = HeaderEntry::new(json.height, header);
    if entry.hash() != *hash {
        return Err(invalid(WOC, format!("header hashes to {} not {hash}", entry.hash())));
    }
    Ok(entry)
}

// ------------------------------------------------------------------
// mAPI
// ------------------------------------------------------------------

const MAPI: &str = "mapi";

pub struct Mapi {
    client: Client,
    base: String,
    token: Option<String>,
}

impl Mapi {
    pub fn new(base: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, NetworkError> {
        Ok(Self { client: client(timeout)?, base: base.into(), token })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Every mAPI response wraps a JSON document in a signed string payload.
#[derive(Debug, Deserialize)]
struct Envelope {
    payload: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPayload {
    return_result: String,
    #[serde(default)]
    result_description: String,
}

#[derive(Debug, Deserialize)]
struct FeeQuotePayload {
    fees: Vec<FeeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeEntry {
    fee_type: String,
    mining_fee: FeeAmount,
}

#[derive(Debug, Deserialize)]
struct FeeAmount {
    satoshis: u64,
    bytes: u64,
}

fn payload<T: for<'de> Deserialize<'de>>(body: &str) -> Result<T, NetworkError> {
    let envelope: Envelope = serde_json::from_str(body).map_err(|e| invalid(MAPI, e))?;
    serde_json::from_str(&envelope.payload).map_err(|e| invalid(MAPI, e))
}

pub fn parse_submit(body: &str) -> Result<BroadcastOutcome, NetworkError> {
    let result: SubmitPayload = payload(body)?;
    if result.return_result == "success" {
        Ok(BroadcastOutcome::Accepted)
    } else {
        debug!(description = %result.result_description, "mapi: submit refused");
        Ok(BroadcastOutcome::Rejected(classify_rejection(&result.result_description)))
    }
}

/// The standard mining fee from a fee quote.
pub fn parse_fee_quote(body: &str) -> Result<FeeRate, NetworkError> {
    let quote: FeeQuotePayload = payload(body)?;
    quote
        .fees
        .iter()
        .find(|fee| fee.fee_type == "standard")
        .map(|fee| FeeRate::new(fee.mining_fee.satoshis, fee.mining_fee.bytes))
        .ok_or_else(|| invalid(MAPI, "fee quote has no standard fee"))
}

impl BroadcastProvider for Mapi {
    fn name(&self) -> &str {
        MAPI
    }

    fn trusted(&self) -> bool {
        true
    }

    fn submit(&self, raw: &[u8]) -> Result<BroadcastOutcome, NetworkError> {
        let request = self
            .authorize(self.client.post(format!("{}/tx", self.base)))
            .json(&json!({ "rawtx": hex::encode(raw) }));
        let (status, text) = submit_request(MAPI, request)?;
        if !status.is_success() {
            return Ok(BroadcastOutcome::Rejected(classify_rejection(&text)));
        }
        parse_submit(&text)
    }
}

impl FeeSource for Mapi {
    fn fee_rate(&self) -> Result<FeeRate, NetworkError> {
        let url = format!("{}/feeQuote", self.base);
        debug!(%url, "mapi: GET");
        let resp = self.authorize(self.client.get(&url)).send().map_err(transport)?;
        let body = read_body(MAPI, resp)?.ok_or_else(|| invalid(MAPI, "fee quote not found"))?;
        parse_fee_quote(&body)
    }
}

// ------------------------------------------------------------------
// CoinGecko
// ------------------------------------------------------------------

const GECKO: &str = "coingecko";

pub struct CoinGecko {
    client: Client,
    base: String,
    coin: String,
}

impl CoinGecko {
    pub fn new(base: impl Into<String>, coin: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        Ok(Self { client: client(timeout)?, base: base.into(), coin: coin.into() })
    }
}

/// The `dd-mm-yyyy` date CoinGecko's history endpoint expects.
pub fn history_date(timestamp: u32) -> Option<String> {
    DateTime::from_timestamp(i64::from(timestamp), 0).map(|t| t.format("%d-%m-%Y").to_string())
}

pub fn parse_price(body: &str) -> Result<f64, NetworkError> {
    let value: Value = serde_json::from_str(body).map_err(|e| invalid(GECKO, e))?;
    value["market_data"]["current_price"]["usd"]
        .as_f64()
        .ok_or_else(|| invalid(GECKO, "no usd price in response"))
}

impl PriceSource for CoinGecko {
    fn price_at(&self, timestamp: u32) -> Result<f64, NetworkError> {
        let date = history_date(timestamp).ok_or_else(|| invalid(GECKO, format!("bad timestamp {timestamp}")))?;
        let url = format!("{}/coins/{}/history", self.base, self.coin);
        debug!(%url, %date, "gecko: GET");
        let resp = self
            .client
            .get(&url)
            .query(&[("date", date.as_str()), ("localization", "false")])
            .send()
            .map_err(transport)?;
        let body = read_body(GECKO, resp)?.ok_or_else(|| invalid(GECKO, format!("unknown coin {}", self.coin)))?;
        parse_price(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(b: u8) -> Txid {
        Txid::from_byte_array([b; 32])
    }

    // --- rejection classification ---

    #[test]
    fn fee_messages_are_insufficient_fee() {
        assert_eq!(classify_rejection("Not enough fees"), BroadcastError::InsufficientFee);
        assert_eq!(classify_rejection("66: mempool min fee not met"), BroadcastError::InsufficientFee);
    }

    #[test]
    fn other_messages_are_invalid_transaction() {
        assert_eq!(
            classify_rejection("\"Missing inputs\""),
            BroadcastError::InvalidTransaction("Missing inputs".into())
        );
    }

    #[test]
    fn empty_message_is_unknown() {
        assert_eq!(classify_rejection("  "), BroadcastError::Unknown(String::new()));
    }

    // --- TSC proofs ---

    #[test]
    fn tsc_proof_parses_hashes_and_duplicates() {
        let id = txid(1);
        let sibling = TxMerkleNode::from_byte_array([2; 32]);
        let target = BlockHash::from_byte_array([3; 32]);
        let body = format!(
            r#"[{{"index":2,"txOrId":"{id}","target":"{target}","nodes":["{sibling}","*"]}}]"#
        );
        let proof = parse_tsc_proof(&id, &body).unwrap().unwrap();
        assert_eq!(proof.block_hash, target);
        assert_eq!(proof.path.index, 2);
        assert_eq!(proof.path.branch, vec![Step::Hash(sibling), Step::Duplicate]);
    }

    #[test]
    fn tsc_proof_accepts_bare_object() {
        let id = txid(1);
        let target = BlockHash::from_byte_array([3; 32]);
        let body = format!(r#"{{"index":0,"txOrId":"{id}","target":"{target}","nodes":[]}}"#);
        assert!(parse_tsc_proof(&id, &body).unwrap().unwrap().path.branch.is_empty());
    }

    #[test]
    fn tsc_proof_absent_when_unmined() {
        assert_eq!(parse_tsc_proof(&txid(1), "null").unwrap(), None);
        assert_eq!(parse_tsc_proof(&txid(1), "[]").unwrap(), None);
    }

    #[test]
    fn tsc_proof_for_other_txid_is_invalid() {
        let target = BlockHash::from_byte_array([3; 32]);
        let body = format!(r#"{{"index":0,"txOrId":"{}","target":"{target}","nodes":[]}}"#, txid(9));
        assert!(matches!(parse_tsc_proof(&txid(1), &body), Err(NetworkError::InvalidResponse(_))));
    }

    #[test]
    fn tsc_proof_garbage_is_invalid() {
        assert!(matches!(parse_tsc_proof(&txid(1), "<html>"), Err(NetworkError::InvalidResponse(_))));
    }

    // --- headers ---

    fn genesis_json(height: u64) -> String {
        format!(
            r#"{{"hash":"000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f","height":{height},
            "version":1,"merkleroot":"4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "time":1231006505,"nonce":2083236893,"bits":"1d00ffff"}}"#
        )
    }

    #[test]
    fn header_rebuilt_and_hash_checked() {
        let hash: BlockHash = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f".parse().unwrap();
        let entry = parse_header(&hash, &genesis_json(0)).unwrap();
        assert_eq!(entry.height, 0);
        assert_eq!(entry.hash(), hash);
        assert_eq!(entry.prev_hash(), BlockHash::all_zeros());
    }

    #[test]
    fn header_with_wrong_hash_is_invalid() {
        let hash = BlockHash::from_byte_array([7; 32]);
        assert!(matches!(parse_header(&hash, &genesis_json(0)), Err(NetworkError::InvalidResponse(_))));
    }

    // --- mAPI ---

    fn envelope(payload: &str) -> String {
        serde_json::to_string(&json!({ "payload": payload, "signature": null, "publicKey": null })).unwrap()
    }

    #[test]
    fn mapi_success() {
        let body = envelope(r#"{"returnResult":"success","resultDescription":""}"#);
        assert_eq!(parse_submit(&body).unwrap(), BroadcastOutcome::Accepted);
    }

    #[test]
    fn mapi_failure_carries_description() {
        let body = envelope(r#"{"returnResult":"failure","resultDescription":"Missing inputs"}"#);
        assert_eq!(
            parse_submit(&body).unwrap(),
            BroadcastOutcome::Rejected(BroadcastError::InvalidTransaction("Missing inputs".into()))
        );
    }

    #[test]
    fn fee_quote_picks_standard() {
        let body = envelope(
            r#"{"fees":[
                {"feeType":"data","miningFee":{"satoshis":3,"bytes":1000},"relayFee":{"satoshis":0,"bytes":1000}},
                {"feeType":"standard","miningFee":{"satoshis":50,"bytes":1000},"relayFee":{"satoshis":0,"bytes":1000}}
            ]}"#,
        );
        assert_eq!(parse_fee_quote(&body).unwrap(), FeeRate::new(50, 1000));
    }

    #[test]
    fn fee_quote_without_standard_is_invalid() {
        let body = envelope(r#"{"fees":[]}"#);
        assert!(matches!(parse_fee_quote(&body), Err(NetworkError::InvalidResponse(_))));
    }

    // --- CoinGecko ---

    #[test]
    fn history_date_is_day_month_year() {
        // 2021-03-04T12:00:00Z
        assert_eq!(history_date(1_614_859_200).as_deref(), Some("04-03-2021"));
    }

    #[test]
    fn price_from_market_data() {
        let body = r#"{"id":"bitcoin-cash-sv","market_data":{"current_price":{"usd":172.5,"eur":140.0}}}"#;
        assert_eq!(parse_price(body).unwrap(), 172.5);
    }

    #[test]
    fn price_missing_is_invalid() {
        assert!(matches!(parse_price(r#"{"id":"x"}"#), Err(NetworkError::InvalidResponse(_))));
    }
}

//! Fundamental types shared across the wallet: points, script hashes,
//! header entries, fee rates and broadcast outcomes.

use std::fmt;
use std::str::FromStr;

use bitcoin::block::Header;
use bitcoin::{BlockHash, Script, TxMerkleNode, Txid};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::merkle::MerklePath;

// ------------------------------------------------------------------
// InPoint
// ------------------------------------------------------------------

/// Reference to a specific input of a specific transaction.
///
/// The counterpart of [`bitcoin::OutPoint`]: an outpoint names the output being
/// spent, an inpoint names the input doing the spending.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InPoint {
    pub txid: Txid,
    pub index: u32,
}

impl InPoint {
    pub fn new(txid: Txid, index: u32) -> Self {
        Self { txid, index }
    }
}

impl fmt::Display for InPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

// ------------------------------------------------------------------
// ScriptHash
// ------------------------------------------------------------------

/// SHA-256 of an output script, used to index outputs by script.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScriptHash(pub [u8; 32]);

impl ScriptHash {
    pub fn from_script(script: &Script) -> Self {
        Self(Sha256::digest(script.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ScriptHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptHash({})", hex::encode(self.0))
    }
}

impl FromStr for ScriptHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for ScriptHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScriptHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ------------------------------------------------------------------
// HeaderEntry
// ------------------------------------------------------------------

/// A block header positioned at a height in the chain.
///
/// The block hash is always recomputed from the 80 header bytes; it is never
/// carried as independent input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub height: u64,
    #[serde(with = "header_hex")]
    pub header: Header,
}

impl HeaderEntry {
    pub fn new(height: u64, header: Header) -> Self {
        Self { height, header }
    }

    pub fn hash(&self) -> BlockHash {
        self.header.block_hash()
    }

    pub fn merkle_root(&self) -> TxMerkleNode {
        self.header.merkle_root
    }

    pub fn prev_hash(&self) -> BlockHash {
        self.header.prev_blockhash
    }

    pub fn timestamp(&self) -> u32 {
        self.header.time
    }
}

/// Serde helper encoding a header as the hex of its 80 consensus bytes.
pub mod header_hex {
    use bitcoin::block::Header;
    use bitcoin::consensus::encode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(header: &Header, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(encode::serialize(header)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Header, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        encode::deserialize(&bytes).map_err(serde::de::Error::custom)
    }
}

/// A Merkle proof for one transaction as served by a network source:
/// the containing block's hash and the path to its root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxProof {
    pub block_hash: BlockHash,
    pub path: MerklePath,
}

// ------------------------------------------------------------------
// FeeRate
// ------------------------------------------------------------------

/// Mining fee expressed as `satoshis` per `bytes`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRate {
    pub satoshis: u64,
    pub bytes: u64,
}

impl FeeRate {
    pub fn new(satoshis: u64, bytes: u64) -> Self {
        Self { satoshis, bytes }
    }

    /// Fee for a transaction of `size` bytes, rounded up.
    pub fn fee_for(&self, size: u64) -> u64 {
        if self.bytes == 0 {
            return 0;
        }
        (size.saturating_mul(self.satoshis)).div_ceil(self.bytes)
    }

    /// Satoshis per 1000 bytes.
    pub fn per_kilobyte(&self) -> f64 {
        if self.bytes == 0 {
            return 0.0;
        }
        self.satoshis as f64 * 1000.0 / self.bytes as f64
    }
}

impl fmt::Display for FeeRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sats / {} bytes", self.satoshis, self.bytes)
    }
}

// ------------------------------------------------------------------
// Broadcast outcome
// ------------------------------------------------------------------

/// Reason a transaction was not accepted by the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastError {
    Unknown(String),
    NetworkConnectionFail,
    InsufficientFee,
    InvalidTransaction(String),
    /// A transaction this one spends from is not confirmed, not known
    /// locally, and was not accepted earlier in the same broadcast.
    MissingAntecedent(Txid),
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::Unknown(reason) if reason.is_empty() => write!(f, "unknown"),
            BroadcastError::Unknown(reason) => write!(f, "unknown: {reason}"),
            BroadcastError::NetworkConnectionFail => write!(f, "could not connect to the network"),
            BroadcastError::InsufficientFee => write!(f, "insufficient fee"),
            BroadcastError::InvalidTransaction(reason) => write!(f, "invalid transaction: {reason}"),
            BroadcastError::MissingAntecedent(txid) => write!(f, "missing antecedent {txid}"),
        }
    }
}

/// Result of submitting one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastOutcome {
    Accepted,
    Rejected(BroadcastError),
}

impl BroadcastOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, BroadcastOutcome::Accepted)
    }
}

impl fmt::Display for BroadcastOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastOutcome::Accepted => write!(f, "accepted"),
            BroadcastOutcome::Rejected(e) => write!(f, "rejected ({e})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::pow::CompactTarget;
    use bitcoin::{ScriptBuf, block};

    fn header() -> Header {
        Header {
            version: block::Version::ONE,
            prev_blockhash: BlockHash::all_zeros(),
            merkle_root: TxMerkleNode::all_zeros(),
            time: 1_600_000_000,
            bits: CompactTarget::from_consensus(0x207fffff),
            nonce: 42,
        }
    }

    // --- InPoint ---

    #[test]
    fn inpoint_display() {
        let p = InPoint::new(Txid::all_zeros(), 3);
        assert!(p.to_string().ends_with(":3"));
    }

    #[test]
    fn inpoint_ordering_by_txid_then_index() {
        let t = Txid::all_zeros();
        assert!(InPoint::new(t, 0) < InPoint::new(t, 1));
    }

    // --- ScriptHash ---

    #[test]
    fn script_hash_deterministic() {
        let script = ScriptBuf::from_bytes(vec![0x76, 0xa9]);
        assert_eq!(ScriptHash::from_script(&script), ScriptHash::from_script(&script));
    }

    #[test]
    fn script_hash_hex_roundtrip() {
        let script = ScriptBuf::from_bytes(vec![0x51]);
        let h = ScriptHash::from_script(&script);
        let parsed: ScriptHash = h.to_string().parse().unwrap();
        assert_eq!(parsed, h);
    }

    #[test]
    fn script_hash_rejects_short_hex() {
        assert!("abcd".parse::<ScriptHash>().is_err());
    }

    #[test]
    fn script_hash_serde_json() {
        let h = ScriptHash([7u8; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", hex::encode([7u8; 32])));
        let back: ScriptHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    // --- HeaderEntry ---

    #[test]
    fn header_entry_hash_is_recomputed() {
        let e = HeaderEntry::new(1, header());
        assert_eq!(e.hash(), header().block_hash());
        let mut other = header();
        other.nonce += 1;
        assert_ne!(HeaderEntry::new(1, other).hash(), e.hash());
    }

    #[test]
    fn header_entry_serializes_as_hex() {
        let e = HeaderEntry::new(7, header());
        let json = serde_json::to_value(e).unwrap();
        assert_eq!(json["height"], 7);
        assert_eq!(json["header"].as_str().unwrap().len(), 160);
        let back: HeaderEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, e);
    }

    // --- FeeRate ---

    #[test]
    fn fee_rate_rounds_up() {
        let rate = FeeRate::new(50, 1000);
        assert_eq!(rate.fee_for(1000), 50);
        assert_eq!(rate.fee_for(226), 12);
        assert_eq!(rate.fee_for(0), 0);
    }

    #[test]
    fn fee_rate_zero_bytes() {
        assert_eq!(FeeRate::new(1, 0).fee_for(500), 0);
        assert_eq!(FeeRate::new(1, 0).per_kilobyte(), 0.0);
    }

    #[test]
    fn fee_rate_per_kilobyte() {
        assert_eq!(FeeRate::new(1, 2).per_kilobyte(), 500.0);
    }

    // --- BroadcastOutcome ---

    #[test]
    fn outcome_display() {
        assert_eq!(BroadcastOutcome::Accepted.to_string(), "accepted");
        let r = BroadcastOutcome::Rejected(BroadcastError::InsufficientFee);
        assert_eq!(r.to_string(), "rejected (insufficient fee)");
        assert!(!r.is_accepted());
    }

    #[test]
    fn unknown_error_display() {
        assert_eq!(BroadcastError::Unknown(String::new()).to_string(), "unknown");
        assert_eq!(BroadcastError::Unknown("x".into()).to_string(), "unknown: x");
    }
}

//! Value-flow events: one output created or one input spent by a confirmed
//! transaction.
//!
//! Rays are the unit of wallet history. They sort chronologically by block
//! timestamp, then by position in the block, with inputs before outputs of
//! the same transaction.

use std::cmp::Ordering;
use std::fmt;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::{OutPoint, TxOut, Txid};
use serde::{Deserialize, Serialize};

use crate::error::TxDbError;
use crate::types::InPoint;
use crate::vertex::Vertex;

/// Which side of a transaction a ray refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// An input spending a prior output.
    In,
    /// An output created by the transaction.
    Out,
}

/// One input or output of a confirmed transaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ray {
    pub direction: Direction,
    /// Consensus bytes of the output or input.
    #[serde(with = "hex_bytes")]
    pub put: Vec<u8>,
    /// Timestamp of the confirming block.
    pub when: u32,
    /// Index of the transaction in its block.
    pub index: u64,
    pub txid: Txid,
    /// Output index for [`Direction::Out`], input index for [`Direction::In`].
    pub point: u32,
    /// Satoshis created, or spent from the redeemed output.
    pub value: u64,
}

impl Ray {
    /// The ray for output `outpoint` of `vertex`. The value is read back out
    /// of the serialized output.
    pub fn from_output(vertex: &Vertex, outpoint: OutPoint) -> Result<Self, TxDbError> {
        let (tx, confirmation) = match (&vertex.transaction, &vertex.confirmation) {
            (Some(tx), Some(c)) if vertex.valid() => (tx, c),
            _ => return Err(TxDbError::UnconfirmedOrdering),
        };
        let output = tx
            .output
            .get(outpoint.vout as usize)
            .ok_or(TxDbError::OutputOutOfRange(outpoint))?;
        let put = serialize(output);
        let value = deserialize::<TxOut>(&put)?.value.to_sat();
        Ok(Self {
            direction: Direction::Out,
            put,
            when: confirmation.header.timestamp(),
            index: confirmation.path.index,
            txid: outpoint.txid,
            point: outpoint.vout,
            value,
        })
    }

    /// The ray for input `inpoint` of `vertex`, spending an output worth `value`.
    pub fn from_input(vertex: &Vertex, inpoint: InPoint, value: u64) -> Result<Self, TxDbError> {
        let (tx, confirmation) = match (&vertex.transaction, &vertex.confirmation) {
            (Some(tx), Some(c)) if vertex.valid() => (tx, c),
            _ => return Err(TxDbError::UnconfirmedOrdering),
        };
        let input = tx
            .input
            .get(inpoint.index as usize)
            .ok_or(TxDbError::InputOutOfRange(inpoint))?;
        Ok(Self {
            direction: Direction::In,
            put: serialize(input),
            when: confirmation.header.timestamp(),
            index: confirmation.path.index,
            txid: inpoint.txid,
            point: inpoint.index,
            value,
        })
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// The output this ray refers to, if it is an output ray.
    pub fn outpoint(&self) -> Option<OutPoint> {
        (self.direction == Direction::Out).then(|| OutPoint::new(self.txid, self.point))
    }

    /// The input this ray refers to, if it is an input ray.
    pub fn inpoint(&self) -> Option<InPoint> {
        (self.direction == Direction::In).then(|| InPoint::new(self.txid, self.point))
    }

    /// The output itself, for an output ray.
    pub fn output(&self) -> Option<TxOut> {
        match self.direction {
            Direction::Out => deserialize(&self.put).ok(),
            Direction::In => None,
        }
    }
}

/// Equality ignores the value. Two rays are equal when bytes, time,
/// direction and point match and they also sit at the same block index in
/// the same transaction. Without the last two, rays from different
/// transactions could be `==` while `Ord` tells them apart.
impl PartialEq for Ray {
    fn eq(&self, other: &Self) -> bool {
        self.put == other.put
            && self.when == other.when
            && self.index == other.index
            && self.direction == other.direction
            && self.point == other.point
            && self.txid == other.txid
    }
}

impl Eq for Ray {}

impl Ord for Ray {
    fn cmp(&self, other: &Self) -> Ordering {
        self.when
            .cmp(&other.when)
            .then(self.index.cmp(&other.index))
            .then(self.direction.cmp(&other.direction))
            .then(self.point.cmp(&other.point))
            .then_with(|| self.txid.cmp(&other.txid))
            .then_with(|| self.put.cmp(&other.put))
    }
}

impl PartialOrd for Ray {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Ray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Out => write!(f, "{} received in {}:{}", self.value, self.txid, self.point),
            Direction::In => write!(f, "{} spent from {}:{}", self.value, self.txid, self.point),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

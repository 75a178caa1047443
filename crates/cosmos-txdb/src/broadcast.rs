//! Broadcast-tree propagation.
//!
//! An SPV proof for a payment is a set of transactions, some already mined
//! (carrying a Merkle path and header) and some still to be broadcast. The
//! mined ones are imported. The rest are submitted in dependency order: a
//! transaction goes out only once every transaction it spends from is
//! confirmed, stored locally, or was accepted earlier in the same call.
//! A rejection blocks only the transactions that depend on it, and so does a
//! confirmed node whose proof fails to import.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::{Transaction, Txid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cosmos_core::error::TxDbError;
use cosmos_core::merkle::MerklePath;
use cosmos_core::traits::{Network, WritableTxDb};
use cosmos_core::types::{BroadcastError, BroadcastOutcome, HeaderEntry};

/// One transaction of a proof, with its confirmation if it has one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofNode {
    pub transaction: Transaction,
    pub confirmation: Option<(MerklePath, HeaderEntry)>,
}

impl ProofNode {
    pub fn confirmed(transaction: Transaction, path: MerklePath, header: HeaderEntry) -> Self {
        Self { transaction, confirmation: Some((path, header)) }
    }

    pub fn pending(transaction: Transaction) -> Self {
        Self { transaction, confirmation: None }
    }

    /// Transactions this one spends from.
    fn antecedents(&self) -> BTreeSet<Txid> {
        self.transaction
            .input
            .iter()
            .filter(|i| !i.previous_output.is_null())
            .map(|i| i.previous_output.txid)
            .collect()
    }
}

/// The transactions needed to realize one payment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpvProof {
    pub nodes: Vec<ProofNode>,
}

impl SpvProof {
    pub fn new(nodes: Vec<ProofNode>) -> Self {
        Self { nodes }
    }
}

/// Aggregate over every pending transaction and every failed import.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Everything was imported or accepted (or there was nothing to do).
    Success,
    /// Some transactions were accepted and some were not.
    Partial,
    /// Nothing was accepted.
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastTreeResult {
    /// Confirmed transactions imported into the store.
    pub imported: Vec<Txid>,
    /// Confirmed transactions whose import failed, with the reason.
    pub rejected: BTreeMap<Txid, TxDbError>,
    /// One outcome per pending transaction.
    pub outcomes: BTreeMap<Txid, BroadcastOutcome>,
}

impl BroadcastTreeResult {
    pub fn aggregate(&self) -> Aggregate {
        let accepted = self.outcomes.values().filter(|o| o.is_accepted()).count();
        match accepted {
            n if n == self.outcomes.len() && self.rejected.is_empty() => Aggregate::Success,
            0 => Aggregate::Failed,
            _ => Aggregate::Partial,
        }
    }

    pub fn outcome(&self, txid: &Txid) -> Option<&BroadcastOutcome> {
        self.outcomes.get(txid)
    }
}

/// Import the confirmed part of `proof` into `db` and broadcast the rest.
///
/// A confirmed node that fails to import is recorded in
/// [`BroadcastTreeResult::rejected`]; pending nodes spending from it are
/// refused with `MissingAntecedent` and every other branch goes ahead.
/// Accepted transactions are stored as pending.
pub fn broadcast_tree<D, N>(db: &mut D, net: &N, proof: &SpvProof) -> BroadcastTreeResult
where
    D: WritableTxDb + ?Sized,
    N: Network + ?Sized,
{
    let mut result = BroadcastTreeResult::default();
    let mut pending: BTreeMap<Txid, &ProofNode> = BTreeMap::new();
    let mut order = Vec::new();

    for node in &proof.nodes {
        let txid = node.transaction.compute_txid();
        match &node.confirmation {
            Some((path, header)) => match db.import(&node.transaction, path, header) {
                Ok(_) => result.imported.push(txid),
                Err(e) => {
                    warn!(%txid, error = %e, "broadcast: confirmed node not imported");
                    result.rejected.insert(txid, e);
                }
            },
            None => {
                if pending.insert(txid, node).is_none() {
                    order.push(txid);
                }
            }
        }
    }

    debug!(
        imported = result.imported.len(),
        rejected = result.rejected.len(),
        pending = order.len(),
        "broadcast: tree partitioned"
    );

    let mut propagator = Propagator {
        db,
        net,
        pending,
        failed: result.rejected.keys().copied().collect(),
        outcomes: BTreeMap::new(),
        visiting: BTreeSet::new(),
    };
    for txid in order {
        propagator.resolve(txid);
    }
    result.outcomes = propagator.outcomes;

    info!(
        accepted = result.outcomes.values().filter(|o| o.is_accepted()).count(),
        total = result.outcomes.len(),
        "broadcast: tree done"
    );
    result
}

struct Propagator<'a, D: ?Sized, N: ?Sized> {
    db: &'a mut D,
    net: &'a N,
    pending: BTreeMap<Txid, &'a ProofNode>,
    /// Confirmed nodes that could not be imported.
    failed: BTreeSet<Txid>,
    outcomes: BTreeMap<Txid, BroadcastOutcome>,
    visiting: BTreeSet<Txid>,
}

impl<D, N> Propagator<'_, D, N>
where
    D: WritableTxDb + ?Sized,
    N: Network + ?Sized,
{
    /// Decide the outcome for pending `txid`, submitting its antecedents
    /// first. Returns whether it was accepted.
    fn resolve(&mut self, txid: Txid) -> bool {
        if let Some(outcome) = self.outcomes.get(&txid) {
            return outcome.is_accepted();
        }
        let Some(node) = self.pending.get(&txid).copied() else {
            return false;
        };
        if !self.visiting.insert(txid) {
            // A cycle cannot come from valid transactions.
            warn!(%txid, "broadcast: dependency cycle");
            return false;
        }

        let outcome = match self.unmet_antecedent(node) {
            Some(missing) => {
                warn!(%txid, %missing, "broadcast: missing antecedent");
                BroadcastOutcome::Rejected(BroadcastError::MissingAntecedent(missing))
            }
            None => {
                let outcome = self.net.broadcast(&node.transaction);
                if outcome.is_accepted() {
                    self.db.insert_pending(&node.transaction);
                    debug!(%txid, "broadcast: accepted");
                } else {
                    warn!(%txid, %outcome, "broadcast: rejected");
                }
                outcome
            }
        };

        self.visiting.remove(&txid);
        let accepted = outcome.is_accepted();
        self.outcomes.insert(txid, outcome);
        accepted
    }

    fn unmet_antecedent(&mut self, node: &ProofNode) -> Option<Txid> {
        node.antecedents().into_iter().find(|parent| {
            if self.failed.contains(parent) {
                true
            } else if self.pending.contains_key(parent) {
                !self.resolve(*parent)
            } else {
                self.db.transaction(parent).is_none()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn t(byte: u8) -> Txid {
        Txid::from_byte_array([byte; 32])
    }

    fn result(outcomes: &[(u8, bool)], rejected: &[u8]) -> BroadcastTreeResult {
        BroadcastTreeResult {
            imported: Vec::new(),
            rejected: rejected
                .iter()
                .map(|b| (t(*b), TxDbError::UnknownTransaction(t(*b))))
                .collect(),
            outcomes: outcomes
                .iter()
                .map(|(b, ok)| {
                    let outcome = if *ok {
                        BroadcastOutcome::Accepted
                    } else {
                        BroadcastOutcome::Rejected(BroadcastError::NetworkConnectionFail)
                    };
                    (t(*b), outcome)
                })
                .collect(),
        }
    }

    // --- aggregate ---

    #[test]
    fn nothing_to_do_is_success() {
        assert_eq!(BroadcastTreeResult::default().aggregate(), Aggregate::Success);
    }

    #[test]
    fn all_accepted_is_success() {
        assert_eq!(result(&[(1, true), (2, true)], &[]).aggregate(), Aggregate::Success);
    }

    #[test]
    fn mixed_is_partial() {
        assert_eq!(result(&[(1, true), (2, false)], &[]).aggregate(), Aggregate::Partial);
    }

    #[test]
    fn none_accepted_is_failed() {
        assert_eq!(result(&[(1, false), (2, false)], &[]).aggregate(), Aggregate::Failed);
    }

    #[test]
    fn failed_import_spoils_success() {
        assert_eq!(result(&[(1, true)], &[9]).aggregate(), Aggregate::Partial);
        assert_eq!(result(&[], &[9]).aggregate(), Aggregate::Failed);
    }

    // --- ProofNode ---

    #[test]
    fn coinbase_input_is_no_antecedent() {
        let tx = Transaction {
            version: bitcoin::transaction::Version::ONE,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![
                bitcoin::TxIn { previous_output: bitcoin::OutPoint::null(), ..Default::default() },
                bitcoin::TxIn { previous_output: bitcoin::OutPoint::new(t(4), 1), ..Default::default() },
            ],
            output: Vec::new(),
        };
        assert_eq!(ProofNode::pending(tx).antecedents(), BTreeSet::from([t(4)]));
    }
}

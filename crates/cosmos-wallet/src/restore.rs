//! Gap-limit restore.
//!
//! Walks an address sequence from its cursor, asking the transaction
//! database for every output paid to each address. The scan stops after
//! `max_look_ahead` consecutive addresses with no history. Each output found
//! is either already redeemed, in which case the redeeming input joins the
//! history, or it becomes a spendable output of the account.

use std::collections::{BTreeMap, BTreeSet};

use bitcoin::Txid;
use tracing::{debug, info};

use cosmos_core::error::TxDbError;
use cosmos_core::ray::Ray;
use cosmos_core::traits::TxDb;

use crate::account::{AccountDiff, Redeemable};
use crate::config::DEFAULT_MAX_LOOK_AHEAD;
use crate::error::WalletError;
use crate::keys::AddressSequence;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Restore {
    /// Consecutive unused addresses after which the scan stops.
    pub max_look_ahead: u32,
}

impl Default for Restore {
    fn default() -> Self {
        Self { max_look_ahead: DEFAULT_MAX_LOOK_AHEAD }
    }
}

/// Satoshi totals over everything a restore found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub received: u64,
    pub spent: u64,
    /// Still held: received minus spent.
    pub held: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    /// Every output received and every input that spent one, in order.
    pub events: BTreeSet<Ray>,
    /// Spendable outputs, one diff per transaction.
    pub diffs: Vec<AccountDiff>,
    /// The sequence with its cursor one past the last address that had
    /// history, or unchanged if none did.
    pub last: AddressSequence,
    pub totals: Totals,
    /// Addresses queried.
    pub scanned: u32,
}

impl Restore {
    pub fn new(max_look_ahead: u32) -> Self {
        Self { max_look_ahead }
    }

    pub fn run<D: TxDb + ?Sized>(&self, db: &mut D, start: AddressSequence) -> Result<Restored, WalletError> {
        let mut sequence = start.clone();
        let mut last = start;
        let mut misses = 0u32;
        let mut scanned = 0u32;

        let mut events = BTreeSet::new();
        let mut found: BTreeMap<Txid, AccountDiff> = BTreeMap::new();
        let mut totals = Totals::default();

        loop {
            let index = sequence.last;
            let derivation = sequence.derivation(index)?;
            let address = sequence.last_address()?;
            sequence = sequence.next();
            scanned += 1;

            let rays = db.by_address(&address)?;
            debug!(index, %address, events = rays.len(), "restore: address scanned");

            if rays.is_empty() {
                misses += 1;
                if misses >= self.max_look_ahead {
                    break;
                }
                continue;
            }

            misses = 0;
            last = sequence.clone();

            for ray in rays {
                let Some(outpoint) = ray.outpoint() else {
                    events.insert(ray);
                    continue;
                };
                let value = ray.value();
                totals.received += value;

                match db.redeeming(&outpoint)? {
                    Some(redeemer) => {
                        debug!(%outpoint, spent_in = %redeemer.txid, value, "restore: output spent");
                        totals.spent += value;
                        events.insert(redeemer);
                    }
                    None => {
                        let prevout = ray.output().ok_or_else(|| {
                            TxDbError::Serialization(format!("undecodable output {outpoint}"))
                        })?;
                        found
                            .entry(outpoint.txid)
                            .or_insert_with(|| AccountDiff::new(outpoint.txid))
                            .insert
                            .insert(outpoint.vout, Redeemable { prevout, derivation: derivation.clone() });
                        totals.held += value;
                    }
                }
                events.insert(ray);
            }
        }

        info!(
            scanned,
            next = last.last,
            events = events.len(),
            received = totals.received,
            spent = totals.spent,
            held = totals.held,
            "restore: done"
        );

        Ok(Restored { events, diffs: found.into_values().collect(), last, totals, scanned })
    }
}

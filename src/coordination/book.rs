//! Per-(deposit, chain) records and the fan-in aggregation over them

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registry::{ChainId, KnownLedgers};

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Caller-chosen correlation key of one logical deposit
pub type DepositId = H256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    #[default]
    NotDeposited,
    Pending,
    Deposited,
    Failed,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::NotDeposited => "not_deposited",
            DepositStatus::Pending => "pending",
            DepositStatus::Deposited => "deposited",
            DepositStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_deposited" => Some(DepositStatus::NotDeposited),
            "pending" => Some(DepositStatus::Pending),
            "deposited" => Some(DepositStatus::Deposited),
            "failed" => Some(DepositStatus::Failed),
            _ => None,
        }
    }
}

/// One chain's leg of a deposit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub status: DepositStatus,
    pub depositor: Address,
    pub received_shares: U256,
    /// Quote currency committed to this leg
    pub quote_amount: U256,
}

/// Final outcome of a logical deposit, recorded once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum DepositVerdict {
    Completed { total_shares: U256 },
    Refunded { amount: U256 },
    /// Mixed final outcomes; deposited legs stay where they are
    PartiallyFailed,
}

/// Scan result over every known chain's record for one deposit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregate {
    pub deposited: Vec<ChainId>,
    pub failed: Vec<ChainId>,
    /// Known chains whose record is PENDING or was never opened
    pub unresolved: usize,
    pub total_shares: U256,
    pub total_quote: U256,
}

impl Aggregate {
    pub fn all_deposited(&self) -> bool {
        self.unresolved == 0 && self.failed.is_empty() && !self.deposited.is_empty()
    }

    pub fn all_failed(&self) -> bool {
        self.unresolved == 0 && self.deposited.is_empty() && !self.failed.is_empty()
    }

    pub fn partially_failed(&self) -> bool {
        self.unresolved == 0 && !self.deposited.is_empty() && !self.failed.is_empty()
    }
}

/// Deposit record counts by status
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DepositCounts {
    pub pending: u64,
    pub deposited: u64,
    pub failed: u64,
    pub completed: u64,
    pub refunded: u64,
    pub partially_failed: u64,
}

/// All deposit records, keyed by (deposit, chain)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DepositBook {
    records: HashMap<(DepositId, ChainId), DepositRecord>,
    verdicts: HashMap<DepositId, DepositVerdict>,
}

impl DepositBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, deposit_id: DepositId, chain_id: ChainId) -> Option<&DepositRecord> {
        self.records.get(&(deposit_id, chain_id))
    }

    pub fn status(&self, deposit_id: DepositId, chain_id: ChainId) -> DepositStatus {
        self.get(deposit_id, chain_id)
            .map(|r| r.status)
            .unwrap_or_default()
    }

    /// Fail unless the pair has never been touched
    pub fn ensure_untouched(&self, deposit_id: DepositId, chain_id: ChainId) -> OrchestratorResult<()> {
        let status = self.status(deposit_id, chain_id);
        if status != DepositStatus::NotDeposited {
            return Err(OrchestratorError::InvalidStateTransition {
                from: status.as_str().to_string(),
                to: DepositStatus::Pending.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Create the record for a pair that has not been touched yet
    pub fn open(
        &mut self,
        deposit_id: DepositId,
        chain_id: ChainId,
        record: DepositRecord,
    ) -> OrchestratorResult<()> {
        self.ensure_untouched(deposit_id, chain_id)?;
        self.records.insert((deposit_id, chain_id), record);
        Ok(())
    }

    /// Move a PENDING record to DEPOSITED or FAILED; returns its depositor
    pub fn resolve(
        &mut self,
        deposit_id: DepositId,
        chain_id: ChainId,
        to: DepositStatus,
        received_shares: U256,
    ) -> OrchestratorResult<Address> {
        let from = self.status(deposit_id, chain_id);
        let allowed = from == DepositStatus::Pending
            && matches!(to, DepositStatus::Deposited | DepositStatus::Failed);

        match self.records.get_mut(&(deposit_id, chain_id)) {
            Some(record) if allowed => {
                record.status = to;
                record.received_shares = received_shares;
                Ok(record.depositor)
            }
            _ => Err(OrchestratorError::InvalidStateTransition {
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            }),
        }
    }

    /// Scan every known chain's record for `deposit_id`.
    /// The result does not depend on the order receipts arrived in.
    pub fn aggregate(
        &self,
        deposit_id: DepositId,
        ledgers: &KnownLedgers,
    ) -> OrchestratorResult<Aggregate> {
        let mut aggregate = Aggregate::default();

        for chain_id in ledgers.iter() {
            let record = match self.get(deposit_id, chain_id) {
                Some(r) => r,
                None => {
                    aggregate.unresolved += 1;
                    continue;
                }
            };

            aggregate.total_quote = aggregate
                .total_quote
                .checked_add(record.quote_amount)
                .ok_or(OrchestratorError::AmountOverflow("total quote amount"))?;
            match record.status {
                DepositStatus::Deposited => {
                    aggregate.deposited.push(chain_id);
                    aggregate.total_shares = aggregate
                        .total_shares
                        .checked_add(record.received_shares)
                        .ok_or(OrchestratorError::AmountOverflow("total shares"))?;
                }
                DepositStatus::Failed => aggregate.failed.push(chain_id),
                DepositStatus::Pending | DepositStatus::NotDeposited => aggregate.unresolved += 1,
            }
        }

        Ok(aggregate)
    }

    pub fn verdict(&self, deposit_id: DepositId) -> Option<&DepositVerdict> {
        self.verdicts.get(&deposit_id)
    }

    /// Record the final verdict; returns false if one was already recorded
    pub fn settle(&mut self, deposit_id: DepositId, verdict: DepositVerdict) -> bool {
        if self.verdicts.contains_key(&deposit_id) {
            return false;
        }
        self.verdicts.insert(deposit_id, verdict);
        true
    }

    pub fn records_for(&self, deposit_id: DepositId) -> Vec<(ChainId, DepositRecord)> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|((id, _), _)| *id == deposit_id)
            .map(|((_, chain_id), record)| (*chain_id, record.clone()))
            .collect();
        records.sort_by_key(|(chain_id, _)| *chain_id);
        records
    }

    pub fn records(&self) -> impl Iterator<Item = (DepositId, ChainId, &DepositRecord)> + '_ {
        self.records.iter().map(|((id, chain), r)| (*id, *chain, r))
    }

    pub fn verdicts(&self) -> impl Iterator<Item = (DepositId, &DepositVerdict)> + '_ {
        self.verdicts.iter().map(|(id, v)| (*id, v))
    }

    pub fn counts(&self) -> DepositCounts {
        let mut counts = DepositCounts::default();
        for record in self.records.values() {
            match record.status {
                DepositStatus::Pending => counts.pending += 1,
                DepositStatus::Deposited => counts.deposited += 1,
                DepositStatus::Failed => counts.failed += 1,
                DepositStatus::NotDeposited => {}
            }
        }
        for verdict in self.verdicts.values() {
            match verdict {
                DepositVerdict::Completed { .. } => counts.completed += 1,
                DepositVerdict::Refunded { .. } => counts.refunded += 1,
                DepositVerdict::PartiallyFailed => counts.partially_failed += 1,
            }
        }
        counts
    }

    pub(crate) fn restore_record(&mut self, deposit_id: DepositId, chain_id: ChainId, record: DepositRecord) {
        self.records.insert((deposit_id, chain_id), record);
    }

    pub(crate) fn restore_verdict(&mut self, deposit_id: DepositId, verdict: DepositVerdict) {
        self.verdicts.insert(deposit_id, verdict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(amount: u64) -> DepositRecord {
        DepositRecord {
            status: DepositStatus::Pending,
            depositor: Address::from_low_u64_be(0xd0),
            received_shares: U256::zero(),
            quote_amount: U256::from(amount),
        }
    }

    fn ledgers() -> KnownLedgers {
        vec![1, 2, 3].into_iter().collect()
    }

    #[test]
    fn test_open_only_once_per_pair() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        book.open(id, 2, pending(100)).unwrap();
        assert!(book.open(id, 2, pending(100)).is_err());
        // Same deposit on another chain is a different pair
        book.open(id, 3, pending(100)).unwrap();
    }

    #[test]
    fn test_resolve_requires_pending() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        assert!(book.resolve(id, 2, DepositStatus::Deposited, U256::from(5)).is_err());

        book.open(id, 2, pending(100)).unwrap();
        assert!(book.resolve(id, 2, DepositStatus::Pending, U256::zero()).is_err());
        book.resolve(id, 2, DepositStatus::Deposited, U256::from(5)).unwrap();
        assert!(book.resolve(id, 2, DepositStatus::Failed, U256::zero()).is_err());
        assert_eq!(book.get(id, 2).unwrap().received_shares, U256::from(5));
    }

    #[test]
    fn test_aggregate_counts_untouched_ledgers_as_unresolved() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        book.open(id, 2, pending(100)).unwrap();
        book.resolve(id, 2, DepositStatus::Deposited, U256::from(90)).unwrap();

        let aggregate = book.aggregate(id, &ledgers()).unwrap();
        assert_eq!(aggregate.deposited, vec![2]);
        assert_eq!(aggregate.unresolved, 2);
        assert!(!aggregate.all_deposited());
    }

    #[test]
    fn test_aggregate_verdicts() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        for chain in [1, 2, 3] {
            book.open(id, chain, pending(100)).unwrap();
        }
        book.resolve(id, 1, DepositStatus::Failed, U256::zero()).unwrap();
        book.resolve(id, 2, DepositStatus::Failed, U256::zero()).unwrap();
        assert!(!book.aggregate(id, &ledgers()).unwrap().all_failed());

        book.resolve(id, 3, DepositStatus::Failed, U256::zero()).unwrap();
        let aggregate = book.aggregate(id, &ledgers()).unwrap();
        assert!(aggregate.all_failed());
        assert_eq!(aggregate.total_quote, U256::from(300));
    }

    #[test]
    fn test_aggregate_rejects_share_overflow() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        book.open(id, 2, pending(100)).unwrap();
        book.open(id, 3, pending(100)).unwrap();
        book.resolve(id, 2, DepositStatus::Deposited, U256::MAX).unwrap();
        book.resolve(id, 3, DepositStatus::Deposited, U256::one()).unwrap();

        let err = book.aggregate(id, &ledgers()).unwrap_err();
        assert!(matches!(err, OrchestratorError::AmountOverflow("total shares")));
    }

    #[test]
    fn test_aggregate_rejects_quote_overflow() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        book.open(id, 2, pending(1)).unwrap();
        let mut huge = pending(0);
        huge.quote_amount = U256::MAX;
        book.open(id, 3, huge).unwrap();

        let err = book.aggregate(id, &ledgers()).unwrap_err();
        assert!(matches!(err, OrchestratorError::AmountOverflow("total quote amount")));
    }

    #[test]
    fn test_settle_once() {
        let mut book = DepositBook::new();
        let id = H256::repeat_byte(1);
        assert!(book.settle(id, DepositVerdict::PartiallyFailed));
        assert!(!book.settle(
            id,
            DepositVerdict::Completed {
                total_shares: U256::one()
            }
        ));
        assert_eq!(book.verdict(id), Some(&DepositVerdict::PartiallyFailed));
        assert_eq!(book.counts().partially_failed, 1);
    }
}

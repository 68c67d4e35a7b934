//! State management with PostgreSQL persistence
//!
//! Handles:
//! - Changesets computed from a committed and a staged orchestrator state
//! - Persisting each changeset atomically before the in-memory commit
//! - Restoring the orchestrator state on restart
//! - Event journal

mod manager;

pub use manager::StateManager;

use crate::coordination::{DepositId, DepositRecord, DepositVerdict, OrchestratorState};
use crate::error::OrchestratorResult;
use crate::events::OrchestratorEvent;
use crate::registry::{ChainId, PoolRecord};

use async_trait::async_trait;
use ethers::types::Address;

/// Rows touched by one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub peers: Vec<(ChainId, Address)>,
    pub selectors: Vec<(ChainId, u64)>,
    pub known_ledgers: Vec<ChainId>,
    pub pools: Vec<(ChainId, PoolRecord)>,
    pub deposits: Vec<(DepositId, ChainId, DepositRecord)>,
    pub verdicts: Vec<(DepositId, DepositVerdict)>,
    pub events: Vec<OrchestratorEvent>,
}

impl Changeset {
    /// Rows that differ between the committed and the staged state.
    /// State only grows, so there are no deletions to track.
    pub fn between(
        committed: &OrchestratorState,
        staged: &OrchestratorState,
        events: &[OrchestratorEvent],
    ) -> Self {
        let old = &committed.registry;
        let new = &staged.registry;

        let peers = new
            .peers()
            .filter(|(chain_id, peer)| old.peer(*chain_id) != Some(*peer))
            .collect();

        let selectors = new
            .selectors()
            .filter(|(chain_id, selector)| old.selector(*chain_id) != Some(*selector))
            .collect();

        let known_ledgers = new
            .known_ledgers()
            .iter()
            .filter(|chain_id| !old.is_known(*chain_id))
            .collect();

        let pools = new
            .pools()
            .filter(|(chain_id, record)| old.pool_record(*chain_id) != **record)
            .map(|(chain_id, record)| (chain_id, record.clone()))
            .collect();

        let deposits = staged
            .deposits
            .records()
            .filter(|(id, chain_id, record)| committed.deposits.get(*id, *chain_id) != Some(*record))
            .map(|(id, chain_id, record)| (id, chain_id, record.clone()))
            .collect();

        let verdicts = staged
            .deposits
            .verdicts()
            .filter(|(id, _)| committed.deposits.verdict(*id).is_none())
            .map(|(id, verdict)| (id, verdict.clone()))
            .collect();

        Self {
            peers,
            selectors,
            known_ledgers,
            pools,
            deposits,
            verdicts,
            events: events.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
            && self.selectors.is_empty()
            && self.known_ledgers.is_empty()
            && self.pools.is_empty()
            && self.deposits.is_empty()
            && self.verdicts.is_empty()
            && self.events.is_empty()
    }
}

/// Durable storage behind the orchestrator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Write every row of `changes` or none of them
    async fn persist(&self, changes: &Changeset) -> OrchestratorResult<()>;

    /// Rebuild the state for the given local chain
    async fn load(&self, local_chain_id: ChainId) -> OrchestratorResult<OrchestratorState>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::DepositStatus;
    use crate::registry::PoolStatus;
    use ethers::types::{H256, U256};

    #[test]
    fn test_changeset_contains_only_touched_rows() {
        let mut committed = OrchestratorState::new(1);
        committed.registry.register_peer(2, Address::from_low_u64_be(0xb2)).unwrap();
        committed.registry.register_selector(2, 2002).unwrap();

        let mut staged = committed.clone();
        staged.registry.register_peer(3, Address::from_low_u64_be(0xb3)).unwrap();
        staged.registry.set_pool_status(3, PoolStatus::Creating);
        staged
            .deposits
            .open(
                H256::repeat_byte(9),
                3,
                DepositRecord {
                    status: DepositStatus::Pending,
                    depositor: Address::from_low_u64_be(0xd0),
                    received_shares: U256::zero(),
                    quote_amount: U256::from(100),
                },
            )
            .unwrap();

        let changes = Changeset::between(&committed, &staged, &[]);
        assert_eq!(changes.peers, vec![(3, Address::from_low_u64_be(0xb3))]);
        assert!(changes.selectors.is_empty());
        assert!(changes.known_ledgers.is_empty());
        assert_eq!(changes.pools.len(), 1);
        assert_eq!(changes.pools[0].1.status, PoolStatus::Creating);
        assert_eq!(changes.deposits.len(), 1);
        assert!(changes.verdicts.is_empty());
    }

    #[test]
    fn test_identical_states_produce_empty_changeset() {
        let state = OrchestratorState::new(1);
        assert!(Changeset::between(&state, &state.clone(), &[]).is_empty());
    }
}

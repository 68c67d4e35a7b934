//! Orchestrator event types
//!
//! Every committed invocation produces a list of events. They are journaled
//! by the state manager, counted by metrics and broadcast to subscribers.

use crate::registry::ChainId;

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Events emitted by the pool lifecycle and deposit state machines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrchestratorEvent {
    /// Peer orchestrator registered for a remote chain
    PeerRegistered { chain_id: ChainId, peer: Address },

    /// Messaging selector registered for a remote chain
    SelectorRegistered { chain_id: ChainId, selector: u64 },

    /// Pool became active (locally created or confirmed by receipt)
    PoolCreated {
        chain_id: ChainId,
        address: Address,
        pool_id: H256,
        tokens: Vec<Address>,
    },

    /// CREATE_POOL request sent to a remote chain
    PoolCreationRequested {
        chain_id: ChainId,
        message_id: H256,
        fee: U256,
    },

    /// Remote chain reported pool creation failure
    PoolCreationFailed { chain_id: ChainId },

    /// Remote chain reported token addition failure
    TokenAdditionFailed { chain_id: ChainId },

    /// DEPOSIT request sent to a remote chain
    DepositRequested {
        deposit_id: H256,
        chain_id: ChainId,
        message_id: H256,
        amount: U256,
        fee: U256,
    },

    /// One chain's leg of a deposit succeeded
    Deposited {
        deposit_id: H256,
        chain_id: ChainId,
        shares: U256,
    },

    /// One chain's leg of a deposit failed
    DepositFailed { deposit_id: H256, chain_id: ChainId },

    /// Every known chain deposited
    DepositCompleted {
        deposit_id: H256,
        depositor: Address,
        total_shares: U256,
    },

    /// Every known chain failed; the depositor was refunded
    DepositRefunded {
        deposit_id: H256,
        depositor: Address,
        amount: U256,
    },

    /// Outcomes are final but mixed; no funds were moved
    DepositPartiallyFailed {
        deposit_id: H256,
        deposited_chains: Vec<ChainId>,
        failed_chains: Vec<ChainId>,
    },

    /// Reply to a peer's request sent back to it
    ReceiptSent {
        chain_id: ChainId,
        message_id: H256,
        receipt: String,
    },
}

impl OrchestratorEvent {
    /// Chain the event concerns, if it concerns exactly one
    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            OrchestratorEvent::PeerRegistered { chain_id, .. }
            | OrchestratorEvent::SelectorRegistered { chain_id, .. }
            | OrchestratorEvent::PoolCreated { chain_id, .. }
            | OrchestratorEvent::PoolCreationRequested { chain_id, .. }
            | OrchestratorEvent::PoolCreationFailed { chain_id }
            | OrchestratorEvent::TokenAdditionFailed { chain_id }
            | OrchestratorEvent::DepositRequested { chain_id, .. }
            | OrchestratorEvent::Deposited { chain_id, .. }
            | OrchestratorEvent::DepositFailed { chain_id, .. }
            | OrchestratorEvent::ReceiptSent { chain_id, .. } => Some(*chain_id),
            OrchestratorEvent::DepositCompleted { .. }
            | OrchestratorEvent::DepositRefunded { .. }
            | OrchestratorEvent::DepositPartiallyFailed { .. } => None,
        }
    }

    /// Deposit the event concerns, if any
    pub fn deposit_id(&self) -> Option<H256> {
        match self {
            OrchestratorEvent::DepositRequested { deposit_id, .. }
            | OrchestratorEvent::Deposited { deposit_id, .. }
            | OrchestratorEvent::DepositFailed { deposit_id, .. }
            | OrchestratorEvent::DepositCompleted { deposit_id, .. }
            | OrchestratorEvent::DepositRefunded { deposit_id, .. }
            | OrchestratorEvent::DepositPartiallyFailed { deposit_id, .. } => Some(*deposit_id),
            _ => None,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            OrchestratorEvent::PeerRegistered { .. } => "peer_registered",
            OrchestratorEvent::SelectorRegistered { .. } => "selector_registered",
            OrchestratorEvent::PoolCreated { .. } => "pool_created",
            OrchestratorEvent::PoolCreationRequested { .. } => "pool_creation_requested",
            OrchestratorEvent::PoolCreationFailed { .. } => "pool_creation_failed",
            OrchestratorEvent::TokenAdditionFailed { .. } => "token_addition_failed",
            OrchestratorEvent::DepositRequested { .. } => "deposit_requested",
            OrchestratorEvent::Deposited { .. } => "deposited",
            OrchestratorEvent::DepositFailed { .. } => "deposit_failed",
            OrchestratorEvent::DepositCompleted { .. } => "deposit_completed",
            OrchestratorEvent::DepositRefunded { .. } => "deposit_refunded",
            OrchestratorEvent::DepositPartiallyFailed { .. } => "deposit_partially_failed",
            OrchestratorEvent::ReceiptSent { .. } => "receipt_sent",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let event = OrchestratorEvent::Deposited {
            deposit_id: H256::repeat_byte(1),
            chain_id: 3,
            shares: U256::from(120),
        };
        assert_eq!(event.chain_id(), Some(3));
        assert_eq!(event.deposit_id(), Some(H256::repeat_byte(1)));
        assert_eq!(event.name(), "deposited");

        let event = OrchestratorEvent::PoolCreationFailed { chain_id: 2 };
        assert_eq!(event.deposit_id(), None);
    }

    #[test]
    fn test_event_serializes_for_journal() {
        let event = OrchestratorEvent::PoolCreationFailed { chain_id: 2 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["PoolCreationFailed"]["chain_id"], 2);
    }
}

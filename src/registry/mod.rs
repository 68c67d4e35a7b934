//! Chain registry - known ledgers, peer orchestrators, selectors and pools
//!
//! This module provides:
//! - The known-ledger set scanned during deposit aggregation
//! - Register-once peer and messaging selector tables
//! - One pool record per ledger

mod ledgers;

pub use ledgers::KnownLedgers;

use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Ledger identifier
pub type ChainId = u64;

/// Lifecycle of a ledger's pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    #[default]
    NotCreated,
    Creating,
    Active,
}

impl PoolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::NotCreated => "not_created",
            PoolStatus::Creating => "creating",
            PoolStatus::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_created" => Some(PoolStatus::NotCreated),
            "creating" => Some(PoolStatus::Creating),
            "active" => Some(PoolStatus::Active),
            _ => None,
        }
    }
}

/// Pool held on a ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRecord {
    pub address: Address,
    /// Canonical (ascending) token order
    pub tokens: Vec<Address>,
    pub pool_id: H256,
    pub status: PoolStatus,
}

/// Registry of ledgers this orchestrator coordinates with
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRegistry {
    local_chain_id: ChainId,
    known: KnownLedgers,
    peers: HashMap<ChainId, Address>,
    selectors: HashMap<ChainId, u64>,
    pools: HashMap<ChainId, PoolRecord>,
}

impl ChainRegistry {
    /// Create a registry whose only known ledger is the local one
    pub fn new(local_chain_id: ChainId) -> Self {
        let mut known = KnownLedgers::new();
        known.insert(local_chain_id);

        Self {
            local_chain_id,
            known,
            peers: HashMap::new(),
            selectors: HashMap::new(),
            pools: HashMap::new(),
        }
    }

    pub fn local_chain_id(&self) -> ChainId {
        self.local_chain_id
    }

    pub fn is_local(&self, chain_id: ChainId) -> bool {
        chain_id == self.local_chain_id
    }

    /// Register the peer orchestrator for a remote ledger (register-once)
    pub fn register_peer(&mut self, chain_id: ChainId, peer: Address) -> OrchestratorResult<()> {
        if self.is_local(chain_id) {
            return Err(OrchestratorError::LocalPeer { chain_id });
        }
        if peer.is_zero() {
            return Err(OrchestratorError::InvalidPeer { chain_id });
        }
        if let Some(existing) = self.peers.get(&chain_id) {
            return Err(OrchestratorError::PeerAlreadyRegistered {
                chain_id,
                peer: *existing,
            });
        }

        self.peers.insert(chain_id, peer);
        info!("Registered peer {:?} for chain {}", peer, chain_id);
        Ok(())
    }

    /// Register the messaging selector for a remote ledger (register-once)
    pub fn register_selector(&mut self, chain_id: ChainId, selector: u64) -> OrchestratorResult<()> {
        if self.is_local(chain_id) || selector == 0 {
            return Err(OrchestratorError::InvalidSelector { chain_id });
        }
        if let Some(existing) = self.selectors.get(&chain_id) {
            return Err(OrchestratorError::SelectorAlreadyRegistered {
                chain_id,
                selector: *existing,
            });
        }

        self.selectors.insert(chain_id, selector);
        Ok(())
    }

    pub fn peer(&self, chain_id: ChainId) -> Option<Address> {
        self.peers.get(&chain_id).copied()
    }

    pub fn selector(&self, chain_id: ChainId) -> Option<u64> {
        self.selectors.get(&chain_id).copied()
    }

    /// Pool record for a ledger; ledgers never touched report `NotCreated`
    pub fn pool_record(&self, chain_id: ChainId) -> PoolRecord {
        self.pools.get(&chain_id).cloned().unwrap_or_default()
    }

    pub fn pool_status(&self, chain_id: ChainId) -> PoolStatus {
        self.pools
            .get(&chain_id)
            .map(|p| p.status)
            .unwrap_or_default()
    }

    pub fn set_pool_record(&mut self, chain_id: ChainId, record: PoolRecord) {
        self.pools.insert(chain_id, record);
    }

    pub fn set_pool_status(&mut self, chain_id: ChainId, status: PoolStatus) {
        self.pools.entry(chain_id).or_default().status = status;
    }

    pub fn known_ledgers(&self) -> &KnownLedgers {
        &self.known
    }

    pub fn is_known(&self, chain_id: ChainId) -> bool {
        self.known.contains(chain_id)
    }

    pub fn add_known(&mut self, chain_id: ChainId) -> bool {
        self.known.insert(chain_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = (ChainId, Address)> + '_ {
        self.peers.iter().map(|(c, p)| (*c, *p))
    }

    pub fn selectors(&self) -> impl Iterator<Item = (ChainId, u64)> + '_ {
        self.selectors.iter().map(|(c, s)| (*c, *s))
    }

    pub fn pools(&self) -> impl Iterator<Item = (ChainId, &PoolRecord)> + '_ {
        self.pools.iter().map(|(c, p)| (*c, p))
    }

    /// Reinsert persisted rows without the register-once checks
    pub(crate) fn restore_peer(&mut self, chain_id: ChainId, peer: Address) {
        self.peers.insert(chain_id, peer);
    }

    pub(crate) fn restore_selector(&mut self, chain_id: ChainId, selector: u64) {
        self.selectors.insert(chain_id, selector);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    #[test]
    fn test_local_ledger_is_known() {
        let registry = ChainRegistry::new(1);
        assert!(registry.is_known(1));
        assert_eq!(registry.known_ledgers().len(), 1);
        assert_eq!(registry.pool_status(1), PoolStatus::NotCreated);
    }

    #[test]
    fn test_register_peer_for_local_chain_fails() {
        let mut registry = ChainRegistry::new(1);
        let err = registry.register_peer(1, addr(7)).unwrap_err();
        assert!(matches!(err, OrchestratorError::LocalPeer { chain_id: 1 }));
        assert!(registry.peer(1).is_none());
    }

    #[test]
    fn test_register_peer_rejects_zero_and_replacement() {
        let mut registry = ChainRegistry::new(1);
        assert!(matches!(
            registry.register_peer(2, Address::zero()),
            Err(OrchestratorError::InvalidPeer { chain_id: 2 })
        ));

        registry.register_peer(2, addr(7)).unwrap();
        let err = registry.register_peer(2, addr(8)).unwrap_err();
        assert!(matches!(err, OrchestratorError::PeerAlreadyRegistered { .. }));
        assert_eq!(registry.peer(2), Some(addr(7)));
        // Registering a peer does not make the ledger known
        assert!(!registry.is_known(2));
    }

    #[test]
    fn test_register_selector() {
        let mut registry = ChainRegistry::new(1);
        assert_err!(registry.register_selector(1, 99));
        assert_err!(registry.register_selector(2, 0));
        assert_ok!(registry.register_selector(2, 99));
        assert_err!(registry.register_selector(2, 100));
        assert_eq!(registry.selector(2), Some(99));
    }

    #[test]
    fn test_set_pool_status_creates_record() {
        let mut registry = ChainRegistry::new(1);
        registry.set_pool_status(3, PoolStatus::Creating);
        let record = registry.pool_record(3);
        assert_eq!(record.status, PoolStatus::Creating);
        assert!(record.tokens.is_empty());
    }
}

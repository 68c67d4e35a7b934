//! Invocation engine: every public operation runs atomically
//!
//! An operation takes the write lock, stages its changes on a copy of the
//! state and only commits that copy, after persisting the diff, when every
//! handler succeeded. A failed operation leaves no trace in memory, in the
//! database or on the event stream.

use super::book::{DepositBook, DepositCounts, DepositId, DepositRecord, DepositVerdict};
use super::deposit::{DepositLeg, DepositOutcome, DepositParams};
use super::pool::PoolCreation;
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::messaging::{InboundMessage, MessagingGateway};
use crate::registry::{ChainId, ChainRegistry, PoolRecord};
use crate::services::Collaborators;
use crate::state::{Changeset, StateStore};

use ethers::types::{Address, U256};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Everything the orchestrator owns
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorState {
    pub registry: ChainRegistry,
    pub deposits: DepositBook,
}

impl OrchestratorState {
    pub fn new(local_chain_id: ChainId) -> Self {
        Self {
            registry: ChainRegistry::new(local_chain_id),
            deposits: DepositBook::new(),
        }
    }
}

/// Staged state and events of one in-flight operation
pub(crate) struct Invocation {
    pub(crate) state: OrchestratorState,
    events: Vec<OrchestratorEvent>,
}

/// Point an invocation can roll back to
pub(crate) struct Savepoint {
    state: OrchestratorState,
    events: usize,
}

impl Invocation {
    fn begin(committed: &OrchestratorState) -> Self {
        Self {
            state: committed.clone(),
            events: Vec::new(),
        }
    }

    pub(crate) fn emit(&mut self, event: OrchestratorEvent) {
        self.events.push(event);
    }

    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint {
            state: self.state.clone(),
            events: self.events.len(),
        }
    }

    pub(crate) fn rollback(&mut self, savepoint: Savepoint) {
        self.state = savepoint.state;
        self.events.truncate(savepoint.events);
    }
}

/// Per-ledger view of one deposit
#[derive(Debug, Clone, Serialize)]
pub struct LedgerDeposit {
    pub chain_id: ChainId,
    pub record: DepositRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositProgress {
    InFlight,
    Settled(DepositVerdict),
}

/// Every known ledger's record for a deposit plus its verdict
#[derive(Debug, Clone, Serialize)]
pub struct DepositSummary {
    pub deposit_id: DepositId,
    pub ledgers: Vec<LedgerDeposit>,
    pub progress: DepositProgress,
}

/// Cross-ledger pool and deposit orchestrator
pub struct Orchestrator {
    pub(super) config: OrchestratorConfig,
    pub(super) gateway: MessagingGateway,
    pub(super) services: Collaborators,
    state: RwLock<OrchestratorState>,
    store: Option<Arc<dyn StateStore>>,
    event_tx: broadcast::Sender<OrchestratorEvent>,
}

impl Orchestrator {
    /// Create an orchestrator with empty state
    pub fn new(config: OrchestratorConfig, gateway: MessagingGateway, services: Collaborators) -> Self {
        let (event_tx, _) = broadcast::channel(1000);
        let state = OrchestratorState::new(config.local_chain_id);

        Self {
            config,
            gateway,
            services,
            state: RwLock::new(state),
            store: None,
            event_tx,
        }
    }

    /// Persist every committed invocation to `store`
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the in-memory state with the one held by the store
    pub async fn restore(&self) -> OrchestratorResult<()> {
        let store = match &self.store {
            Some(store) => store.clone(),
            None => return Ok(()),
        };

        let restored = store.load(self.config.local_chain_id).await?;
        if restored.registry.local_chain_id() != self.config.local_chain_id {
            return Err(OrchestratorError::Config(format!(
                "stored state belongs to chain {}",
                restored.registry.local_chain_id()
            )));
        }

        let counts = restored.deposits.counts();
        *self.state.write().await = restored;
        crate::metrics::set_pending_deposits(counts.pending);
        Ok(())
    }

    pub fn local_chain_id(&self) -> ChainId {
        self.config.local_chain_id
    }

    /// Holder of the registry administration capability
    pub fn admin(&self) -> Address {
        self.config.admin
    }

    /// Subscribe to committed events
    pub fn subscribe_events(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.event_tx.subscribe()
    }

    /// Commit the staged invocation if the operation succeeded
    async fn finish<T>(
        &self,
        committed: &mut RwLockWriteGuard<'_, OrchestratorState>,
        operation: &'static str,
        invocation: Invocation,
        result: OrchestratorResult<T>,
    ) -> OrchestratorResult<T> {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                warn!("{} reverted: {}", operation, e);
                crate::metrics::record_reverted(operation, e.category().as_str());
                return Err(e);
            }
        };

        let Invocation { state: staged, events } = invocation;

        if let Some(store) = &self.store {
            let changes = Changeset::between(&**committed, &staged, &events);
            if let Err(e) = store.persist(&changes).await {
                warn!("{} reverted: failed to persist state: {}", operation, e);
                crate::metrics::record_reverted(operation, e.category().as_str());
                return Err(e);
            }
        }

        **committed = staged;

        for event in events {
            info!("{}: {:?}", operation, event);
            crate::metrics::record_event(&event);
            // No subscribers is fine
            let _ = self.event_tx.send(event);
        }
        crate::metrics::set_pending_deposits(committed.deposits.counts().pending);

        Ok(value)
    }

    fn ensure_admin(&self, caller: Address) -> OrchestratorResult<()> {
        if caller != self.config.admin {
            return Err(OrchestratorError::Unauthorized { caller });
        }
        Ok(())
    }

    /// Register the peer orchestrator for a remote ledger
    pub async fn register_peer(&self, caller: Address, chain_id: ChainId, peer: Address) -> OrchestratorResult<()> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self.ensure_admin(caller).and_then(|_| {
            invocation.state.registry.register_peer(chain_id, peer)?;
            invocation.emit(OrchestratorEvent::PeerRegistered { chain_id, peer });
            Ok(())
        });

        self.finish(&mut committed, "register_peer", invocation, result).await
    }

    /// Register the messaging selector for a remote ledger
    pub async fn register_selector(&self, caller: Address, chain_id: ChainId, selector: u64) -> OrchestratorResult<()> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self.ensure_admin(caller).and_then(|_| {
            invocation.state.registry.register_selector(chain_id, selector)?;
            invocation.emit(OrchestratorEvent::SelectorRegistered { chain_id, selector });
            Ok(())
        });

        self.finish(&mut committed, "register_selector", invocation, result).await
    }

    /// Start creating the pool on `chain_id`
    pub async fn request_pool_creation(
        &self,
        chain_id: ChainId,
        name: &str,
        tokens: Vec<Address>,
    ) -> OrchestratorResult<PoolCreation> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self
            .create_pool_in(&mut invocation, chain_id, name.to_string(), tokens)
            .await;

        self.finish(&mut committed, "request_pool_creation", invocation, result).await
    }

    /// Deposit on one ledger
    pub async fn request_pool_deposit(
        &self,
        request: DepositParams,
    ) -> OrchestratorResult<DepositOutcome> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self.deposit_in(&mut invocation, request).await;

        self.finish(&mut committed, "request_pool_deposit", invocation, result).await
    }

    /// Deposit on several ledgers at once; all legs commit or none do
    pub async fn request_deposits(
        &self,
        deposit_id: DepositId,
        depositor: Address,
        legs: Vec<DepositLeg>,
    ) -> OrchestratorResult<Vec<DepositOutcome>> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self.fan_out(&mut invocation, deposit_id, depositor, legs).await;

        self.finish(&mut committed, "request_deposits", invocation, result).await
    }

    /// Join the local pool with tokens the oracle intake already swapped into
    pub async fn deposit_swapped(
        &self,
        deposit_id: DepositId,
        depositor: Address,
        quote_amount: U256,
        min_output: U256,
    ) -> OrchestratorResult<DepositOutcome> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        let result = self
            .join_swapped(&mut invocation, deposit_id, depositor, quote_amount, min_output)
            .await;

        self.finish(&mut committed, "deposit_swapped", invocation, result).await
    }

    /// Single inbound entry point for relay deliveries
    pub async fn receive_message(&self, message: InboundMessage) -> OrchestratorResult<()> {
        let mut committed = self.state.write().await;
        let mut invocation = Invocation::begin(&committed);

        debug!(
            "Received message {} from {:?}",
            hex::encode(message.message_id),
            message.sender
        );
        let result = self.dispatch(&mut invocation, message).await;

        self.finish(&mut committed, "receive_message", invocation, result).await
    }

    pub async fn peer(&self, chain_id: ChainId) -> Option<Address> {
        self.state.read().await.registry.peer(chain_id)
    }

    pub async fn selector(&self, chain_id: ChainId) -> Option<u64> {
        self.state.read().await.registry.selector(chain_id)
    }

    pub async fn pool_record(&self, chain_id: ChainId) -> PoolRecord {
        self.state.read().await.registry.pool_record(chain_id)
    }

    pub async fn known_ledgers(&self) -> Vec<ChainId> {
        self.state.read().await.registry.known_ledgers().to_vec()
    }

    pub async fn deposit_record(&self, deposit_id: DepositId, chain_id: ChainId) -> Option<DepositRecord> {
        self.state.read().await.deposits.get(deposit_id, chain_id).cloned()
    }

    pub async fn deposit_counts(&self) -> DepositCounts {
        self.state.read().await.deposits.counts()
    }

    /// Every known ledger's record for `deposit_id` and its verdict
    pub async fn deposit_summary(&self, deposit_id: DepositId) -> DepositSummary {
        let state = self.state.read().await;

        let ledgers = state
            .registry
            .known_ledgers()
            .iter()
            .map(|chain_id| LedgerDeposit {
                chain_id,
                record: state.deposits.get(deposit_id, chain_id).cloned().unwrap_or_default(),
            })
            .collect();

        let progress = match state.deposits.verdict(deposit_id) {
            Some(verdict) => DepositProgress::Settled(verdict.clone()),
            None => DepositProgress::InFlight,
        };

        DepositSummary {
            deposit_id,
            ledgers,
            progress,
        }
    }

    /// Copy of the committed state
    pub async fn snapshot(&self) -> OrchestratorState {
        self.state.read().await.clone()
    }
}

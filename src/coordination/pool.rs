//! Pool lifecycle: NOT_CREATED -> CREATING -> ACTIVE
//!
//! The local pool is created synchronously through the AMM. Remote pools are
//! requested by message and only become ACTIVE when the peer's POOL_CREATED
//! receipt arrives. A failure receipt is reported but leaves the ledger in
//! CREATING, so it cannot be requested a second time.

use super::engine::{Invocation, Orchestrator};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::messaging::codec::{CreatePoolRequest, PoolCreatedReceipt};
use crate::messaging::{Envelope, MessageKind};
use crate::registry::{ChainId, PoolRecord, PoolStatus};
use crate::tokens::canonical_tokens;

use ethers::types::{Address, H256, U256};
use serde::Serialize;
use tracing::{info, warn};

/// Result of a pool creation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PoolCreation {
    /// Local pool created and active
    Created { record: PoolRecord },
    /// CREATE_POOL message sent; the pool is CREATING until the receipt arrives
    Requested { message_id: H256, fee: U256 },
}

impl Orchestrator {
    pub(super) async fn create_pool_in(
        &self,
        invocation: &mut Invocation,
        chain_id: ChainId,
        name: String,
        tokens: Vec<Address>,
    ) -> OrchestratorResult<PoolCreation> {
        let current = invocation.state.registry.pool_record(chain_id);
        if current.status != PoolStatus::NotCreated {
            return Err(OrchestratorError::PoolAlreadyCreated {
                chain_id,
                address: current.address,
            });
        }

        let tokens = canonical_tokens(tokens)?;

        if invocation.state.registry.is_local(chain_id) {
            let record = self.create_local_pool(invocation, name, tokens).await?;
            return Ok(PoolCreation::Created { record });
        }

        invocation
            .state
            .registry
            .set_pool_status(chain_id, PoolStatus::Creating);

        let envelope = Envelope::request(
            MessageKind::CreatePool,
            self.config.local_chain_id,
            CreatePoolRequest { tokens, name },
        );
        let prepared = self
            .gateway
            .build_message(
                &invocation.state.registry,
                chain_id,
                self.config.create_pool_gas_limit,
                U256::zero(),
                &envelope,
            )
            .await?;
        let fee = prepared.fee;
        let message_id = self.gateway.send(prepared).await?;

        info!(
            "Requested pool creation on chain {} (message {}, fee {})",
            chain_id,
            hex::encode(message_id),
            fee
        );
        invocation.emit(OrchestratorEvent::PoolCreationRequested {
            chain_id,
            message_id,
            fee,
        });

        Ok(PoolCreation::Requested { message_id, fee })
    }

    /// Create the local pool through the AMM; `tokens` must already be canonical
    pub(super) async fn create_local_pool(
        &self,
        invocation: &mut Invocation,
        name: String,
        tokens: Vec<Address>,
    ) -> OrchestratorResult<PoolRecord> {
        let local = self.config.local_chain_id;

        let created = self
            .services
            .amm
            .create_pool(name, self.config.chain_label.clone(), tokens.clone())
            .await?;

        let record = PoolRecord {
            address: created.address,
            tokens,
            pool_id: created.pool_id,
            status: PoolStatus::Active,
        };
        self.activate_pool(invocation, local, record.clone()).await?;

        Ok(record)
    }

    async fn activate_pool(
        &self,
        invocation: &mut Invocation,
        chain_id: ChainId,
        record: PoolRecord,
    ) -> OrchestratorResult<()> {
        invocation.state.registry.add_known(chain_id);
        invocation
            .state
            .registry
            .set_pool_record(chain_id, record.clone());

        self.services
            .hooks
            .on_pool_created(chain_id, record.tokens.clone())
            .await?;

        info!(
            "Pool {:?} active on chain {} with {} tokens",
            record.address,
            chain_id,
            record.tokens.len()
        );
        invocation.emit(OrchestratorEvent::PoolCreated {
            chain_id,
            address: record.address,
            pool_id: record.pool_id,
            tokens: record.tokens,
        });

        Ok(())
    }

    pub(super) async fn on_pool_created_receipt(
        &self,
        invocation: &mut Invocation,
        chain_id: ChainId,
        receipt: PoolCreatedReceipt,
    ) -> OrchestratorResult<()> {
        let current = invocation.state.registry.pool_record(chain_id);
        if current.status == PoolStatus::Active {
            return Err(OrchestratorError::PoolAlreadyCreated {
                chain_id,
                address: current.address,
            });
        }

        let record = PoolRecord {
            address: receipt.address,
            tokens: canonical_tokens(receipt.tokens)?,
            pool_id: receipt.pool_id,
            status: PoolStatus::Active,
        };
        self.activate_pool(invocation, chain_id, record).await
    }

    pub(super) fn on_pool_creation_failed(&self, invocation: &mut Invocation, chain_id: ChainId) {
        warn!("Pool creation failed on chain {}", chain_id);
        invocation.emit(OrchestratorEvent::PoolCreationFailed { chain_id });
    }

    pub(super) fn on_token_addition_failed(&self, invocation: &mut Invocation, chain_id: ChainId) {
        warn!("Token addition failed on chain {}", chain_id);
        invocation.emit(OrchestratorEvent::TokenAdditionFailed { chain_id });
    }
}

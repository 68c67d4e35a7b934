//! Inbound message dispatch
//!
//! Every delivery is authenticated against the registered peer of its origin
//! ledger before anything else happens. Receipts are routed to the pool and
//! deposit state machines; requests are served against the local pool and
//! answered with a receipt.

use super::deposit::active_pool;
use super::engine::{Invocation, Orchestrator};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::messaging::codec::{
    AbiPayload, CreatePoolRequest, DepositFailedReceipt, DepositRequest, DepositedReceipt,
    PoolCreatedReceipt, ReceiptBody,
};
use crate::messaging::{Envelope, FailureKind, InboundMessage, MessageKind, SuccessKind};
use crate::registry::{ChainId, PoolStatus};
use crate::tokens::{canonical_assets, canonical_tokens, equal_weights};

use ethers::types::{Bytes, U256};
use tracing::{debug, info, warn};

impl Orchestrator {
    pub(super) async fn dispatch(
        &self,
        invocation: &mut Invocation,
        message: InboundMessage,
    ) -> OrchestratorResult<()> {
        let envelope = Envelope::decode(&message.data)?;
        let origin = envelope.origin_chain_id;

        let expected = invocation.state.registry.peer(origin);
        if expected != Some(message.sender) {
            crate::metrics::record_message_rejected(origin, "sender_mismatch");
            return Err(OrchestratorError::SenderMismatch {
                chain_id: origin,
                expected,
                actual: message.sender,
            });
        }

        let kind = match envelope.message_kind() {
            Some(kind) => kind,
            None => {
                debug!("Ignoring message of unknown kind {} from chain {}", envelope.kind, origin);
                return Ok(());
            }
        };
        crate::metrics::record_message_received(origin, kind.name());

        match kind {
            MessageKind::Success => self.dispatch_success(invocation, origin, &envelope.payload).await,
            MessageKind::Failure => self.dispatch_failure(invocation, origin, &envelope.payload).await,
            MessageKind::CreatePool => {
                let request = CreatePoolRequest::decode(&envelope.payload)?;
                self.serve_create_pool(invocation, origin, request).await
            }
            MessageKind::Deposit => {
                let request = DepositRequest::decode(&envelope.payload)?;
                let attached = message.attached(self.gateway.quote_token())?;
                self.serve_deposit(invocation, origin, request, attached).await
            }
        }
    }

    async fn dispatch_success(
        &self,
        invocation: &mut Invocation,
        origin: ChainId,
        payload: &[u8],
    ) -> OrchestratorResult<()> {
        let receipt = ReceiptBody::decode(payload)?;

        match SuccessKind::from_u8(receipt.sub_kind) {
            Some(SuccessKind::PoolCreated) => {
                let body = PoolCreatedReceipt::decode(&receipt.body)?;
                self.on_pool_created_receipt(invocation, origin, body).await
            }
            Some(SuccessKind::Deposited) => {
                let body = DepositedReceipt::decode(&receipt.body)?;
                self.on_deposited_receipt(invocation, origin, body).await
            }
            Some(SuccessKind::Withdraw) => {
                info!("Withdraw receipt from chain {} ignored", origin);
                Ok(())
            }
            None => {
                debug!("Ignoring success receipt sub-kind {} from chain {}", receipt.sub_kind, origin);
                Ok(())
            }
        }
    }

    async fn dispatch_failure(
        &self,
        invocation: &mut Invocation,
        origin: ChainId,
        payload: &[u8],
    ) -> OrchestratorResult<()> {
        let receipt = ReceiptBody::decode(payload)?;

        match FailureKind::from_u8(receipt.sub_kind) {
            Some(FailureKind::PoolCreationFailed) => {
                self.on_pool_creation_failed(invocation, origin);
                Ok(())
            }
            Some(FailureKind::TokenAdditionFailed) => {
                self.on_token_addition_failed(invocation, origin);
                Ok(())
            }
            Some(FailureKind::DepositFailed) => {
                let body = DepositFailedReceipt::decode(&receipt.body)?;
                self.on_deposit_failed_receipt(invocation, origin, body).await
            }
            None => {
                debug!("Ignoring failure receipt sub-kind {} from chain {}", receipt.sub_kind, origin);
                Ok(())
            }
        }
    }

    /// Create the local pool for a peer and answer with the outcome
    async fn serve_create_pool(
        &self,
        invocation: &mut Invocation,
        origin: ChainId,
        request: CreatePoolRequest,
    ) -> OrchestratorResult<()> {
        let local = self.config.local_chain_id;
        let savepoint = invocation.savepoint();

        let created = match invocation.state.registry.pool_status(local) {
            PoolStatus::NotCreated => match canonical_tokens(request.tokens) {
                Ok(tokens) => self.create_local_pool(invocation, request.name, tokens).await,
                Err(e) => Err(e),
            },
            _ => Err(OrchestratorError::PoolAlreadyCreated {
                chain_id: local,
                address: invocation.state.registry.pool_record(local).address,
            }),
        };

        let (envelope, receipt) = match created {
            Ok(record) => {
                let body = PoolCreatedReceipt {
                    address: record.address,
                    pool_id: record.pool_id,
                    weights: equal_weights(record.tokens.len()),
                    tokens: record.tokens,
                };
                (
                    Envelope::success(local, SuccessKind::PoolCreated, body.encode()),
                    SuccessKind::PoolCreated.name(),
                )
            }
            Err(e) => {
                warn!("Pool creation requested by chain {} failed: {}", origin, e);
                invocation.rollback(savepoint);
                (
                    Envelope::failure(local, FailureKind::PoolCreationFailed, Bytes::default()),
                    FailureKind::PoolCreationFailed.name(),
                )
            }
        };

        self.reply(invocation, origin, U256::zero(), envelope, receipt).await
    }

    /// Deposit a peer's attached quote currency into the local pool
    async fn serve_deposit(
        &self,
        invocation: &mut Invocation,
        origin: ChainId,
        request: DepositRequest,
        attached: U256,
    ) -> OrchestratorResult<()> {
        let local = self.config.local_chain_id;
        let deposit_id = request.deposit_id;

        let (envelope, returned, receipt) = match self.execute_deposit(invocation, request, attached).await {
            Ok(shares) => {
                info!(
                    "Deposited {} for chain {}: {} shares",
                    hex::encode(deposit_id),
                    origin,
                    shares
                );
                let body = DepositedReceipt {
                    deposit_id,
                    received_shares: shares,
                };
                (
                    Envelope::success(local, SuccessKind::Deposited, body.encode()),
                    U256::zero(),
                    SuccessKind::Deposited.name(),
                )
            }
            Err(e) => {
                warn!(
                    "Deposit {} requested by chain {} failed: {}",
                    hex::encode(deposit_id),
                    origin,
                    e
                );
                let body = DepositFailedReceipt { deposit_id };
                (
                    Envelope::failure(local, FailureKind::DepositFailed, body.encode()),
                    attached,
                    FailureKind::DepositFailed.name(),
                )
            }
        };

        self.reply(invocation, origin, returned, envelope, receipt).await
    }

    async fn execute_deposit(
        &self,
        invocation: &Invocation,
        request: DepositRequest,
        attached: U256,
    ) -> OrchestratorResult<U256> {
        let pool = active_pool(invocation, self.config.local_chain_id)?;
        if pool.pool_id != request.pool_id {
            return Err(OrchestratorError::InvalidInput(format!(
                "unknown pool id {}",
                hex::encode(request.pool_id)
            )));
        }

        let (assets, calldata) = canonical_assets(request.tokens, request.swap_calldata)?;
        if assets != pool.tokens {
            return Err(OrchestratorError::InvalidTokens(
                "requested tokens do not match the local pool".to_string(),
            ));
        }
        if attached.is_zero() {
            return Err(OrchestratorError::InvalidInput(
                "no quote currency attached".to_string(),
            ));
        }

        self.swap_into(&assets, attached, request.swap_provider, calldata)
            .await?;

        let shares = self
            .services
            .amm
            .join_pool(pool.pool_id, pool.tokens, request.min_output)
            .await?;
        if shares < request.min_output {
            return Err(OrchestratorError::SlippageExceeded {
                min_output: request.min_output,
                received: shares,
            });
        }

        Ok(shares)
    }

    /// Send a receipt back to `origin`; failing to send aborts the invocation
    async fn reply(
        &self,
        invocation: &mut Invocation,
        origin: ChainId,
        quote_amount: U256,
        envelope: Envelope,
        receipt: &'static str,
    ) -> OrchestratorResult<()> {
        let prepared = self
            .gateway
            .build_message(
                &invocation.state.registry,
                origin,
                self.config.receipt_gas_limit,
                quote_amount,
                &envelope,
            )
            .await?;
        let message_id = self.gateway.send(prepared).await?;

        invocation.emit(OrchestratorEvent::ReceiptSent {
            chain_id: origin,
            message_id,
            receipt: receipt.to_string(),
        });
        Ok(())
    }
}

//! Messaging gateway: builds, prices and dispatches outbound messages

use super::{Envelope, OutboundMessage, Relay, TokenAmount};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registry::{ChainId, ChainRegistry};

use ethers::types::{Address, H256, U256};
use std::sync::Arc;
use tracing::debug;

/// Message resolved against the registry and priced by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMessage {
    pub chain_id: ChainId,
    pub selector: u64,
    pub message: OutboundMessage,
    pub fee: U256,
}

/// Single outbound path for cross-chain messages
pub struct MessagingGateway {
    relay: Arc<dyn Relay>,
    /// Quote currency attached to value-carrying messages
    quote_token: Address,
}

impl MessagingGateway {
    pub fn new(relay: Arc<dyn Relay>, quote_token: Address) -> Self {
        Self { relay, quote_token }
    }

    pub fn quote_token(&self) -> Address {
        self.quote_token
    }

    /// Resolve the peer and selector for `chain_id`, attach `quote_amount` of
    /// quote currency when non-zero, and ask the relay for the delivery fee
    pub async fn build_message(
        &self,
        registry: &ChainRegistry,
        chain_id: ChainId,
        gas_limit: u64,
        quote_amount: U256,
        envelope: &Envelope,
    ) -> OrchestratorResult<PreparedMessage> {
        let receiver = registry
            .peer(chain_id)
            .ok_or(OrchestratorError::MissingPeer { chain_id })?;
        let selector = registry
            .selector(chain_id)
            .ok_or(OrchestratorError::MissingSelector { chain_id })?;

        let token_amounts = if quote_amount.is_zero() {
            Vec::new()
        } else {
            vec![TokenAmount {
                token: self.quote_token,
                amount: quote_amount,
            }]
        };

        let message = OutboundMessage {
            receiver,
            data: envelope.encode(),
            token_amounts,
            gas_limit,
        };

        let fee = self
            .relay
            .fee(selector, message.clone())
            .await
            .map_err(|e| messaging_error(chain_id, e))?;

        debug!(
            "Built message for chain {} (selector {}): fee {}",
            chain_id, selector, fee
        );

        Ok(PreparedMessage {
            chain_id,
            selector,
            message,
            fee,
        })
    }

    /// Dispatch a prepared message; returns the relay's correlation id
    pub async fn send(&self, prepared: PreparedMessage) -> OrchestratorResult<H256> {
        let chain_id = prepared.chain_id;
        let message_id = self
            .relay
            .send(prepared.selector, prepared.message, prepared.fee)
            .await
            .map_err(|e| messaging_error(chain_id, e))?;

        crate::metrics::record_message_sent(chain_id, prepared.fee);
        Ok(message_id)
    }
}

fn messaging_error(chain_id: ChainId, err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::Messaging { .. } => err,
        other => OrchestratorError::Messaging {
            chain_id,
            message: other.to_string(),
        },
    }
}

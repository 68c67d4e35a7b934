//! Cross-chain messaging
//!
//! This module provides:
//! - The ABI wire codec for request and receipt envelopes
//! - The gateway that resolves peers/selectors, prices and dispatches messages
//! - The relay abstraction and an in-process loopback relay

pub mod codec;
pub mod gateway;
pub mod loopback;

pub use codec::{Envelope, FailureKind, MessageKind, SuccessKind};
pub use gateway::{MessagingGateway, PreparedMessage};
pub use loopback::{LoopbackNetwork, LoopbackRelay};

use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};

/// Token transfer attached to a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Address,
    pub amount: U256,
}

/// Message handed to the relay for delivery to a peer orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub receiver: Address,
    /// Encoded [`Envelope`]
    pub data: Bytes,
    pub token_amounts: Vec<TokenAmount>,
    pub gas_limit: u64,
}

/// Message delivered by the relay to this orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: H256,
    /// Sender identity as authenticated by the relay
    pub sender: Address,
    /// Encoded [`Envelope`]
    pub data: Bytes,
    #[serde(default)]
    pub token_amounts: Vec<TokenAmount>,
}

impl InboundMessage {
    /// Total amount of `token` attached to this message
    pub fn attached(&self, token: Address) -> OrchestratorResult<U256> {
        self.token_amounts
            .iter()
            .filter(|t| t.token == token)
            .try_fold(U256::zero(), |acc, t| acc.checked_add(t.amount))
            .ok_or(OrchestratorError::AmountOverflow("attached token amount"))
    }
}

/// Cross-chain messaging infrastructure: fee oracle plus dispatch
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Relay: Send + Sync {
    /// Delivery fee in native currency for `message` to `selector`
    async fn fee(&self, selector: u64, message: OutboundMessage) -> OrchestratorResult<U256>;

    /// Dispatch `message`, paying `fee`; returns the correlation id
    async fn send(&self, selector: u64, message: OutboundMessage, fee: U256) -> OrchestratorResult<H256>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(amounts: Vec<(u64, U256)>) -> InboundMessage {
        InboundMessage {
            message_id: H256::zero(),
            sender: Address::from_low_u64_be(0xb002),
            data: Bytes::new(),
            token_amounts: amounts
                .into_iter()
                .map(|(token, amount)| TokenAmount {
                    token: Address::from_low_u64_be(token),
                    amount,
                })
                .collect(),
        }
    }

    #[test]
    fn test_attached_sums_matching_token() {
        let quote = Address::from_low_u64_be(0xc0);
        let message = delivery(vec![
            (0xc0, U256::from(40)),
            (0x11, U256::from(7)),
            (0xc0, U256::from(60)),
        ]);
        assert_eq!(message.attached(quote).unwrap(), U256::from(100));
    }

    #[test]
    fn test_attached_overflow_is_an_error() {
        let quote = Address::from_low_u64_be(0xc0);
        let message = delivery(vec![(0xc0, U256::MAX), (0xc0, U256::one())]);
        assert!(matches!(
            message.attached(quote),
            Err(OrchestratorError::AmountOverflow(_))
        ));
    }
}

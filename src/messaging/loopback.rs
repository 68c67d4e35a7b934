//! In-process relay connecting several orchestrators
//!
//! Messages are queued per destination selector and handed back to the caller
//! in any order, which makes arrival-order scenarios easy to drive.

use super::{InboundMessage, OutboundMessage, Relay};
use crate::error::OrchestratorResult;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{Address, H256, U256};
use sha3::{Digest, Keccak256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared mailboxes keyed by destination selector
pub struct LoopbackNetwork {
    mailboxes: DashMap<u64, VecDeque<InboundMessage>>,
    sequence: AtomicU64,
    fee: U256,
}

impl LoopbackNetwork {
    pub fn new(fee: U256) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            sequence: AtomicU64::new(0),
            fee,
        })
    }

    /// Relay endpoint whose messages are authenticated as `sender`
    pub fn endpoint(self: &Arc<Self>, sender: Address) -> LoopbackRelay {
        LoopbackRelay {
            network: self.clone(),
            sender,
        }
    }

    /// Take every message queued for `selector`, oldest first
    pub fn drain(&self, selector: u64) -> Vec<InboundMessage> {
        self.mailboxes
            .get_mut(&selector)
            .map(|mut queue| queue.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn pending(&self, selector: u64) -> usize {
        self.mailboxes.get(&selector).map(|q| q.len()).unwrap_or(0)
    }

    fn message_id(&self, selector: u64, message: &OutboundMessage) -> H256 {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        let mut hasher = Keccak256::new();
        hasher.update(seq.to_be_bytes());
        hasher.update(selector.to_be_bytes());
        hasher.update(message.receiver.as_bytes());
        hasher.update(message.data.to_vec());
        H256::from_slice(&hasher.finalize())
    }
}

/// One orchestrator's connection to a [`LoopbackNetwork`]
pub struct LoopbackRelay {
    network: Arc<LoopbackNetwork>,
    sender: Address,
}

#[async_trait]
impl Relay for LoopbackRelay {
    async fn fee(&self, _selector: u64, _message: OutboundMessage) -> OrchestratorResult<U256> {
        Ok(self.network.fee)
    }

    async fn send(&self, selector: u64, message: OutboundMessage, _fee: U256) -> OrchestratorResult<H256> {
        let message_id = self.network.message_id(selector, &message);

        debug!(
            "Loopback relay queued {} for selector {}",
            hex::encode(message_id),
            selector
        );

        self.network
            .mailboxes
            .entry(selector)
            .or_default()
            .push_back(InboundMessage {
                message_id,
                sender: self.sender,
                data: message.data,
                token_amounts: message.token_amounts,
            });

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Bytes;

    fn message(data: u8) -> OutboundMessage {
        OutboundMessage {
            receiver: Address::from_low_u64_be(2),
            data: Bytes::from(vec![data]),
            token_amounts: Vec::new(),
            gas_limit: 100_000,
        }
    }

    #[tokio::test]
    async fn test_messages_queue_per_selector_with_sender() {
        let network = LoopbackNetwork::new(U256::from(3));
        let relay = network.endpoint(Address::from_low_u64_be(1));

        assert_eq!(relay.fee(20, message(0)).await.unwrap(), U256::from(3));

        let first = relay.send(20, message(1), U256::from(3)).await.unwrap();
        let second = relay.send(20, message(2), U256::from(3)).await.unwrap();
        relay.send(30, message(3), U256::from(3)).await.unwrap();
        assert_ne!(first, second);

        assert_eq!(network.pending(20), 2);
        let delivered = network.drain(20);
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].message_id, first);
        assert_eq!(delivered[0].sender, Address::from_low_u64_be(1));
        assert_eq!(network.pending(20), 0);
        assert_eq!(network.pending(30), 1);
    }
}

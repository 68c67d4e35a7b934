//! Collaborators the orchestrator drives but does not implement
//!
//! The AMM and swap primitives, the quote-currency treasury used for refunds,
//! and the embedding system's post-create / post-deposit hooks.

use crate::error::OrchestratorResult;
use crate::registry::ChainId;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::info;

/// Pool returned by the AMM on creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedPool {
    pub address: Address,
    pub pool_id: H256,
}

/// AMM pool primitives on the local chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmmService: Send + Sync {
    async fn create_pool(
        &self,
        name: String,
        chain_label: String,
        tokens: Vec<Address>,
    ) -> OrchestratorResult<CreatedPool>;

    /// Join with the orchestrator's token balances; fails if fewer than
    /// `min_output` shares would be minted
    async fn join_pool(
        &self,
        pool_id: H256,
        tokens: Vec<Address>,
        min_output: U256,
    ) -> OrchestratorResult<U256>;
}

/// Swap primitive: sells `amount` of quote currency for `token_out`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapService: Send + Sync {
    async fn swap(
        &self,
        token_out: Address,
        amount: U256,
        provider: Address,
        calldata: Bytes,
    ) -> OrchestratorResult<U256>;
}

/// Quote-currency holdings used to refund fully failed deposits
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Treasury: Send + Sync {
    async fn refund(&self, depositor: Address, amount: U256) -> OrchestratorResult<()>;
}

/// Callbacks supplied by the embedding issuance logic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrchestratorHooks: Send + Sync {
    async fn on_pool_created(&self, chain_id: ChainId, tokens: Vec<Address>) -> OrchestratorResult<()>;

    async fn on_deposited(&self, depositor: Address, total_shares: U256) -> OrchestratorResult<()>;
}

/// Hooks that only log, for deployments without an issuance contract
pub struct LogHooks;

#[async_trait]
impl OrchestratorHooks for LogHooks {
    async fn on_pool_created(&self, chain_id: ChainId, tokens: Vec<Address>) -> OrchestratorResult<()> {
        info!("Pool active on chain {} with {} tokens", chain_id, tokens.len());
        Ok(())
    }

    async fn on_deposited(&self, depositor: Address, total_shares: U256) -> OrchestratorResult<()> {
        info!("Deposit complete for {:?}: {} shares", depositor, total_shares);
        Ok(())
    }
}

/// Everything the orchestrator calls out to
#[derive(Clone)]
pub struct Collaborators {
    pub amm: Arc<dyn AmmService>,
    pub swapper: Arc<dyn SwapService>,
    pub treasury: Arc<dyn Treasury>,
    pub hooks: Arc<dyn OrchestratorHooks>,
}

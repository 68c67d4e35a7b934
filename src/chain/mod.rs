//! Chain module - the local chain the orchestrator transacts on
//!
//! This module provides:
//! - Multi-RPC provider management with automatic failover
//! - Contract adapters for the AMM, swap router, relay router, treasury and issuance hooks
//! - Wiring of those adapters into the orchestrator's collaborators
//! - Health monitoring of the local chain connection

pub mod contracts;
pub mod provider;

pub use contracts::{Erc20Treasury, EvmAmm, EvmRelay, EvmSwapper, IssuanceHooks};
pub use provider::{ChainProvider, GasPrice};

use crate::config::Settings;
use crate::error::OrchestratorResult;
use crate::messaging::Relay;
use crate::registry::ChainId;
use crate::services::{Collaborators, LogHooks, OrchestratorHooks};
use crate::tx::TransactionSender;

use ethers::signers::LocalWallet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Connection to the local chain plus the wallet that signs for it
pub struct LocalChain {
    provider: Arc<ChainProvider>,
    sender: Arc<TransactionSender>,
}

impl LocalChain {
    pub fn connect(settings: &Settings, wallet: LocalWallet) -> OrchestratorResult<Self> {
        let chain_id = settings.orchestrator.local_chain_id;
        info!(
            "Initializing local chain {} (ID: {})",
            settings.local_chain.name, chain_id
        );

        let provider = Arc::new(ChainProvider::new(chain_id, settings.local_chain.clone())?);
        let sender = Arc::new(TransactionSender::new(
            provider.clone(),
            wallet,
            settings.orchestrator.clone(),
        ));

        Ok(Self { provider, sender })
    }

    pub fn chain_id(&self) -> ChainId {
        self.provider.chain_id()
    }

    pub fn provider(&self) -> &Arc<ChainProvider> {
        &self.provider
    }

    pub fn sender(&self) -> &Arc<TransactionSender> {
        &self.sender
    }

    /// Contract-backed collaborators; hooks only log without an issuance contract
    pub fn collaborators(&self, settings: &Settings) -> OrchestratorResult<Collaborators> {
        let local = &settings.local_chain;
        let orchestrator = &settings.orchestrator;
        let gas_cap = orchestrator.deposit_gas_limit;

        let hooks: Arc<dyn OrchestratorHooks> = match local.issuance_address {
            Some(address) => Arc::new(IssuanceHooks::new(address, self.sender.clone(), gas_cap)?),
            None => {
                warn!("No issuance contract configured, completion hooks only log");
                Arc::new(LogHooks)
            }
        };

        Ok(Collaborators {
            amm: Arc::new(EvmAmm::new(
                local.amm_address,
                self.sender.clone(),
                orchestrator.create_pool_gas_limit,
            )?),
            swapper: Arc::new(EvmSwapper::new(
                local.swap_router_address,
                orchestrator.quote_token,
                self.sender.clone(),
                gas_cap,
            )?),
            treasury: Arc::new(Erc20Treasury::new(
                orchestrator.quote_token,
                self.sender.clone(),
                gas_cap,
            )?),
            hooks,
        })
    }

    pub fn relay(&self, settings: &Settings) -> OrchestratorResult<Arc<dyn Relay>> {
        Ok(Arc::new(EvmRelay::new(
            settings.local_chain.relay_router_address,
            self.sender.clone(),
            settings.orchestrator.deposit_gas_limit,
        )?))
    }

    pub async fn health_check(&self) -> bool {
        let healthy = self.provider.health_check().await;
        crate::metrics::record_chain_health(self.chain_id(), healthy);
        healthy
    }

    /// Periodically check the connection and wallet balance until shutdown
    pub async fn monitor(&self, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.health_check().await {
                        if let Err(e) = self.sender.get_balance().await {
                            warn!("Failed to read wallet balance: {}", e);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Chain monitor stopped");
                    break;
                }
            }
        }
    }
}

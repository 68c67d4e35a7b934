//! Chain provider with multi-RPC support and automatic failover

use crate::config::{GasPriceStrategy, LocalChainConfig};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::registry::ChainId;

use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: ChainId,
    config: LocalChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    last_block: AtomicU64,
}

impl ChainProvider {
    pub fn new(chain_id: ChainId, config: LocalChainConfig) -> OrchestratorResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(OrchestratorError::ChainConnection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            last_block: AtomicU64::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.chain_id, next);
    }

    fn connection_error(&self, err: impl std::fmt::Display) -> OrchestratorError {
        OrchestratorError::ChainConnection {
            chain_id: self.chain_id,
            message: err.to_string(),
        }
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> OrchestratorResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => {
                    let block_num = block.as_u64();
                    self.last_block.store(block_num, Ordering::Relaxed);
                    return Ok(block_num);
                }
                Err(e) => {
                    warn!("Failed to get block number from chain {}: {}", self.chain_id, e);
                    self.failover();
                }
            }
        }

        Err(self.connection_error("All providers failed"))
    }

    pub fn last_block(&self) -> u64 {
        self.last_block.load(Ordering::Relaxed)
    }

    pub async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> OrchestratorResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Read-only call against the latest state, with failover
    pub async fn call(&self, tx: &TypedTransaction) -> OrchestratorResult<Bytes> {
        let mut last_error = None;

        for _ in 0..self.http_providers.len() {
            match self.http().call(tx, None).await {
                Ok(output) => return Ok(output),
                // A revert is an answer, not a transport failure
                Err(ProviderError::JsonRpcClientError(e)) if e.as_error_response().is_some() => {
                    return Err(OrchestratorError::Contract(e.to_string()));
                }
                Err(e) => {
                    warn!("eth_call failed on chain {}: {}", self.chain_id, e);
                    last_error = Some(e.to_string());
                    self.failover();
                }
            }
        }

        Err(self.connection_error(last_error.unwrap_or_else(|| "All providers failed".to_string())))
    }

    pub async fn estimate_gas(&self, tx: &TypedTransaction) -> OrchestratorResult<U256> {
        self.http()
            .estimate_gas(tx, None)
            .await
            .map_err(|e| OrchestratorError::Transaction(format!("gas estimation: {}", e)))
    }

    /// Next nonce for `address`, counting transactions still in the mempool
    pub async fn pending_nonce(&self, address: Address) -> OrchestratorResult<U256> {
        self.http()
            .get_transaction_count(address, Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| self.connection_error(e))
    }

    pub async fn get_balance(&self, address: Address) -> OrchestratorResult<U256> {
        self.http()
            .get_balance(address, None)
            .await
            .map_err(|e| self.connection_error(e))
    }

    /// Get current gas price based on chain strategy
    pub async fn get_gas_price(&self) -> OrchestratorResult<GasPrice> {
        match self.config.gas_price_strategy {
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                let price = self
                    .http()
                    .get_gas_price()
                    .await
                    .map_err(|e| OrchestratorError::Transaction(format!("gas price: {}", e)))?;
                Ok(GasPrice::Legacy(price))
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                let (max_fee, priority_fee) = self.estimate_eip1559_fees().await?;
                Ok(GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: priority_fee,
                })
            }
        }
    }

    async fn estimate_eip1559_fees(&self) -> OrchestratorResult<(U256, U256)> {
        let block = self
            .http()
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| self.connection_error(e))?
            .ok_or_else(|| OrchestratorError::Transaction("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| OrchestratorError::Transaction("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2_000_000_000u64); // 2 gwei

        // Max fee = 2 * base_fee + priority_fee
        let max_fee = base_fee * 2 + priority_fee;

        let max_gwei = U256::from(self.config.max_gas_price_gwei) * U256::from(1_000_000_000u64);
        let max_fee = std::cmp::min(max_fee, max_gwei);

        Ok((max_fee, std::cmp::min(priority_fee, max_fee)))
    }

    pub async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(block) => {
                crate::metrics::record_block_height(self.chain_id, block);
                true
            }
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.chain_id, e);
                false
            }
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

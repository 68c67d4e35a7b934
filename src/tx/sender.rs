//! Transaction sender with retry logic and receipt tracking

use super::gas::GasEstimator;
use crate::chain::{ChainProvider, GasPrice};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const DEFAULT_KEY_ENV: &str = "ORCHESTRATOR_PRIVATE_KEY";

/// Signs and submits local chain transactions one at a time
pub struct TransactionSender {
    provider: Arc<ChainProvider>,
    gas_estimator: GasEstimator,
    wallet: LocalWallet,
    config: OrchestratorConfig,
    /// Serializes nonce allocation and submission
    submit_lock: Mutex<()>,
}

impl TransactionSender {
    pub fn new(provider: Arc<ChainProvider>, wallet: LocalWallet, config: OrchestratorConfig) -> Self {
        let wallet = wallet.with_chain_id(provider.chain_id());
        info!("Transaction sender initialized with wallet: {:?}", wallet.address());

        Self {
            provider,
            gas_estimator: GasEstimator::new(),
            wallet,
            config,
            submit_lock: Mutex::new(()),
        }
    }

    /// Load the signing key from the environment variable named in config
    pub fn load_wallet(key_env: Option<&str>) -> OrchestratorResult<LocalWallet> {
        let var = key_env.unwrap_or(DEFAULT_KEY_ENV);
        let key = std::env::var(var)
            .map_err(|_| OrchestratorError::Wallet(format!("No wallet configured. Set {}", var)))?;

        key.trim()
            .parse::<LocalWallet>()
            .map_err(|e| OrchestratorError::Wallet(format!("Invalid private key: {}", e)))
    }

    pub fn wallet_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn provider(&self) -> &Arc<ChainProvider> {
        &self.provider
    }

    /// Simulate a call from the orchestrator wallet
    pub async fn call(&self, to: Address, data: Bytes, value: U256) -> OrchestratorResult<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(to)
            .data(data)
            .value(value)
            .into();
        self.provider.call(&tx).await
    }

    /// Submit a transaction and wait for a successful receipt
    pub async fn send(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        gas_cap: u64,
    ) -> OrchestratorResult<TransactionReceipt> {
        let chain_id = self.provider.chain_id();
        let _guard = self.submit_lock.lock().await;

        let probe: TypedTransaction = TransactionRequest::new()
            .from(self.wallet.address())
            .to(to)
            .data(data.clone())
            .value(value)
            .into();
        let estimate = self.provider.estimate_gas(&probe).await?;
        let gas_limit = self.gas_estimator.gas_limit(estimate, gas_cap);

        let started = Instant::now();
        let tx_hash = self.send_with_retry(to, data, value, gas_limit).await?;
        crate::metrics::record_tx_submitted(chain_id);

        let receipt = self.wait_for_receipt(tx_hash).await?;
        crate::metrics::record_tx_latency(chain_id, started.elapsed().as_secs_f64());

        if receipt.status != Some(U64::from(1)) {
            crate::metrics::record_tx_failed(chain_id);
            return Err(OrchestratorError::Contract(format!(
                "transaction {:?} reverted",
                tx_hash
            )));
        }

        debug!("Transaction {:?} mined in block {:?}", tx_hash, receipt.block_number);
        Ok(receipt)
    }

    fn build_tx(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        nonce: U256,
        gas_limit: U256,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(self.wallet.address())
                .to(to)
                .data(data)
                .value(value)
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price)
                .chain_id(self.provider.chain_id())
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(self.wallet.address())
                .to(to)
                .data(data)
                .value(value)
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(self.provider.chain_id())
                .into(),
        }
    }

    /// Send transaction with retry logic; each attempt re-reads the nonce
    async fn send_with_retry(
        &self,
        to: Address,
        data: Bytes,
        value: U256,
        gas_limit: U256,
    ) -> OrchestratorResult<H256> {
        let chain_id = self.provider.chain_id();
        let max_attempts = self.config.max_retries.max(1);
        let mut attempts = 0;
        let mut last_error = None;
        let mut price_factor = 100;

        while attempts < max_attempts {
            attempts += 1;

            let nonce = self.provider.pending_nonce(self.wallet.address()).await?;
            let gas_price = self.gas_estimator.get_gas_price(&self.provider).await?;
            let gas_price = self.gas_estimator.buffer_price(&gas_price, price_factor);
            debug!(
                "Submitting to {:?} with nonce {} (max cost {} wei)",
                to,
                nonce,
                GasEstimator::calculate_cost(gas_limit, &gas_price)
            );
            let tx = self.build_tx(to, data.clone(), value, nonce, gas_limit, &gas_price);

            let signed_tx = match self.wallet.sign_transaction(&tx).await {
                Ok(sig) => tx.rlp_signed(&sig),
                Err(e) => {
                    error!("Failed to sign transaction: {}", e);
                    return Err(OrchestratorError::Wallet(e.to_string()));
                }
            };

            let result = timeout(
                Duration::from_secs(30),
                self.provider.http().send_raw_transaction(signed_tx),
            )
            .await;

            match result {
                Ok(Ok(pending_tx)) => {
                    let tx_hash = pending_tx.tx_hash();
                    info!(
                        "Transaction sent: {:?} (attempt {}/{})",
                        tx_hash, attempts, max_attempts
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string();

                    if error_msg.contains("insufficient funds") {
                        crate::metrics::record_tx_failed(chain_id);
                        return Err(OrchestratorError::Transaction(error_msg));
                    } else if error_msg.contains("replacement transaction underpriced") {
                        warn!("Transaction underpriced, increasing gas");
                        price_factor += 25;
                    } else if error_msg.contains("nonce too low") {
                        warn!("Nonce too low, refreshing");
                    }

                    last_error = Some(OrchestratorError::Transaction(error_msg));
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempts);
                    last_error = Some(OrchestratorError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < max_attempts {
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        crate::metrics::record_tx_failed(chain_id);
        Err(last_error.unwrap_or_else(|| OrchestratorError::Transaction("Unknown error".to_string())))
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> OrchestratorResult<TransactionReceipt> {
        let deadline = Duration::from_secs(self.config.tx_timeout_secs);

        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(receipt),
                    Ok(None) => {}
                    Err(e) if e.is_retryable() => {
                        warn!("Receipt lookup for {:?} failed: {}", tx_hash, e);
                        self.provider.failover();
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        };

        timeout(deadline, poll)
            .await
            .map_err(|_| OrchestratorError::Timeout {
                operation: format!("receipt for {:?}", tx_hash),
            })?
    }

    /// Wallet balance on the local chain
    pub async fn get_balance(&self) -> OrchestratorResult<U256> {
        let balance = self.provider.get_balance(self.wallet.address()).await?;
        crate::metrics::record_wallet_balance(self.provider.chain_id(), balance);
        Ok(balance)
    }
}

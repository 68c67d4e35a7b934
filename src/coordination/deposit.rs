//! Deposit orchestration: fan-out requests, fan-in aggregation
//!
//! Each (deposit, chain) leg moves NOT_DEPOSITED -> PENDING -> DEPOSITED or
//! FAILED. Local legs skip PENDING. Whenever a leg resolves, every known
//! ledger's record is rescanned and the deposit is settled at most once:
//! completed when all legs deposited, refunded when all failed, flagged when
//! the outcomes are final but mixed.

use super::book::{DepositId, DepositRecord, DepositStatus, DepositVerdict};
use super::engine::{Invocation, Orchestrator};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::messaging::codec::{DepositFailedReceipt, DepositRequest, DepositedReceipt};
use crate::messaging::{Envelope, MessageKind};
use crate::registry::{ChainId, PoolRecord, PoolStatus};
use crate::tokens::{canonical_assets, split_amount};

use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// One deposit request on one ledger
#[derive(Debug, Clone, Deserialize)]
pub struct DepositParams {
    pub deposit_id: DepositId,
    pub chain_id: ChainId,
    pub depositor: Address,
    pub assets: Vec<Address>,
    pub swap_provider: Address,
    /// One entry per asset, in the same order as `assets`
    pub swap_calldata: Vec<Bytes>,
    pub min_output: U256,
    /// Quote currency committed to this ledger
    pub amount: U256,
}

/// One ledger's share of a fan-out deposit
#[derive(Debug, Clone, Deserialize)]
pub struct DepositLeg {
    pub chain_id: ChainId,
    pub assets: Vec<Address>,
    pub swap_provider: Address,
    pub swap_calldata: Vec<Bytes>,
    pub min_output: U256,
    pub amount: U256,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DepositOutcome {
    /// Joined the local pool
    Deposited {
        chain_id: ChainId,
        shares: U256,
        /// This leg settled the whole deposit as completed
        completed: bool,
    },
    /// DEPOSIT message sent; the leg is PENDING
    Requested {
        chain_id: ChainId,
        message_id: H256,
        fee: U256,
    },
}

impl Orchestrator {
    pub(super) async fn deposit_in(
        &self,
        invocation: &mut Invocation,
        params: DepositParams,
    ) -> OrchestratorResult<DepositOutcome> {
        let chain_id = params.chain_id;
        let deposit_id = params.deposit_id;

        let pool = active_pool(invocation, chain_id)?;
        let (assets, calldata) = canonical_assets(params.assets, params.swap_calldata)?;
        if assets != pool.tokens {
            return Err(OrchestratorError::InvalidTokens(format!(
                "assets do not match the pool tokens on chain {}",
                chain_id
            )));
        }
        if params.amount.is_zero() {
            return Err(OrchestratorError::InvalidInput("deposit amount is zero".to_string()));
        }
        invocation.state.deposits.ensure_untouched(deposit_id, chain_id)?;

        if invocation.state.registry.is_local(chain_id) {
            self.swap_into(&assets, params.amount, params.swap_provider, calldata)
                .await?;
            let (shares, completed) = self
                .join_local(
                    invocation,
                    deposit_id,
                    params.depositor,
                    params.amount,
                    params.min_output,
                )
                .await?;

            return Ok(DepositOutcome::Deposited {
                chain_id,
                shares,
                completed,
            });
        }

        invocation.state.deposits.open(
            deposit_id,
            chain_id,
            DepositRecord {
                status: DepositStatus::Pending,
                depositor: params.depositor,
                received_shares: U256::zero(),
                quote_amount: params.amount,
            },
        )?;

        let envelope = Envelope::request(
            MessageKind::Deposit,
            self.config.local_chain_id,
            DepositRequest {
                deposit_id,
                tokens: assets,
                pool_id: pool.pool_id,
                min_output: params.min_output,
                swap_provider: params.swap_provider,
                swap_calldata: calldata,
            },
        );
        let prepared = self
            .gateway
            .build_message(
                &invocation.state.registry,
                chain_id,
                self.config.deposit_gas_limit,
                params.amount,
                &envelope,
            )
            .await?;
        let fee = prepared.fee;
        let message_id = self.gateway.send(prepared).await?;

        info!(
            "Deposit {} requested on chain {}: {} quote (message {})",
            hex::encode(deposit_id),
            chain_id,
            params.amount,
            hex::encode(message_id)
        );
        invocation.emit(OrchestratorEvent::DepositRequested {
            deposit_id,
            chain_id,
            message_id,
            amount: params.amount,
            fee,
        });

        Ok(DepositOutcome::Requested {
            chain_id,
            message_id,
            fee,
        })
    }

    pub(super) async fn fan_out(
        &self,
        invocation: &mut Invocation,
        deposit_id: DepositId,
        depositor: Address,
        legs: Vec<DepositLeg>,
    ) -> OrchestratorResult<Vec<DepositOutcome>> {
        if legs.is_empty() {
            return Err(OrchestratorError::InvalidInput("no deposit legs".to_string()));
        }

        let mut outcomes = Vec::with_capacity(legs.len());
        for leg in legs {
            let params = DepositParams {
                deposit_id,
                chain_id: leg.chain_id,
                depositor,
                assets: leg.assets,
                swap_provider: leg.swap_provider,
                swap_calldata: leg.swap_calldata,
                min_output: leg.min_output,
                amount: leg.amount,
            };
            outcomes.push(self.deposit_in(invocation, params).await?);
        }

        Ok(outcomes)
    }

    pub(super) async fn join_swapped(
        &self,
        invocation: &mut Invocation,
        deposit_id: DepositId,
        depositor: Address,
        quote_amount: U256,
        min_output: U256,
    ) -> OrchestratorResult<DepositOutcome> {
        let local = self.config.local_chain_id;
        active_pool(invocation, local)?;
        invocation.state.deposits.ensure_untouched(deposit_id, local)?;

        let (shares, completed) = self
            .join_local(invocation, deposit_id, depositor, quote_amount, min_output)
            .await?;

        Ok(DepositOutcome::Deposited {
            chain_id: local,
            shares,
            completed,
        })
    }

    /// Sell `amount` of quote currency for each asset; `calldata[i]` drives asset `i`
    pub(super) async fn swap_into(
        &self,
        assets: &[Address],
        amount: U256,
        provider: Address,
        calldata: Vec<Bytes>,
    ) -> OrchestratorResult<()> {
        let parts = split_amount(amount, assets.len());

        for ((asset, part), data) in assets.iter().zip(parts).zip(calldata) {
            let received = self.services.swapper.swap(*asset, part, provider, data).await?;
            debug!("Swapped {} quote into {} of {:?}", part, received, asset);
        }

        Ok(())
    }

    /// Join the local pool with the orchestrator's balances and record the leg
    async fn join_local(
        &self,
        invocation: &mut Invocation,
        deposit_id: DepositId,
        depositor: Address,
        quote_amount: U256,
        min_output: U256,
    ) -> OrchestratorResult<(U256, bool)> {
        let local = self.config.local_chain_id;
        let pool = active_pool(invocation, local)?;

        let shares = self
            .services
            .amm
            .join_pool(pool.pool_id, pool.tokens, min_output)
            .await?;
        if shares < min_output {
            return Err(OrchestratorError::SlippageExceeded {
                min_output,
                received: shares,
            });
        }

        invocation.state.deposits.open(
            deposit_id,
            local,
            DepositRecord {
                status: DepositStatus::Deposited,
                depositor,
                received_shares: shares,
                quote_amount,
            },
        )?;
        invocation.emit(OrchestratorEvent::Deposited {
            deposit_id,
            chain_id: local,
            shares,
        });

        let completed = self.aggregate(invocation, deposit_id, depositor).await?;
        Ok((shares, completed))
    }

    pub(super) async fn on_deposited_receipt(
        &self,
        invocation: &mut Invocation,
        chain_id: ChainId,
        receipt: DepositedReceipt,
    ) -> OrchestratorResult<()> {
        let deposit_id = receipt.deposit_id;
        let depositor = invocation.state.deposits.resolve(
            deposit_id,
            chain_id,
            DepositStatus::Deposited,
            receipt.received_shares,
        )?;

        invocation.emit(OrchestratorEvent::Deposited {
            deposit_id,
            chain_id,
            shares: receipt.received_shares,
        });

        self.aggregate(invocation, deposit_id, depositor).await?;
        Ok(())
    }

    pub(super) async fn on_deposit_failed_receipt(
        &self,
        invocation: &mut Invocation,
        chain_id: ChainId,
        receipt: DepositFailedReceipt,
    ) -> OrchestratorResult<()> {
        let deposit_id = receipt.deposit_id;
        let depositor = invocation.state.deposits.resolve(
            deposit_id,
            chain_id,
            DepositStatus::Failed,
            U256::zero(),
        )?;

        warn!("Deposit {} failed on chain {}", hex::encode(deposit_id), chain_id);
        invocation.emit(OrchestratorEvent::DepositFailed { deposit_id, chain_id });

        self.aggregate(invocation, deposit_id, depositor).await?;
        Ok(())
    }

    /// Settle the deposit if every known ledger has a final outcome.
    /// Returns true when this call completed the deposit.
    async fn aggregate(
        &self,
        invocation: &mut Invocation,
        deposit_id: DepositId,
        depositor: Address,
    ) -> OrchestratorResult<bool> {
        if invocation.state.deposits.verdict(deposit_id).is_some() {
            return Ok(false);
        }

        let aggregate = invocation
            .state
            .deposits
            .aggregate(deposit_id, invocation.state.registry.known_ledgers())?;

        if aggregate.all_deposited() {
            self.services
                .hooks
                .on_deposited(depositor, aggregate.total_shares)
                .await?;

            invocation.state.deposits.settle(
                deposit_id,
                DepositVerdict::Completed {
                    total_shares: aggregate.total_shares,
                },
            );
            info!(
                "Deposit {} completed: {} shares across {} ledgers",
                hex::encode(deposit_id),
                aggregate.total_shares,
                aggregate.deposited.len()
            );
            invocation.emit(OrchestratorEvent::DepositCompleted {
                deposit_id,
                depositor,
                total_shares: aggregate.total_shares,
            });
            return Ok(true);
        }

        if aggregate.all_failed() {
            self.services
                .treasury
                .refund(depositor, aggregate.total_quote)
                .await?;

            invocation.state.deposits.settle(
                deposit_id,
                DepositVerdict::Refunded {
                    amount: aggregate.total_quote,
                },
            );
            warn!(
                "Deposit {} failed everywhere, refunded {} to {:?}",
                hex::encode(deposit_id),
                aggregate.total_quote,
                depositor
            );
            invocation.emit(OrchestratorEvent::DepositRefunded {
                deposit_id,
                depositor,
                amount: aggregate.total_quote,
            });
            return Ok(false);
        }

        if aggregate.partially_failed() {
            invocation
                .state
                .deposits
                .settle(deposit_id, DepositVerdict::PartiallyFailed);
            warn!(
                "Deposit {} partially failed: deposited on {:?}, failed on {:?}",
                hex::encode(deposit_id),
                aggregate.deposited,
                aggregate.failed
            );
            invocation.emit(OrchestratorEvent::DepositPartiallyFailed {
                deposit_id,
                deposited_chains: aggregate.deposited,
                failed_chains: aggregate.failed,
            });
        }

        Ok(false)
    }
}

/// Pool record of a known ledger whose pool is ACTIVE
pub(super) fn active_pool(invocation: &Invocation, chain_id: ChainId) -> OrchestratorResult<PoolRecord> {
    let registry = &invocation.state.registry;
    if !registry.is_known(chain_id) {
        return Err(OrchestratorError::UnknownLedger { chain_id });
    }

    let pool = registry.pool_record(chain_id);
    if pool.status != PoolStatus::Active {
        return Err(OrchestratorError::PoolNotActive {
            chain_id,
            status: pool.status,
        });
    }
    Ok(pool)
}

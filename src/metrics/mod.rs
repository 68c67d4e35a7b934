//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Cross-chain messages sent, received and rejected
//! - Pool lifecycle and deposit settlement
//! - Reverted operations by error category
//! - Local chain transactions and connection status

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::registry::{ChainId, PoolStatus};

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Messaging metrics
    pub static ref MESSAGES_SENT: CounterVec = register_counter_vec!(
        "orchestrator_messages_sent_total",
        "Total cross-chain messages sent per destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref MESSAGING_FEES: CounterVec = register_counter_vec!(
        "orchestrator_messaging_fees_wei_total",
        "Total messaging fees paid per destination chain",
        &["chain_id"]
    ).unwrap();

    pub static ref MESSAGES_RECEIVED: CounterVec = register_counter_vec!(
        "orchestrator_messages_received_total",
        "Total authenticated messages received by kind",
        &["chain_id", "kind"]
    ).unwrap();

    pub static ref MESSAGES_REJECTED: CounterVec = register_counter_vec!(
        "orchestrator_messages_rejected_total",
        "Total inbound messages rejected",
        &["chain_id", "reason"]
    ).unwrap();

    // Lifecycle metrics
    pub static ref EVENTS_COMMITTED: CounterVec = register_counter_vec!(
        "orchestrator_events_total",
        "Total committed orchestrator events by type",
        &["event_type"]
    ).unwrap();

    pub static ref POOL_STATUS: GaugeVec = register_gauge_vec!(
        "orchestrator_pool_status",
        "Pool status per chain (0=not created, 1=creating, 2=active)",
        &["chain_id"]
    ).unwrap();

    pub static ref PENDING_DEPOSITS: Gauge = register_gauge!(
        "orchestrator_pending_deposits",
        "Deposit legs awaiting a receipt"
    ).unwrap();

    pub static ref OPERATIONS_REVERTED: CounterVec = register_counter_vec!(
        "orchestrator_operations_reverted_total",
        "Total operations reverted by error category",
        &["operation", "category"]
    ).unwrap();

    // Local chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "orchestrator_chain_connected",
        "Local chain connection status (1=connected, 0=disconnected)",
        &["chain_id"]
    ).unwrap();

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "orchestrator_chain_block_height",
        "Current block height of the local chain",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "orchestrator_transactions_submitted_total",
        "Total transactions submitted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "orchestrator_transactions_failed_total",
        "Total transactions failed or reverted",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "orchestrator_transaction_latency_seconds",
        "Time from submission to receipt",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "orchestrator_wallet_balance_eth",
        "Wallet balance in ETH",
        &["chain_id"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> OrchestratorResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OrchestratorError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// Helper functions to record metrics

pub fn record_message_sent(chain_id: ChainId, fee: U256) {
    let chain = chain_id.to_string();
    MESSAGES_SENT.with_label_values(&[&chain]).inc();
    MESSAGING_FEES
        .with_label_values(&[&chain])
        .inc_by(u256_to_f64(fee));
}

pub fn record_message_received(chain_id: ChainId, kind: &str) {
    MESSAGES_RECEIVED
        .with_label_values(&[&chain_id.to_string(), kind])
        .inc();
}

pub fn record_message_rejected(chain_id: ChainId, reason: &str) {
    MESSAGES_REJECTED
        .with_label_values(&[&chain_id.to_string(), reason])
        .inc();
}

pub fn record_event(event: &OrchestratorEvent) {
    EVENTS_COMMITTED.with_label_values(&[event.name()]).inc();

    match event {
        OrchestratorEvent::PoolCreated { chain_id, .. } => {
            record_pool_status(*chain_id, PoolStatus::Active)
        }
        OrchestratorEvent::PoolCreationRequested { chain_id, .. } => {
            record_pool_status(*chain_id, PoolStatus::Creating)
        }
        _ => {}
    }
}

pub fn record_pool_status(chain_id: ChainId, status: PoolStatus) {
    let value = match status {
        PoolStatus::NotCreated => 0.0,
        PoolStatus::Creating => 1.0,
        PoolStatus::Active => 2.0,
    };
    POOL_STATUS
        .with_label_values(&[&chain_id.to_string()])
        .set(value);
}

pub fn set_pending_deposits(pending: u64) {
    PENDING_DEPOSITS.set(pending as f64);
}

pub fn record_reverted(operation: &str, category: &str) {
    OPERATIONS_REVERTED
        .with_label_values(&[operation, category])
        .inc();
}

pub fn record_chain_health(chain_id: ChainId, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[&chain_id.to_string()])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(chain_id: ChainId, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[&chain_id.to_string()])
        .set(block_number as f64);
}

pub fn record_tx_submitted(chain_id: ChainId) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_failed(chain_id: ChainId) {
    TX_FAILED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_latency(chain_id: ChainId, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}

pub fn record_wallet_balance(chain_id: ChainId, balance: U256) {
    WALLET_BALANCE
        .with_label_values(&[&chain_id.to_string()])
        .set(u256_to_f64(balance) / 1e18);
}

/// Lossy conversion for gauges; precision beyond f64 is irrelevant here
fn u256_to_f64(value: U256) -> f64 {
    value
        .to_string()
        .parse::<f64>()
        .unwrap_or(f64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{Address, H256};

    #[test]
    fn test_fee_conversion() {
        assert_eq!(u256_to_f64(U256::zero()), 0.0);
        assert_eq!(u256_to_f64(U256::exp10(18)), 1e18);
    }

    #[test]
    fn test_record_event_tracks_pool_status() {
        record_event(&OrchestratorEvent::PoolCreationRequested {
            chain_id: 4242,
            message_id: H256::zero(),
            fee: U256::from(1),
        });
        assert_eq!(POOL_STATUS.with_label_values(&["4242"]).get(), 1.0);

        record_event(&OrchestratorEvent::PoolCreated {
            chain_id: 4242,
            address: Address::from_low_u64_be(1),
            pool_id: H256::zero(),
            tokens: vec![],
        });
        assert_eq!(POOL_STATUS.with_label_values(&["4242"]).get(), 2.0);
    }
}

//! PostgreSQL state manager

use super::{Changeset, StateStore};
use crate::config::DatabaseConfig;
use crate::coordination::{DepositRecord, DepositStatus, DepositVerdict, OrchestratorState};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::OrchestratorEvent;
use crate::registry::{ChainId, PoolRecord, PoolStatus};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

/// State manager for PostgreSQL persistence
pub struct StateManager {
    pool: PgPool,
}

impl StateManager {
    /// Create a new state manager
    pub async fn new(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(OrchestratorError::Database)?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> OrchestratorResult<()> {
        // In production, use sqlx::migrate!
        // For now, create tables inline

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peers (
                chain_id BIGINT PRIMARY KEY,
                peer VARCHAR(42) NOT NULL,
                registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Selectors span the full u64 range, which BIGINT cannot hold
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS selectors (
                chain_id BIGINT PRIMARY KEY,
                selector VARCHAR(20) NOT NULL,
                registered_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS known_ledgers (
                chain_id BIGINT PRIMARY KEY,
                position BIGSERIAL,
                added_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pool_records (
                chain_id BIGINT PRIMARY KEY,
                address VARCHAR(42) NOT NULL,
                pool_id BYTEA NOT NULL,
                tokens JSONB NOT NULL,
                status VARCHAR(20) NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deposit_records (
                deposit_id BYTEA NOT NULL,
                chain_id BIGINT NOT NULL,
                status VARCHAR(20) NOT NULL,
                depositor VARCHAR(42) NOT NULL,
                received_shares VARCHAR(78) NOT NULL,
                quote_amount VARCHAR(78) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (deposit_id, chain_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_deposit_records_status
            ON deposit_records (status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deposit_verdicts (
                deposit_id BYTEA PRIMARY KEY,
                verdict JSONB NOT NULL,
                settled_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orchestrator_events (
                id BIGSERIAL PRIMARY KEY,
                chain_id BIGINT,
                deposit_id BYTEA,
                event_type VARCHAR(50) NOT NULL,
                event_data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_events_deposit
            ON orchestrator_events (deposit_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(OrchestratorError::Database)?;
        Ok(())
    }

    async fn store_event(
        tx: &mut Transaction<'_, Postgres>,
        event: &OrchestratorEvent,
    ) -> OrchestratorResult<()> {
        let event_data = serde_json::to_value(event)
            .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO orchestrator_events (chain_id, deposit_id, event_type, event_data)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.chain_id().map(|c| c as i64))
        .bind(event.deposit_id().map(|d| d.as_bytes().to_vec()))
        .bind(event.name())
        .bind(event_data)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn load_registry(&self, state: &mut OrchestratorState) -> OrchestratorResult<()> {
        let rows = sqlx::query("SELECT chain_id FROM known_ledgers ORDER BY position")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            state.registry.add_known(row.get::<i64, _>("chain_id") as ChainId);
        }

        let rows = sqlx::query("SELECT chain_id, peer FROM peers")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let peer = parse_address(&row.get::<String, _>("peer"))?;
            state
                .registry
                .restore_peer(row.get::<i64, _>("chain_id") as ChainId, peer);
        }

        let rows = sqlx::query("SELECT chain_id, selector FROM selectors")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let raw: String = row.get("selector");
            let selector = raw
                .parse::<u64>()
                .map_err(|e| corrupt("selector", e))?;
            state
                .registry
                .restore_selector(row.get::<i64, _>("chain_id") as ChainId, selector);
        }

        let rows = sqlx::query("SELECT chain_id, address, pool_id, tokens, status FROM pool_records")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let chain_id = row.get::<i64, _>("chain_id") as ChainId;
            state.registry.set_pool_record(chain_id, pool_from_row(&row)?);
        }

        Ok(())
    }

    async fn load_deposits(&self, state: &mut OrchestratorState) -> OrchestratorResult<()> {
        let rows = sqlx::query(
            r#"
            SELECT deposit_id, chain_id, status, depositor, received_shares, quote_amount
            FROM deposit_records
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let deposit_id = parse_h256(&row.get::<Vec<u8>, _>("deposit_id"))?;
            let chain_id = row.get::<i64, _>("chain_id") as ChainId;
            state
                .deposits
                .restore_record(deposit_id, chain_id, deposit_from_row(&row)?);
        }

        let rows = sqlx::query("SELECT deposit_id, verdict FROM deposit_verdicts")
            .fetch_all(&self.pool)
            .await?;

        for row in rows {
            let deposit_id = parse_h256(&row.get::<Vec<u8>, _>("deposit_id"))?;
            let verdict: DepositVerdict = serde_json::from_value(row.get("verdict"))
                .map_err(|e| corrupt("verdict", e))?;
            state.deposits.restore_verdict(deposit_id, verdict);
        }

        Ok(())
    }
}

#[async_trait]
impl StateStore for StateManager {
    async fn persist(&self, changes: &Changeset) -> OrchestratorResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        // One timestamp for every row the invocation touched
        let now: DateTime<Utc> = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (chain_id, peer) in &changes.peers {
            sqlx::query(
                r#"
                INSERT INTO peers (chain_id, peer)
                VALUES ($1, $2)
                ON CONFLICT (chain_id) DO UPDATE SET peer = $2
                "#,
            )
            .bind(*chain_id as i64)
            .bind(format!("{:?}", peer))
            .execute(&mut *tx)
            .await?;
        }

        for (chain_id, selector) in &changes.selectors {
            sqlx::query(
                r#"
                INSERT INTO selectors (chain_id, selector)
                VALUES ($1, $2)
                ON CONFLICT (chain_id) DO UPDATE SET selector = $2
                "#,
            )
            .bind(*chain_id as i64)
            .bind(selector.to_string())
            .execute(&mut *tx)
            .await?;
        }

        for chain_id in &changes.known_ledgers {
            sqlx::query("INSERT INTO known_ledgers (chain_id) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(*chain_id as i64)
                .execute(&mut *tx)
                .await?;
        }

        for (chain_id, record) in &changes.pools {
            let tokens = serde_json::to_value(&record.tokens)
                .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

            sqlx::query(
                r#"
                INSERT INTO pool_records (chain_id, address, pool_id, tokens, status, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (chain_id)
                DO UPDATE SET address = $2, pool_id = $3, tokens = $4, status = $5, updated_at = $6
                "#,
            )
            .bind(*chain_id as i64)
            .bind(format!("{:?}", record.address))
            .bind(record.pool_id.as_bytes().to_vec())
            .bind(tokens)
            .bind(record.status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (deposit_id, chain_id, record) in &changes.deposits {
            sqlx::query(
                r#"
                INSERT INTO deposit_records
                    (deposit_id, chain_id, status, depositor, received_shares, quote_amount, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                ON CONFLICT (deposit_id, chain_id)
                DO UPDATE SET status = $3, received_shares = $5, updated_at = $7
                "#,
            )
            .bind(deposit_id.as_bytes().to_vec())
            .bind(*chain_id as i64)
            .bind(record.status.as_str())
            .bind(format!("{:?}", record.depositor))
            .bind(record.received_shares.to_string())
            .bind(record.quote_amount.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for (deposit_id, verdict) in &changes.verdicts {
            let verdict = serde_json::to_value(verdict)
                .map_err(|e| OrchestratorError::Internal(e.to_string()))?;

            sqlx::query(
                "INSERT INTO deposit_verdicts (deposit_id, verdict, settled_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(deposit_id.as_bytes().to_vec())
            .bind(verdict)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for event in &changes.events {
            Self::store_event(&mut tx, event).await?;
        }

        tx.commit().await?;

        debug!(
            "Persisted changeset: {} pools, {} deposits, {} events",
            changes.pools.len(),
            changes.deposits.len(),
            changes.events.len()
        );
        Ok(())
    }

    async fn load(&self, local_chain_id: ChainId) -> OrchestratorResult<OrchestratorState> {
        let mut state = OrchestratorState::new(local_chain_id);
        self.load_registry(&mut state).await?;
        self.load_deposits(&mut state).await?;

        info!(
            "Restored state: {} known ledgers, {} pending deposit legs",
            state.registry.known_ledgers().len(),
            state.deposits.counts().pending
        );
        Ok(state)
    }
}

fn corrupt(what: &str, err: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Internal(format!("corrupt {} row: {}", what, err))
}

fn parse_address(raw: &str) -> OrchestratorResult<Address> {
    raw.parse::<Address>().map_err(|e| corrupt("address", e))
}

fn parse_h256(raw: &[u8]) -> OrchestratorResult<H256> {
    if raw.len() != 32 {
        return Err(corrupt("bytes32", format!("{} bytes", raw.len())));
    }
    Ok(H256::from_slice(raw))
}

fn parse_u256(raw: &str) -> OrchestratorResult<U256> {
    U256::from_dec_str(raw).map_err(|e| corrupt("uint256", e))
}

fn pool_from_row(row: &PgRow) -> OrchestratorResult<PoolRecord> {
    let status: String = row.get("status");
    let tokens: Vec<Address> =
        serde_json::from_value(row.get("tokens")).map_err(|e| corrupt("pool tokens", e))?;

    Ok(PoolRecord {
        address: parse_address(&row.get::<String, _>("address"))?,
        tokens,
        pool_id: parse_h256(&row.get::<Vec<u8>, _>("pool_id"))?,
        status: PoolStatus::parse(&status).ok_or_else(|| corrupt("pool status", status))?,
    })
}

fn deposit_from_row(row: &PgRow) -> OrchestratorResult<DepositRecord> {
    let status: String = row.get("status");

    Ok(DepositRecord {
        status: DepositStatus::parse(&status).ok_or_else(|| corrupt("deposit status", status))?,
        depositor: parse_address(&row.get::<String, _>("depositor"))?,
        received_shares: parse_u256(&row.get::<String, _>("received_shares"))?,
        quote_amount: parse_u256(&row.get::<String, _>("quote_amount"))?,
    })
}

//! Coordination engine for cross-ledger pool orchestration
//!
//! The orchestrator:
//! 1. Creates the pool on every ledger, locally or by CREATE_POOL request
//! 2. Fans deposits out to every known ledger
//! 3. Authenticates and routes receipts from peer orchestrators
//! 4. Aggregates per-ledger outcomes and settles each deposit once
//! 5. Serves CREATE_POOL and DEPOSIT requests from its peers

mod book;
mod deposit;
mod dispatcher;
mod engine;
mod pool;


pub use book::{
    Aggregate, DepositBook, DepositCounts, DepositId, DepositRecord, DepositStatus, DepositVerdict,
};
pub use deposit::{DepositLeg, DepositOutcome, DepositParams};
pub use engine::{DepositProgress, DepositSummary, LedgerDeposit, Orchestrator, OrchestratorState};
pub use pool::PoolCreation;

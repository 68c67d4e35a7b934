//! Cross-chain liquidity pool lifecycle and deposit orchestration
//!
//! One orchestrator runs per ledger. It creates the same token pool on every
//! ledger it knows, fans deposits out to them over an authenticated messaging
//! relay, and settles each deposit once every ledger has answered.

pub mod api;
pub mod chain;
pub mod config;
pub mod coordination;
pub mod error;
pub mod events;
pub mod messaging;
pub mod metrics;
pub mod registry;
pub mod services;
pub mod state;
pub mod tokens;
pub mod tx;

pub use coordination::Orchestrator;
pub use error::{OrchestratorError, OrchestratorResult};

//! Error types for the pool orchestrator

use crate::registry::{ChainId, PoolStatus};

use ethers::types::{Address, U256};
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Caller {caller:?} lacks the admin capability")]
    Unauthorized { caller: Address },

    #[error("Missing or invalid {header} credential")]
    InvalidCredential { header: &'static str },

    #[error("Chain {chain_id} is the local chain and cannot have a peer")]
    LocalPeer { chain_id: ChainId },

    #[error("Invalid peer address for chain {chain_id}")]
    InvalidPeer { chain_id: ChainId },

    #[error("Peer already registered for chain {chain_id}: {peer:?}")]
    PeerAlreadyRegistered { chain_id: ChainId, peer: Address },

    #[error("Invalid messaging selector for chain {chain_id}")]
    InvalidSelector { chain_id: ChainId },

    #[error("Selector already registered for chain {chain_id}: {selector}")]
    SelectorAlreadyRegistered { chain_id: ChainId, selector: u64 },

    #[error("Chain {chain_id} is not a known ledger")]
    UnknownLedger { chain_id: ChainId },

    #[error("Pool on chain {chain_id} is {status:?}, expected Active")]
    PoolNotActive { chain_id: ChainId, status: PoolStatus },

    #[error("Pool already created on chain {chain_id} at {address:?}")]
    PoolAlreadyCreated { chain_id: ChainId, address: Address },

    #[error("No peer registered for chain {chain_id}")]
    MissingPeer { chain_id: ChainId },

    #[error("No messaging selector registered for chain {chain_id}")]
    MissingSelector { chain_id: ChainId },

    #[error("Invalid token list: {0}")]
    InvalidTokens(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0} overflows uint256")]
    AmountOverflow(&'static str),

    #[error("Message from {actual:?} claims chain {chain_id} whose peer is {expected:?}")]
    SenderMismatch {
        chain_id: ChainId,
        expected: Option<Address>,
        actual: Address,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Slippage exceeded: received {received} shares, minimum {min_output}")]
    SlippageExceeded { min_output: U256, received: U256 },

    #[error("Message decoding error: {0}")]
    Decode(String),

    #[error("{service} call failed: {message}")]
    External {
        service: &'static str,
        message: String,
    },

    #[error("Messaging error for chain {chain_id}: {message}")]
    Messaging { chain_id: ChainId, message: String },

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: ChainId, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Contract error: {0}")]
    Contract(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification used by the API layer and for alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad input or state; the caller must resubmit with corrected input
    Precondition,
    /// Inbound message failed sender authentication
    Authentication,
    /// A collaborator, the relay or the chain failed
    External,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Precondition => "precondition",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::External => "external",
            ErrorCategory::Internal => "internal",
        }
    }
}

impl OrchestratorError {
    pub fn category(&self) -> ErrorCategory {
        use OrchestratorError::*;
        match self {
            Unauthorized { .. } | InvalidCredential { .. } | SenderMismatch { .. } => {
                ErrorCategory::Authentication
            }
            LocalPeer { .. }
            | InvalidPeer { .. }
            | PeerAlreadyRegistered { .. }
            | InvalidSelector { .. }
            | SelectorAlreadyRegistered { .. }
            | UnknownLedger { .. }
            | PoolNotActive { .. }
            | PoolAlreadyCreated { .. }
            | MissingPeer { .. }
            | MissingSelector { .. }
            | InvalidTokens(_)
            | InvalidInput(_)
            | AmountOverflow(_)
            | InvalidStateTransition { .. }
            | Decode(_) => ErrorCategory::Precondition,
            SlippageExceeded { .. }
            | External { .. }
            | Messaging { .. }
            | ChainConnection { .. }
            | Transaction(_)
            | Timeout { .. }
            | Wallet(_)
            | Contract(_) => ErrorCategory::External,
            Config(_) | Database(_) | Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::ChainConnection { .. } | OrchestratorError::Timeout { .. }
        )
    }

    pub(crate) fn external(service: &'static str, err: impl std::fmt::Display) -> Self {
        OrchestratorError::External {
            service,
            message: err.to_string(),
        }
    }
}

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        let err = OrchestratorError::SenderMismatch {
            chain_id: 2,
            expected: None,
            actual: Address::zero(),
        };
        assert_eq!(err.category(), ErrorCategory::Authentication);

        let err = OrchestratorError::InvalidCredential { header: "x-relay-token" };
        assert_eq!(err.category(), ErrorCategory::Authentication);

        let err = OrchestratorError::AmountOverflow("total shares");
        assert_eq!(err.category(), ErrorCategory::Precondition);

        let err = OrchestratorError::PoolNotActive {
            chain_id: 2,
            status: PoolStatus::Creating,
        };
        assert_eq!(err.category(), ErrorCategory::Precondition);
        assert!(!err.is_retryable());

        let err = OrchestratorError::Timeout {
            operation: "send transaction".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::External);
        assert!(err.is_retryable());
    }
}

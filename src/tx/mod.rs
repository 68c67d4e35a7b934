//! Local chain transaction submission with gas buffering and retries

mod gas;
mod sender;

pub use gas::GasEstimator;
pub use sender::TransactionSender;

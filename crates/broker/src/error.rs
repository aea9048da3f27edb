//! Error types for the broker

use thiserror::Error;

/// Result type for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors surfaced by broker calls
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("store error: {0}")]
    Store(#[from] conduit_store::StoreError),

    #[error("broker is no longer running")]
    Closed,

    #[error("call to broker timed out")]
    Timeout,
}

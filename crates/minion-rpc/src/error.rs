//! Error types for the RPC modules and probes.
//!
//! None of these reach the controller as errors of the transport: every
//! module turns them into the error field of its response payload.

use minion_api::ApiError;
use minion_snmp::SnmpError;
use thiserror::Error;

/// Result type alias for RPC module operations.
pub type Result<T> = std::result::Result<T, RpcError>;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The request payload could not be decoded.
    #[error(transparent)]
    Payload(#[from] ApiError),

    /// SNMP session failure.
    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    /// Name resolution failure.
    #[error("Resolution failed: {0}")]
    Resolve(String),

    /// The operation did not complete in time.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A probe received something it did not expect.
    #[error("Unexpected response: {0}")]
    Unexpected(String),

    /// HTTP client failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A pattern attribute is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    pub fn resolve(message: impl ToString) -> Self {
        Self::Resolve(message.to_string())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

//! Error types for SNMP encoding, decoding and sessions.

use thiserror::Error;

/// Result type alias for SNMP operations.
pub type Result<T> = std::result::Result<T, SnmpError>;

#[derive(Debug, Error)]
pub enum SnmpError {
    /// The datagram ended before a complete element was read.
    #[error("Truncated BER data: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    /// An element had an unexpected tag.
    #[error("Unexpected BER tag 0x{found:02x} (expected {expected})")]
    UnexpectedTag { expected: &'static str, found: u8 },

    /// Structurally valid BER that is not a valid SNMP message.
    #[error("Malformed SNMP message: {0}")]
    Malformed(String),

    /// Version outside v1/v2c.
    #[error("Unsupported SNMP version {0}")]
    UnsupportedVersion(i64),

    /// Object identifier text could not be parsed.
    #[error("Invalid OID '{0}'")]
    InvalidOid(String),

    /// No answer after all retries.
    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    /// The agent answered with a non-zero error-status.
    #[error("Agent returned error-status {status} at index {index}")]
    AgentError { status: i64, index: i64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SnmpError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }
}

//! Error types for the sink listeners.

use minion_api::ApiError;
use minion_snmp::SnmpError;
use thiserror::Error;

/// Result type alias for sink listener operations.
pub type Result<T> = std::result::Result<T, SinkError>;

#[derive(Debug, Error)]
pub enum SinkError {
    /// A listener socket could not be bound.
    #[error("Cannot bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// A flow datagram could not be decoded.
    #[error("Malformed {protocol} packet: {message}")]
    Decode {
        protocol: &'static str,
        message: String,
    },

    /// A trap datagram could not be decoded.
    #[error("SNMP error: {0}")]
    Snmp(#[from] SnmpError),

    /// Publishing through the sink failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The NX-OS gRPC server failed.
    #[error("gRPC server error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SinkError {
    pub fn decode(protocol: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            protocol,
            message: message.into(),
        }
    }

    pub fn bind(address: impl ToString, source: std::io::Error) -> Self {
        Self::Bind {
            address: address.to_string(),
            source,
        }
    }
}

/// Truncated reads surface as `UnexpectedEof`; report them as decode errors.
pub(crate) fn truncated(protocol: &'static str) -> impl Fn(std::io::Error) -> SinkError {
    move |e| SinkError::decode(protocol, format!("truncated: {e}"))
}

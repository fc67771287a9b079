//! Error types for the broker and its transports.

use minion_api::ApiError;
use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker URL or a transport property is unusable.
    #[error("Invalid broker configuration: {0}")]
    Config(String),

    /// The configured transport is not compiled in.
    #[error("Unsupported broker transport: {0}")]
    Unsupported(String),

    /// Channel establishment failed.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A stream call failed or was terminated by the controller.
    #[error("gRPC status: {0}")]
    Status(#[from] tonic::Status),

    /// The outbound stream for a channel is gone.
    #[error("{0} stream is not connected")]
    NotConnected(&'static str),

    /// Producing a record to the message log failed.
    #[error("Failed to produce to {topic}: {message}")]
    Produce { topic: String, message: String },

    /// Subscribing to or consuming from the message log failed.
    #[error("Message log error: {0}")]
    Consume(String),

    /// A record could not be decoded.
    #[error("Protobuf decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Metric registration failed.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Configuration accessors failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    pub fn produce(topic: impl Into<String>, message: impl ToString) -> Self {
        Self::Produce {
            topic: topic.into(),
            message: message.to_string(),
        }
    }

    /// Transient errors are retried by reconnecting, everything else is fatal
    /// at startup.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Status(_)
                | Self::NotConnected(_)
                | Self::Produce { .. }
                | Self::Consume(_)
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BrokerError::NotConnected("sink").is_transient());
        assert!(BrokerError::produce("OpenNMS.Sink.Trap", "queue full").is_transient());
        assert!(!BrokerError::Config("empty url".into()).is_transient());
        assert!(!BrokerError::Unsupported("kafka".into()).is_transient());
    }

    #[test]
    fn test_display() {
        let err = BrokerError::produce("OpenNMS.rpc-response", "timed out");
        assert_eq!(
            err.to_string(),
            "Failed to produce to OpenNMS.rpc-response: timed out"
        );
    }
}

//! Error types shared by the minion crates.
//!
//! Module payload decoding, configuration validation and sink delivery all
//! surface through [`ApiError`].

use thiserror::Error;

/// Result type alias for minion API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur while handling envelopes, payloads and configuration.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A module payload could not be parsed as XML.
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The XML document parsed but does not match the expected schema.
    #[error("Invalid {element} payload: {message}")]
    Payload {
        /// The root element being decoded.
        element: String,
        /// What was wrong with it.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration file could not be decoded.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A sink message could not be handed to the transport.
    #[error("Failed to send sink message for module {module}: {message}")]
    Send {
        /// The sink module id.
        module: String,
        /// Error message.
        message: String,
    },

    /// A listener failed to start or stop.
    #[error("Listener {name} failed: {message}")]
    Listener {
        /// Listener (module) name.
        name: String,
        /// Error message.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Creates a payload schema error.
    pub fn payload(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Payload {
            element: element.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a sink delivery error.
    pub fn send(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Send {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Creates a listener error.
    pub fn listener(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Listener {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Send { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ApiError::payload("echo-request", "missing id");
        assert_eq!(err.to_string(), "Invalid echo-request payload: missing id");

        let err = ApiError::invalid_config("id", "must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid configuration for id: must not be empty"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(ApiError::send("Syslog", "channel closed").is_retryable());
        assert!(!ApiError::invalid_config("id", "empty").is_retryable());
    }
}

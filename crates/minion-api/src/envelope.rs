//! In-memory envelopes exchanged between the broker and the modules.
//!
//! Envelopes are passed by value; a request is never shared between two
//! concurrently running handlers.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

/// Timeout used when a request carries no expiration time.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Tracing key/value pairs carried on every envelope.
pub type TracingInfo = HashMap<String, String>;

/// An RPC request received from the controller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcRequest {
    /// Correlation id chosen by the controller.
    pub rpc_id: String,
    /// Selects the RPC module that handles the request.
    pub module_id: String,
    /// Target minion id (or empty for any minion at the location).
    pub system_id: String,
    /// Target location.
    pub location: String,
    /// Absolute deadline in epoch milliseconds; 0 means none.
    pub expiration_time: u64,
    /// Module payload.
    pub content: Vec<u8>,
    /// Tracing propagation fields.
    pub tracing_info: TracingInfo,
}

impl RpcRequest {
    /// Time left before the controller gives up on this request.
    pub fn get_timeout(&self) -> Duration {
        if self.expiration_time == 0 {
            return DEFAULT_RPC_TIMEOUT;
        }
        let now = Utc::now().timestamp_millis().max(0) as u64;
        Duration::from_millis(self.expiration_time.saturating_sub(now))
    }

    /// Whether the deadline has already passed.
    pub fn is_expired(&self) -> bool {
        self.expiration_time != 0 && self.get_timeout().is_zero()
    }

    /// Payload as UTF-8 text, lossily.
    pub fn content_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

/// A response produced by an RPC module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcResponse {
    pub rpc_id: String,
    pub module_id: String,
    pub system_id: String,
    pub location: String,
    /// Module payload; errors are encoded inside it.
    pub content: Vec<u8>,
    pub tracing_info: TracingInfo,
}

impl RpcResponse {
    /// Builds a response routed back to the sender of `request`.
    pub fn for_request(request: &RpcRequest, content: impl Into<Vec<u8>>) -> Self {
        Self {
            rpc_id: request.rpc_id.clone(),
            module_id: request.module_id.clone(),
            system_id: request.system_id.clone(),
            location: request.location.clone(),
            content: content.into(),
            tracing_info: TracingInfo::new(),
        }
    }

    /// Overwrites the routing fields with those of `request`.
    pub fn route_to(&mut self, request: &RpcRequest) {
        self.rpc_id.clone_from(&request.rpc_id);
        self.module_id.clone_from(&request.module_id);
        self.system_id.clone_from(&request.system_id);
        self.location.clone_from(&request.location);
    }
}

/// A telemetry message published on the sink channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkMessage {
    /// Unique message id (UUID v4).
    pub message_id: String,
    pub module_id: String,
    pub system_id: String,
    pub location: String,
    pub content: Vec<u8>,
    pub tracing_info: TracingInfo,
}

impl SinkMessage {
    /// Creates a message with a fresh id. Identity fields are filled by the broker.
    pub fn new(module_id: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            module_id: module_id.into(),
            content: content.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_without_deadline() {
        let req = RpcRequest::default();
        assert_eq!(req.get_timeout(), DEFAULT_RPC_TIMEOUT);
        assert!(!req.is_expired());
    }

    #[test]
    fn test_timeout_with_deadline() {
        let now = Utc::now().timestamp_millis() as u64;
        let req = RpcRequest {
            expiration_time: now + 5_000,
            ..Default::default()
        };
        let timeout = req.get_timeout();
        assert!(timeout <= Duration::from_secs(5));
        assert!(timeout > Duration::from_secs(3));

        let expired = RpcRequest {
            expiration_time: now - 1_000,
            ..Default::default()
        };
        assert!(expired.get_timeout().is_zero());
        assert!(expired.is_expired());
    }

    #[test]
    fn test_response_routing() {
        let req = RpcRequest {
            rpc_id: "r1".into(),
            module_id: "Echo".into(),
            system_id: "minion-1".into(),
            location: "Remote".into(),
            ..Default::default()
        };
        let resp = RpcResponse::for_request(&req, b"<x/>".to_vec());
        assert_eq!(resp.rpc_id, "r1");
        assert_eq!(resp.module_id, "Echo");
        assert_eq!(resp.system_id, "minion-1");
        assert_eq!(resp.location, "Remote");
    }

    #[test]
    fn test_sink_message_ids_are_unique() {
        let a = SinkMessage::new("Syslog", b"a".to_vec());
        let b = SinkMessage::new("Syslog", b"a".to_vec());
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.module_id, "Syslog");
    }
}

//! Transports carrying envelopes between the minion and the controller.
//!
//! - [`grpc`]: two long-lived gRPC streams
//! - [`message_log`]: topics on a partitioned log, with chunking

pub mod grpc;
pub mod message_log;

use std::sync::Arc;

use async_trait::async_trait;
use minion_api::{MinionConfig, SinkMessage};

use crate::dispatch::Dispatcher;
use crate::error::Result;

/// Who this minion is, as stamped on outgoing envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub system_id: String,
    pub location: String,
}

impl Identity {
    pub fn new(system_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            system_id: system_id.into(),
            location: location.into(),
        }
    }

    pub fn from_config(config: &MinionConfig) -> Self {
        Self::new(config.id.clone(), config.location.clone())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connects and starts delivering inbound requests to `dispatcher`.
    async fn start(&self, dispatcher: Arc<Dispatcher>) -> Result<()>;

    /// Hands one sink message to the controller.
    async fn publish(&self, message: SinkMessage) -> Result<()>;

    /// Closes the streams and waits for the reader tasks. Idempotent.
    async fn stop(&self);
}

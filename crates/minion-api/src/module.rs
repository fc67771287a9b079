//! Module contracts.
//!
//! - [`RpcModule`]: handles one controller request and produces a response.
//! - [`SinkModule`]: owns a listener and publishes what it observes.
//! - [`Sink`]: the broker surface sink modules publish through.
//! - [`ServiceDetector`], [`ServiceMonitor`], [`ServiceCollector`]: probe
//!   kinds the Detect, Poller and Collect modules delegate to.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::MinionConfig;
use crate::dto::{
    CollectorRequest, CollectorResponse, DetectorRequest, DetectorResponse, PollStatus,
    PollerRequest,
};
use crate::envelope::{RpcRequest, RpcResponse, SinkMessage};
use crate::error::Result;

/// Anything stored in a registry is keyed by its id.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Handler for one RPC module id.
#[async_trait]
pub trait RpcModule: Identified + Send + Sync {
    /// Executes the request. `None` means the module failed to produce a
    /// response at all; errors are otherwise encoded in the response body.
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse>;
}

/// Destination of sink messages (implemented by the broker).
#[async_trait]
pub trait Sink: Send + Sync {
    async fn send(&self, message: SinkMessage) -> Result<()>;
}

/// A listener that publishes telemetry through a [`Sink`].
#[async_trait]
pub trait SinkModule: Identified + Send + Sync {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> Result<()>;

    /// Stops the listener. Calling it more than once is harmless.
    async fn stop(&self);
}

#[async_trait]
pub trait ServiceDetector: Identified + Send + Sync {
    async fn detect(&self, request: &DetectorRequest) -> DetectorResponse;
}

#[async_trait]
pub trait ServiceMonitor: Identified + Send + Sync {
    async fn poll(&self, request: &PollerRequest) -> PollStatus;
}

#[async_trait]
pub trait ServiceCollector: Identified + Send + Sync {
    async fn collect(&self, request: &CollectorRequest) -> CollectorResponse;
}

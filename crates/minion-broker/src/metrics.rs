//! Prometheus counters for the broker.
//!
//! Every counter carries the `module` and `system_id` labels so a scrape can
//! be broken down per RPC or sink module.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

const LABELS: &[&str] = &["module", "system_id"];

/// Counter surface shared by the broker, the transports and the dispatcher.
#[derive(Clone)]
pub struct BrokerMetrics {
    system_id: String,

    pub sink_delivery_succeeded: IntCounterVec,
    pub sink_delivery_failed: IntCounterVec,
    pub rpc_received_succeeded: IntCounterVec,
    pub rpc_received_failed: IntCounterVec,
    pub rpc_processed_succeeded: IntCounterVec,
    pub rpc_processed_failed: IntCounterVec,
    pub responses_sent_succeeded: IntCounterVec,
    pub responses_sent_failed: IntCounterVec,

    pub registry: Arc<Registry>,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec, prometheus::Error> {
    let vec = IntCounterVec::new(Opts::new(name, help), LABELS)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

impl BrokerMetrics {
    /// Creates the counters in a fresh registry.
    pub fn new(system_id: impl Into<String>) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        Ok(Self {
            system_id: system_id.into(),
            sink_delivery_succeeded: counter(
                &registry,
                "onms_sink_messages_delivery_succeeded",
                "Sink messages handed to the transport",
            )?,
            sink_delivery_failed: counter(
                &registry,
                "onms_sink_messages_delivery_failed",
                "Sink messages the transport rejected",
            )?,
            rpc_received_succeeded: counter(
                &registry,
                "onms_rpc_requests_received_succeeded",
                "RPC requests accepted for dispatch",
            )?,
            rpc_received_failed: counter(
                &registry,
                "onms_rpc_requests_received_failed",
                "RPC requests dropped on arrival",
            )?,
            rpc_processed_succeeded: counter(
                &registry,
                "onms_rpc_requests_processed_succeeded",
                "RPC requests a module produced a response for",
            )?,
            rpc_processed_failed: counter(
                &registry,
                "onms_rpc_requests_processed_failed",
                "RPC requests without a module or without a response",
            )?,
            responses_sent_succeeded: counter(
                &registry,
                "onms_rpc_responses_sent_succeeded",
                "RPC responses written to the transport",
            )?,
            responses_sent_failed: counter(
                &registry,
                "onms_rpc_responses_sent_failed",
                "RPC responses the transport rejected",
            )?,
            registry: Arc::new(registry),
        })
    }

    fn inc(&self, vec: &IntCounterVec, module: &str) {
        vec.with_label_values(&[module, self.system_id.as_str()]).inc();
    }

    pub fn record_sink_delivery(&self, module: &str, ok: bool) {
        if ok {
            self.inc(&self.sink_delivery_succeeded, module);
        } else {
            self.inc(&self.sink_delivery_failed, module);
        }
    }

    pub fn record_rpc_received(&self, module: &str, ok: bool) {
        if ok {
            self.inc(&self.rpc_received_succeeded, module);
        } else {
            self.inc(&self.rpc_received_failed, module);
        }
    }

    pub fn record_rpc_processed(&self, module: &str, ok: bool) {
        if ok {
            self.inc(&self.rpc_processed_succeeded, module);
        } else {
            self.inc(&self.rpc_processed_failed, module);
        }
    }

    pub fn record_response_sent(&self, module: &str, ok: bool) {
        if ok {
            self.inc(&self.responses_sent_succeeded, module);
        } else {
            self.inc(&self.responses_sent_failed, module);
        }
    }

    /// Current value of `vec` for `module`.
    pub fn value(&self, vec: &IntCounterVec, module: &str) -> u64 {
        vec.with_label_values(&[module, self.system_id.as_str()]).get()
    }

    /// Renders all counters in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

//! The broker facade: owns the transport, the dispatcher and the counters,
//! and is the [`Sink`] every sink module publishes through.

use std::sync::Arc;

use async_trait::async_trait;
use minion_api::{
    ApiError, BrokerType, MinionConfig, Registry, RpcModule, Sink, SinkMessage, RPC_MODULES,
};
use opentelemetry::trace::SpanKind;
use opentelemetry::{Context, KeyValue};
use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::metrics::BrokerMetrics;
use crate::propagation;
use crate::transport::grpc::{GrpcSettings, GrpcTransport};
use crate::transport::{Identity, Transport};

pub struct Broker {
    identity: Identity,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<BrokerMetrics>,
}

impl Broker {
    /// Builds the transport selected by `broker-type`, dispatching to the
    /// global RPC module registry.
    pub fn from_config(config: &MinionConfig, metrics: Arc<BrokerMetrics>) -> Result<Self> {
        let identity = Identity::from_config(config);
        let transport: Arc<dyn Transport> = match config.broker_type {
            BrokerType::Grpc => Arc::new(GrpcTransport::new(
                GrpcSettings::from_config(config),
                identity.clone(),
            )),
            BrokerType::Kafka => kafka_transport(config, identity.clone())?,
        };
        Ok(Self::new(identity, transport, &RPC_MODULES, metrics))
    }

    pub fn new(
        identity: Identity,
        transport: Arc<dyn Transport>,
        registry: &'static Registry<dyn RpcModule>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(registry, Arc::clone(&metrics)));
        Self {
            identity,
            transport,
            dispatcher,
            metrics,
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.transport.start(Arc::clone(&self.dispatcher)).await?;
        info!(
            transport = self.transport.name(),
            system_id = %self.identity.system_id,
            location = %self.identity.location,
            "Broker started"
        );
        Ok(())
    }

    pub async fn stop(&self) {
        self.transport.stop().await;
        info!(transport = self.transport.name(), "Broker stopped");
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }
}

#[cfg(feature = "kafka")]
fn kafka_transport(config: &MinionConfig, identity: Identity) -> Result<Arc<dyn Transport>> {
    use crate::transport::message_log::kafka::KafkaLog;
    use crate::transport::message_log::{LogSettings, MessageLogTransport};

    let log = Arc::new(KafkaLog::new(config)?);
    Ok(Arc::new(MessageLogTransport::new(
        log,
        LogSettings::from_config(config),
        identity,
    )))
}

#[cfg(not(feature = "kafka"))]
fn kafka_transport(_config: &MinionConfig, _identity: Identity) -> Result<Arc<dyn Transport>> {
    Err(crate::BrokerError::Unsupported(
        "kafka (built without the `kafka` feature)".to_string(),
    ))
}

#[async_trait]
impl Sink for Broker {
    async fn send(&self, mut message: SinkMessage) -> minion_api::Result<()> {
        if message.message_id.is_empty() {
            message.message_id = Uuid::new_v4().to_string();
        }
        if message.system_id.is_empty() {
            message.system_id.clone_from(&self.identity.system_id);
        }
        if message.location.is_empty() {
            message.location.clone_from(&self.identity.location);
        }
        let module = message.module_id.clone();

        let cx = propagation::start_span(
            module.clone(),
            SpanKind::Producer,
            &Context::current(),
            vec![
                KeyValue::new("module", module.clone()),
                KeyValue::new("message_id", message.message_id.clone()),
            ],
        );
        propagation::inject(&cx, &mut message.tracing_info);

        let result = self.transport.publish(message).await;
        self.metrics.record_sink_delivery(&module, result.is_ok());
        if let Err(e) = &result {
            warn!(module = %module, error = %e, "Failed to deliver sink message");
            propagation::mark_failed(&cx, &e.to_string());
        }
        propagation::end(&cx);
        result.map_err(|e| ApiError::send(module, e.to_string()))
    }
}

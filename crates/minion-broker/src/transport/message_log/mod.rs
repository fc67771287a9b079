//! Message-log transport.
//!
//! Requests are consumed from `{instance}.{location}.rpc-request`, responses
//! are produced to `{instance}.rpc-response` and sink messages to
//! `{instance}.Sink.{module}`. Payloads larger than `max-buffer-size` are
//! split into chunks; inbound chunks are reassembled before dispatch.

pub mod memory;
#[cfg(feature = "kafka")]
pub mod kafka;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use minion_api::{MinionConfig, RpcRequest, RpcResponse, SinkMessage};
use minion_proto::kafka::{RpcMessageProto, SinkMessageProto};
use prost::Message;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{Identity, Transport};
use crate::chunk;
use crate::dispatch::{Dispatcher, Responder};
use crate::error::Result;
use crate::reassembly::Reassembler;

pub use memory::{InMemoryLog, Record};

/// Records read from one subscription, in log order.
pub type RecordStream = BoxStream<'static, Result<Vec<u8>>>;

/// A partitioned, keyed message log.
#[async_trait]
pub trait MessageLog: Send + Sync + 'static {
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()>;

    async fn subscribe(&self, topic: &str) -> Result<RecordStream>;

    /// Stops every subscription. Streams returned by `subscribe` end.
    async fn close(&self) {}
}

/// Topic naming for one controller instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    instance_id: String,
    location: String,
}

impl Topics {
    pub fn new(instance_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            location: location.into(),
        }
    }

    pub fn sink(&self, module_id: &str) -> String {
        format!("{}.Sink.{}", self.instance_id, module_id)
    }

    pub fn rpc_request(&self) -> String {
        format!("{}.{}.rpc-request", self.instance_id, self.location)
    }

    pub fn rpc_response(&self) -> String {
        format!("{}.rpc-response", self.instance_id)
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub instance_id: String,
    /// Chunk size in bytes; 0 disables chunking.
    pub max_buffer_size: usize,
    pub reassembly_capacity: usize,
}

impl LogSettings {
    pub fn from_config(config: &MinionConfig) -> Self {
        Self {
            instance_id: config.instance_id().to_string(),
            max_buffer_size: config.max_buffer_size(),
            reassembly_capacity: config.reassembly_capacity(),
        }
    }
}

struct LogResponder {
    log: Arc<dyn MessageLog>,
    topic: String,
    max_buffer_size: usize,
}

#[async_trait]
impl Responder for LogResponder {
    async fn respond(&self, response: RpcResponse) -> Result<()> {
        let chunks = chunk::split(&response.content, self.max_buffer_size);
        let total = chunks.len() as i32;
        for (index, bytes) in chunks.into_iter().enumerate() {
            let record = RpcMessageProto {
                rpc_id: response.rpc_id.clone(),
                rpc_content: bytes.to_vec(),
                system_id: response.system_id.clone(),
                expiration_time: 0,
                current_chunk_number: index as i32,
                total_chunks: total,
                tracing_info: response.tracing_info.clone(),
                module_id: response.module_id.clone(),
            };
            self.log
                .produce(&self.topic, &response.rpc_id, record.encode_to_vec())
                .await?;
        }
        Ok(())
    }
}

pub struct MessageLogTransport {
    log: Arc<dyn MessageLog>,
    settings: LogSettings,
    identity: Identity,
    topics: Topics,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl MessageLogTransport {
    pub fn new(log: Arc<dyn MessageLog>, settings: LogSettings, identity: Identity) -> Self {
        let topics = Topics::new(settings.instance_id.clone(), identity.location.clone());
        Self {
            log,
            settings,
            identity,
            topics,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }
}

#[async_trait]
impl Transport for MessageLogTransport {
    fn name(&self) -> &'static str {
        "message-log"
    }

    async fn start(&self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        let topic = self.topics.rpc_request();
        let records = self.log.subscribe(&topic).await?;
        info!(topic = %topic, "Subscribed to RPC requests");

        let responder: Arc<dyn Responder> = Arc::new(LogResponder {
            log: Arc::clone(&self.log),
            topic: self.topics.rpc_response(),
            max_buffer_size: self.settings.max_buffer_size,
        });
        self.tracker.spawn(consume_requests(
            records,
            Reassembler::new(self.settings.reassembly_capacity),
            self.identity.clone(),
            dispatcher,
            responder,
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn publish(&self, message: SinkMessage) -> Result<()> {
        let topic = self.topics.sink(&message.module_id);
        let chunks = chunk::split(&message.content, self.settings.max_buffer_size);
        let total = chunks.len() as i32;
        for (index, bytes) in chunks.into_iter().enumerate() {
            let record = SinkMessageProto {
                message_id: message.message_id.clone(),
                content: bytes.to_vec(),
                current_chunk_number: index as i32,
                total_chunks: total,
                tracing_info: message.tracing_info.clone(),
            };
            self.log
                .produce(&topic, &message.message_id, record.encode_to_vec())
                .await?;
        }
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.log.close().await;
    }
}

async fn consume_requests(
    mut records: RecordStream,
    mut reassembler: Reassembler,
    identity: Identity,
    dispatcher: Arc<Dispatcher>,
    responder: Arc<dyn Responder>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = records.next() => next,
        };
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!(error = %e, "Failed to consume RPC request");
                continue;
            }
            None => {
                warn!("RPC request subscription ended");
                break;
            }
        };
        let proto = match RpcMessageProto::decode(bytes.as_slice()) {
            Ok(proto) => proto,
            Err(e) => {
                warn!(error = %e, "Discarding undecodable RPC record");
                continue;
            }
        };
        if !proto.system_id.is_empty() && proto.system_id != identity.system_id {
            debug!(rpc_id = %proto.rpc_id, system_id = %proto.system_id, "Request is directed at another minion");
            continue;
        }
        let Some(content) = reassembler.accept(
            &proto.rpc_id,
            proto.current_chunk_number,
            proto.total_chunks.max(1),
            &proto.rpc_content,
        ) else {
            continue;
        };
        let request = RpcRequest {
            rpc_id: proto.rpc_id,
            module_id: proto.module_id,
            system_id: proto.system_id,
            location: identity.location.clone(),
            expiration_time: proto.expiration_time,
            content,
            tracing_info: proto.tracing_info,
        };
        dispatcher.dispatch(request, Arc::clone(&responder));
    }
    debug!("RPC request consumer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        let topics = Topics::new("OpenNMS", "MINION");
        assert_eq!(topics.sink("Trap"), "OpenNMS.Sink.Trap");
        assert_eq!(topics.rpc_request(), "OpenNMS.MINION.rpc-request");
        assert_eq!(topics.rpc_response(), "OpenNMS.rpc-response");
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = MinionConfig::default();
        config.broker_properties.insert("max-buffer-size".into(), "0".into());
        config.broker_properties.insert("instance-id".into(), "Acme".into());
        let settings = LogSettings::from_config(&config);
        assert_eq!(settings.max_buffer_size, 0);
        assert_eq!(settings.instance_id, "Acme");
        assert_eq!(settings.reassembly_capacity, 1000);
    }

    #[tokio::test]
    async fn test_publish_chunks_sink_message() {
        let log = Arc::new(InMemoryLog::new());
        let transport = MessageLogTransport::new(
            log.clone(),
            LogSettings {
                instance_id: "OpenNMS".into(),
                max_buffer_size: 4,
                reassembly_capacity: 10,
            },
            Identity::new("minion-1", "MINION"),
        );
        let message = SinkMessage::new("Syslog", b"0123456789".to_vec());
        transport.publish(message.clone()).await.unwrap();

        let records = log.records("OpenNMS.Sink.Syslog");
        assert_eq!(records.len(), 3);
        let mut content = Vec::new();
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.key, message.message_id);
            let proto = SinkMessageProto::decode(record.payload.as_slice()).unwrap();
            assert_eq!(proto.current_chunk_number, i as i32);
            assert_eq!(proto.total_chunks, 3);
            content.extend(proto.content);
        }
        assert_eq!(content, b"0123456789");
    }

    #[tokio::test]
    async fn test_stop_releases_subscription() {
        let log = Arc::new(InMemoryLog::new());
        let transport = MessageLogTransport::new(
            log.clone(),
            LogSettings {
                instance_id: "OpenNMS".into(),
                max_buffer_size: 4,
                reassembly_capacity: 10,
            },
            Identity::new("minion-1", "MINION"),
        );
        let registry: &'static minion_api::Registry<dyn minion_api::RpcModule> =
            Box::leak(Box::new(minion_api::Registry::new("rpc")));
        let metrics = Arc::new(crate::BrokerMetrics::new("minion-1").unwrap());
        transport
            .start(Arc::new(Dispatcher::new(registry, metrics)))
            .await
            .unwrap();
        assert_eq!(log.subscriber_count("OpenNMS.MINION.rpc-request"), 1);

        transport.stop().await;
        assert_eq!(log.subscriber_count("OpenNMS.MINION.rpc-request"), 0);
        // A second stop is harmless.
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_failed_produce_aborts_remaining_chunks() {
        let log = Arc::new(InMemoryLog::new());
        log.fail_after(1);
        let transport = MessageLogTransport::new(
            log.clone(),
            LogSettings {
                instance_id: "OpenNMS".into(),
                max_buffer_size: 4,
                reassembly_capacity: 10,
            },
            Identity::new("minion-1", "MINION"),
        );
        let result = transport
            .publish(SinkMessage::new("Syslog", b"0123456789".to_vec()))
            .await;
        assert!(result.is_err());
        assert_eq!(log.records("OpenNMS.Sink.Syslog").len(), 1);
    }
}

//! Kafka-backed message log.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use minion_api::MinionConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::Message;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::{MessageLog, RecordStream};
use crate::error::{BrokerError, Result};

const CONSUMER_BUFFER: usize = 1000;
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause after a failed poll before the consumer polls again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);

pub struct KafkaLog {
    producer: FutureProducer,
    consumer_config: ClientConfig,
    cancel: CancellationToken,
    consumers: TaskTracker,
}

impl KafkaLog {
    /// Builds the clients from `broker-url` and the pass-through broker
    /// properties. The RPC consumer group defaults to the location, so that
    /// each request is handled by one minion of the location.
    pub fn new(config: &MinionConfig) -> Result<Self> {
        let mut base = ClientConfig::new();
        base.set("bootstrap.servers", config.broker_url.as_str());
        for (key, value) in config.passthrough_properties() {
            base.set(key.as_str(), value.as_str());
        }
        let producer: FutureProducer = base
            .create()
            .map_err(|e| BrokerError::Config(format!("kafka producer: {e}")))?;

        let mut consumer_config = base.clone();
        if consumer_config.get("group.id").is_none() {
            consumer_config.set("group.id", config.location.as_str());
        }
        consumer_config
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest");

        Ok(Self {
            producer,
            consumer_config,
            cancel: CancellationToken::new(),
            consumers: TaskTracker::new(),
        })
    }
}

#[async_trait]
impl MessageLog for KafkaLog {
    async fn produce(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(&payload);
        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| BrokerError::produce(topic, e))
    }

    async fn subscribe(&self, topic: &str) -> Result<RecordStream> {
        let consumer: StreamConsumer = self
            .consumer_config
            .create()
            .map_err(|e| BrokerError::Consume(e.to_string()))?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Consume(e.to_string()))?;

        let (tx, rx) = mpsc::channel(CONSUMER_BUFFER);
        self.consumers.spawn(consume(
            consumer,
            topic.to_string(),
            tx,
            self.cancel.clone(),
        ));
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.consumers.close();
        self.consumers.wait().await;
    }
}

/// Polls `consumer` until cancelled or the reader goes away. The consumer is
/// dropped on exit, so no record is fetched (and auto-committed) after stop.
async fn consume(
    consumer: StreamConsumer,
    topic: String,
    tx: mpsc::Sender<Result<Vec<u8>>>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = consumer.recv() => received,
        };
        let item = match received {
            Ok(message) => Ok(message.payload().unwrap_or_default().to_vec()),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Kafka poll failed");
                Err(BrokerError::Consume(e.to_string()))
            }
        };
        let failed = item.is_err();
        if tx.send(item).await.is_err() {
            break;
        }
        if failed {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {}
            }
        }
    }
    debug!(topic = %topic, "Kafka consumer stopped");
}

//! Chunked RPC handling over the in-memory message log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minion_api::{Identified, Registry, RpcModule, RpcRequest, RpcResponse};
use minion_broker::{
    Broker, BrokerMetrics, Identity, InMemoryLog, LogSettings, MessageLog, MessageLogTransport,
    Record,
};
use minion_proto::kafka::RpcMessageProto;
use pretty_assertions::assert_eq;
use prost::Message;

struct Pong;

impl Identified for Pong {
    fn id(&self) -> &str {
        "Pong"
    }
}

#[async_trait]
impl RpcModule for Pong {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let body = format!("pong:{}", request.content_str());
        Some(RpcResponse::for_request(&request, body.into_bytes()))
    }
}

fn chunk_record(rpc_id: &str, system_id: &str, current: i32, total: i32, bytes: &[u8]) -> Vec<u8> {
    RpcMessageProto {
        rpc_id: rpc_id.into(),
        rpc_content: bytes.to_vec(),
        system_id: system_id.into(),
        current_chunk_number: current,
        total_chunks: total,
        module_id: "Pong".into(),
        ..Default::default()
    }
    .encode_to_vec()
}

async fn wait_for(log: &InMemoryLog, topic: &str, count: usize) -> Vec<Record> {
    for _ in 0..100 {
        let records = log.records(topic);
        if records.len() >= count {
            return records;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log.records(topic)
}

async fn started_broker(log: Arc<InMemoryLog>, max_buffer_size: usize) -> Broker {
    let registry: &'static Registry<dyn RpcModule> = Box::leak(Box::new(Registry::new("rpc")));
    registry.register(Arc::new(Pong));
    let identity = Identity::new("minion-1", "MINION");
    let transport = Arc::new(MessageLogTransport::new(
        log,
        LogSettings {
            instance_id: "OpenNMS".into(),
            max_buffer_size,
            reassembly_capacity: 100,
        },
        identity.clone(),
    ));
    let broker = Broker::new(
        identity,
        transport,
        registry,
        Arc::new(BrokerMetrics::new("minion-1").unwrap()),
    );
    broker.start().await.unwrap();
    broker
}

#[tokio::test]
async fn test_three_chunk_request_is_dispatched_once() {
    let log = Arc::new(InMemoryLog::new());
    let broker = started_broker(log.clone(), 4).await;
    let topic = "OpenNMS.MINION.rpc-request";

    let payload = b"hello world";
    log.produce(topic, "R", chunk_record("R", "", 0, 3, &payload[0..4])).await.unwrap();
    log.produce(topic, "R", chunk_record("R", "", 1, 3, &payload[4..8])).await.unwrap();
    log.produce(topic, "R", chunk_record("R", "", 2, 3, &payload[8..11])).await.unwrap();
    // A replayed final chunk must not trigger a second execution.
    log.produce(topic, "R", chunk_record("R", "", 2, 3, &payload[8..11])).await.unwrap();

    // "pong:hello world" is 16 bytes, so four response chunks.
    let records = wait_for(&log, "OpenNMS.rpc-response", 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.records("OpenNMS.rpc-response").len(), 4);

    let mut content = Vec::new();
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.key, "R");
        let proto = RpcMessageProto::decode(record.payload.as_slice()).unwrap();
        assert_eq!(proto.rpc_id, "R");
        assert_eq!(proto.module_id, "Pong");
        assert_eq!(proto.current_chunk_number, i as i32);
        assert_eq!(proto.total_chunks, 4);
        content.extend(proto.rpc_content);
    }
    assert_eq!(content, b"pong:hello world");

    let metrics = broker.metrics();
    assert_eq!(metrics.value(&metrics.rpc_received_succeeded, "Pong"), 1);
    broker.stop().await;
}

#[tokio::test]
async fn test_requests_for_other_minions_are_skipped() {
    let log = Arc::new(InMemoryLog::new());
    let broker = started_broker(log.clone(), 0).await;
    let topic = "OpenNMS.MINION.rpc-request";

    log.produce(topic, "A", chunk_record("A", "minion-2", 0, 1, b"a")).await.unwrap();
    log.produce(topic, "B", chunk_record("B", "minion-1", 0, 1, b"b")).await.unwrap();

    let records = wait_for(&log, "OpenNMS.rpc-response", 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(log.records("OpenNMS.rpc-response").len(), 1);
    let proto = RpcMessageProto::decode(records[0].payload.as_slice()).unwrap();
    assert_eq!(proto.rpc_id, "B");
    assert_eq!(proto.total_chunks, 1);
    assert_eq!(proto.rpc_content, b"pong:b");
    broker.stop().await;
}

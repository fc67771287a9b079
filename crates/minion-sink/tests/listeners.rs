//! End-to-end listener tests over loopback sockets.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use minion_api::dto::TrapLogDto;
use minion_api::{FromXml, Listener, MinionConfig, ParserKind, SinkModule};
use minion_proto::mdt::g_rpc_mdt_dialout_client::GRpcMdtDialoutClient;
use minion_proto::{FlowMessage, MdtDialoutArgs, NetflowVersion, TelemetryMessageLog};
use minion_sink::telemetry::PROP_REVERSE_DNS;
use minion_sink::testing::RecordingSink;
use minion_sink::{NxosGrpcModule, TrapModule, UdpTelemetryModule, TRAP_MODULE_ID};
use minion_snmp::{Message, MessagePdu, Oid, Pdu, PduType, Value, VarBind, Version};
use pretty_assertions::assert_eq;
use prost::Message as _;
use tokio::net::UdpSocket;

fn config() -> MinionConfig {
    MinionConfig {
        id: "minion-01".into(),
        location: "Edge".into(),
        trap_port: 0,
        ..Default::default()
    }
}

fn listener(name: &str, parser: ParserKind) -> Listener {
    Listener {
        name: name.into(),
        port: 0,
        parser,
        properties: HashMap::from([(PROP_REVERSE_DNS.to_string(), "false".to_string())]),
    }
}

fn oid(s: &str) -> Oid {
    s.parse().unwrap()
}

fn netflow9_packet() -> Vec<u8> {
    let mut p = Vec::new();
    // header: version, count, uptime, secs, sequence, source id
    p.extend_from_slice(&9u16.to_be_bytes());
    p.extend_from_slice(&2u16.to_be_bytes());
    p.extend_from_slice(&1_000u32.to_be_bytes());
    p.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    p.extend_from_slice(&1u32.to_be_bytes());
    p.extend_from_slice(&0u32.to_be_bytes());
    // template 300: src addr, dst addr, dst port, bytes
    p.extend_from_slice(&[0, 0, 0, 24, 1, 44, 0, 4]);
    p.extend_from_slice(&[0, 8, 0, 4, 0, 12, 0, 4, 0, 11, 0, 2, 0, 1, 0, 4]);
    // data flowset 300 with one record
    p.extend_from_slice(&[1, 44, 0, 18]);
    p.extend_from_slice(&[172, 16, 0, 1, 172, 16, 0, 2]);
    p.extend_from_slice(&53u16.to_be_bytes());
    p.extend_from_slice(&512u32.to_be_bytes());
    p
}

#[tokio::test]
async fn test_netflow9_datagram_becomes_telemetry_log() {
    let sink = RecordingSink::new();
    let module = UdpTelemetryModule::with_bind_host(listener("nf9", ParserKind::Netflow9Udp), "127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();
    let target = module.local_addr().unwrap();

    let exporter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    exporter.send_to(&netflow9_packet(), target).await.unwrap();

    let message = sink.next().await;
    assert_eq!(message.module_id, "Telemetry-nf9");
    let log = TelemetryMessageLog::decode(message.content.as_slice()).unwrap();
    assert_eq!(log.source_address, "127.0.0.1");
    assert_eq!(log.source_port, u32::from(exporter.local_addr().unwrap().port()));
    assert_eq!(log.system_id, "minion-01");
    assert_eq!(log.location, "Edge");
    assert_eq!(log.message.len(), 1);

    let flow = FlowMessage::decode(log.message[0].bytes.as_slice()).unwrap();
    assert_eq!(flow.netflow_version(), NetflowVersion::V9);
    assert_eq!(flow.src_address, "172.16.0.1");
    assert_eq!(flow.dst_address, "172.16.0.2");
    assert_eq!(flow.dst_port, Some(53));
    assert_eq!(flow.num_bytes, Some(512));

    module.stop().await;
}

#[tokio::test]
async fn test_undecodable_datagram_is_dropped() {
    let sink = RecordingSink::new();
    let module = UdpTelemetryModule::with_bind_host(listener("nf5", ParserKind::Netflow5Udp), "127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();

    let exporter = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    exporter
        .send_to(b"not a flow", module.local_addr().unwrap())
        .await
        .unwrap();
    assert!(sink.try_next(Duration::from_millis(200)).await.is_none());

    module.stop().await;
}

#[tokio::test]
async fn test_forward_udp_is_verbatim() {
    let sink = RecordingSink::new();
    let module = UdpTelemetryModule::with_bind_host(listener("raw", ParserKind::ForwardUdp), "127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[0xde, 0xad, 0xbe, 0xef], module.local_addr().unwrap())
        .await
        .unwrap();

    let message = sink.next().await;
    assert_eq!(message.module_id, "Telemetry-raw");
    let log = TelemetryMessageLog::decode(message.content.as_slice()).unwrap();
    assert_eq!(log.message[0].bytes, vec![0xde, 0xad, 0xbe, 0xef]);

    module.stop().await;
    module.stop().await;
}

#[tokio::test]
async fn test_v2c_inform_is_acknowledged_and_forwarded() {
    let sink = RecordingSink::new();
    let module = TrapModule::with_bind_host("127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();

    let inform = Message::new(
        Version::V2c,
        "public",
        Pdu::new(
            PduType::InformRequest,
            4242,
            vec![
                VarBind::new(oid(".1.3.6.1.2.1.1.3.0"), Value::TimeTicks(5000)),
                VarBind::new(
                    oid(".1.3.6.1.6.3.1.1.4.1.0"),
                    Value::ObjectIdentifier(oid(".1.3.6.1.6.3.1.1.5.3")),
                ),
                VarBind::new(
                    oid(".1.3.6.1.6.3.18.1.3.0"),
                    Value::IpAddress(Ipv4Addr::new(10, 9, 8, 7)),
                ),
                VarBind::new(oid(".1.3.6.1.2.1.2.2.1.1.3"), Value::Integer(3)),
            ],
        ),
    )
    .encode()
    .unwrap();

    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    agent.send_to(&inform, module.local_addr().unwrap()).await.unwrap();

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_secs(5), agent.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let ack = Message::decode(&buf[..n]).unwrap();
    match ack.pdu {
        MessagePdu::Pdu(pdu) => {
            assert_eq!(pdu.pdu_type, PduType::Response);
            assert_eq!(pdu.request_id, 4242);
        }
        other => panic!("unexpected ack {other:?}"),
    }

    let message = sink.next().await;
    assert_eq!(message.module_id, TRAP_MODULE_ID);
    let log = TrapLogDto::from_xml_bytes(&message.content).unwrap();
    assert_eq!(log.system_id, "minion-01");
    assert_eq!(log.location, "Edge");
    assert_eq!(log.trap_address, "10.9.8.7");
    let trap = &log.messages[0];
    assert_eq!(trap.version, "v2c");
    assert_eq!(trap.community, "public");
    assert_eq!(trap.timestamp, 5000);
    assert_eq!(trap.trap_identity.generic, 2);
    assert_eq!(trap.trap_identity.specific, 0);
    assert_eq!(trap.results.len(), 1);
    assert_eq!(trap.results[0].base, ".1.3.6.1.2.1.2.2.1.1.3");

    module.stop().await;
}

#[tokio::test]
async fn test_garbage_trap_is_ignored() {
    let sink = RecordingSink::new();
    let module = TrapModule::with_bind_host("127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();

    let agent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    agent
        .send_to(&[0x30, 0x03, 0x02, 0x01], module.local_addr().unwrap())
        .await
        .unwrap();
    assert!(sink.try_next(Duration::from_millis(200)).await.is_none());

    module.stop().await;
}

#[tokio::test]
async fn test_nxos_dialout_payloads_are_forwarded() {
    let sink = RecordingSink::new();
    let module = NxosGrpcModule::with_bind_host(listener("nxos", ParserKind::NxosGrpc), "127.0.0.1");
    module.start(&config(), sink.clone()).await.unwrap();
    let address = module.local_addr().unwrap();

    let mut client = GRpcMdtDialoutClient::connect(format!("http://{address}"))
        .await
        .unwrap();
    let outbound = tokio_stream::iter(vec![
        MdtDialoutArgs {
            req_id: 1,
            data: b"gpb-kv-1".to_vec(),
            ..Default::default()
        },
        MdtDialoutArgs {
            req_id: 2,
            errors: "sensor path missing".into(),
            ..Default::default()
        },
        MdtDialoutArgs {
            req_id: 3,
            data: b"gpb-kv-2".to_vec(),
            ..Default::default()
        },
    ]);
    let _response = client.mdt_dialout(outbound).await.unwrap();

    for expected in [&b"gpb-kv-1"[..], &b"gpb-kv-2"[..]] {
        let message = sink.next().await;
        assert_eq!(message.module_id, "Telemetry-nxos");
        let log = TelemetryMessageLog::decode(message.content.as_slice()).unwrap();
        assert_eq!(log.source_address, "127.0.0.1");
        assert_eq!(log.message[0].bytes, expected.to_vec());
    }
    assert!(sink.try_next(Duration::from_millis(100)).await.is_none());

    tokio::time::timeout(Duration::from_secs(5), module.stop())
        .await
        .unwrap();
}

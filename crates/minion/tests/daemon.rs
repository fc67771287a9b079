//! Daemon configuration and metrics endpoint tests.

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use minion::metrics_server::MetricsServer;
use minion::Args;
use minion_api::{BrokerType, ParserKind};
use minion_broker::BrokerMetrics;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
id: edge-7
location: Branch
broker-type: grpc
broker-url: controller:8990
trap-port: 1162
syslog-port: 1514
listeners:
  - name: nf9
    port: 4729
    parser: Netflow9UDP
  - name: sflow
    port: 6343
    parser: SFlowUDP
"#;

fn config_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    file
}

#[test]
fn test_flags_override_file() {
    let file = config_file();
    let path = file.path().to_str().unwrap().to_string();
    let args = Args::parse_from([
        "minion",
        "--config",
        path.as_str(),
        "--location",
        "Lab",
        "--broker-type",
        "kafka",
        "--broker-url",
        "kafka:9092",
        "--trap-port",
        "0",
        "--listener",
        "nf9,9999,IPFIXUDP",
        "--listener",
        "fwd,5000,ForwardUDP",
    ]);
    let config = args.load_config().unwrap();

    assert_eq!(config.id, "edge-7");
    assert_eq!(config.location, "Lab");
    assert_eq!(config.broker_type, BrokerType::Kafka);
    assert_eq!(config.broker_url, "kafka:9092");
    assert_eq!(config.trap_port, 0);
    assert_eq!(config.syslog_port, 1514);
    assert_eq!(config.listeners.len(), 3);
    assert_eq!(config.listeners[0].port, 9999);
    assert_eq!(config.listeners[0].parser, ParserKind::IpfixUdp);
    assert_eq!(config.listeners[2].name, "fwd");
}

#[test]
fn test_invalid_config_rejected() {
    let args = Args::parse_from(["minion", "--id", " "]);
    assert!(args.load_config().is_err());

    let args = Args::parse_from(["minion", "--syslog-port", "1162", "--trap-port", "1162"]);
    assert!(args.load_config().is_err());

    let args = Args::parse_from(["minion", "--config", "/nonexistent/minion.yaml"]);
    assert!(args.load_config().is_err());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let metrics = Arc::new(BrokerMetrics::new("edge-7").unwrap());
    metrics.record_sink_delivery("Heartbeat", true);

    let server = MetricsServer::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .unwrap();
    let address = server.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let task = server.spawn(metrics, shutdown.clone());

    let response = reqwest::get(format!("http://{address}/metrics")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("onms_sink_messages_delivery_succeeded"));
    assert!(body.contains("module=\"Heartbeat\""));

    let missing = reqwest::get(format!("http://{address}/other")).await.unwrap();
    assert_eq!(missing.status(), 404);

    shutdown.cancel();
    task.await.unwrap();
}

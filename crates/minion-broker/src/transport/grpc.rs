//! gRPC stream transport.
//!
//! Two streams are kept open against the controller's `OpenNMSIpc` service:
//! a bidirectional RPC stream (responses up, requests down) and a
//! client-streaming sink stream. Each stream has a single bounded writer
//! channel. A stream that ends is reopened after the reconnect delay until
//! the transport is stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minion_api::config::PROP_TLS_CA_CERT;
use minion_api::{MinionConfig, RpcRequest, RpcResponse, SinkMessage};
use minion_proto::ipc::{self, open_nms_ipc_client::OpenNmsIpcClient, RpcRequestProto, RpcResponseProto};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tracing::{debug, info, warn};

use super::{Identity, Transport};
use crate::dispatch::{Dispatcher, Responder};
use crate::error::{BrokerError, Result};

/// Module id of the handshake frame that opens every RPC stream.
pub const HEADERS_MODULE_ID: &str = "MINION_HEADERS";

const STREAM_BUFFER: usize = 1000;

#[derive(Debug, Clone)]
pub struct GrpcSettings {
    pub url: String,
    pub tls_enabled: bool,
    pub tls_ca_cert: Option<PathBuf>,
    pub reconnect_delay: Duration,
}

impl GrpcSettings {
    pub fn from_config(config: &MinionConfig) -> Self {
        Self {
            url: config.broker_url.clone(),
            tls_enabled: config.tls_enabled(),
            tls_ca_cert: config
                .broker_property(PROP_TLS_CA_CERT)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            reconnect_delay: config.reconnect_delay(),
        }
    }

    fn uri(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else if self.tls_enabled {
            format!("https://{}", self.url)
        } else {
            format!("http://{}", self.url)
        }
    }

    fn endpoint(&self) -> Result<Endpoint> {
        if self.url.trim().is_empty() {
            return Err(BrokerError::Config("broker-url is empty".to_string()));
        }
        let mut endpoint = Endpoint::from_shared(self.uri())?
            .connect_timeout(Duration::from_secs(10))
            .http2_keep_alive_interval(Duration::from_secs(30))
            .keep_alive_while_idle(true);
        if self.tls_enabled {
            let mut tls = ClientTlsConfig::new().with_native_roots();
            if let Some(path) = &self.tls_ca_cert {
                tls = tls.ca_certificate(Certificate::from_pem(std::fs::read(path)?));
            }
            endpoint = endpoint.tls_config(tls)?;
        }
        Ok(endpoint)
    }
}

/// Writers of the currently open streams.
#[derive(Default)]
struct Streams {
    rpc: Mutex<Option<mpsc::Sender<RpcResponseProto>>>,
    sink: Mutex<Option<mpsc::Sender<ipc::SinkMessage>>>,
}

#[async_trait]
impl Responder for Streams {
    async fn respond(&self, response: RpcResponse) -> Result<()> {
        let tx = self.rpc.lock().clone().ok_or(BrokerError::NotConnected("rpc"))?;
        tx.send(response_to_proto(response))
            .await
            .map_err(|_| BrokerError::NotConnected("rpc"))
    }
}

pub struct GrpcTransport {
    settings: GrpcSettings,
    identity: Identity,
    streams: Arc<Streams>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl GrpcTransport {
    pub fn new(settings: GrpcSettings, identity: Identity) -> Self {
        Self {
            settings,
            identity,
            streams: Arc::new(Streams::default()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    fn headers(&self) -> RpcResponseProto {
        RpcResponseProto {
            rpc_id: self.identity.system_id.clone(),
            module_id: HEADERS_MODULE_ID.to_string(),
            system_id: self.identity.system_id.clone(),
            location: self.identity.location.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn start(&self, dispatcher: Arc<Dispatcher>) -> Result<()> {
        let channel = self.settings.endpoint()?.connect().await?;
        info!(url = %self.settings.uri(), tls = self.settings.tls_enabled, "Connected to controller");

        self.tracker.spawn(run_rpc(
            channel.clone(),
            Arc::clone(&self.streams),
            dispatcher,
            self.headers(),
            self.settings.reconnect_delay,
            self.cancel.clone(),
        ));
        self.tracker.spawn(run_sink(
            channel,
            Arc::clone(&self.streams),
            self.settings.reconnect_delay,
            self.cancel.clone(),
        ));
        Ok(())
    }

    async fn publish(&self, message: SinkMessage) -> Result<()> {
        let tx = self
            .streams
            .sink
            .lock()
            .clone()
            .ok_or(BrokerError::NotConnected("sink"))?;
        tx.send(sink_to_proto(message))
            .await
            .map_err(|_| BrokerError::NotConnected("sink"))
    }

    async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.streams.rpc.lock().take();
        self.streams.sink.lock().take();
    }
}

async fn run_rpc(
    channel: Channel,
    streams: Arc<Streams>,
    dispatcher: Arc<Dispatcher>,
    headers: RpcResponseProto,
    delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        // The handshake is queued first so it leads the stream.
        if tx.send(headers.clone()).await.is_err() {
            break;
        }
        *streams.rpc.lock() = Some(tx);

        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = rpc_session(channel.clone(), rx, &streams, &dispatcher) => outcome,
        };
        streams.rpc.lock().take();
        match outcome {
            Ok(()) => warn!("RPC stream closed by controller"),
            Err(e) => warn!(error = %e, "RPC stream failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        info!("Reopening RPC stream");
    }
    streams.rpc.lock().take();
    debug!("RPC stream stopped");
}

async fn rpc_session(
    channel: Channel,
    rx: mpsc::Receiver<RpcResponseProto>,
    streams: &Arc<Streams>,
    dispatcher: &Dispatcher,
) -> Result<()> {
    let mut client = OpenNmsIpcClient::new(channel);
    let mut inbound = client
        .rpc_streaming(ReceiverStream::new(rx))
        .await?
        .into_inner();
    info!("RPC stream established");
    while let Some(proto) = inbound.message().await? {
        debug!(rpc_id = %proto.rpc_id, module = %proto.module_id, "Received RPC request");
        let responder: Arc<dyn Responder> = Arc::clone(streams) as Arc<dyn Responder>;
        dispatcher.dispatch(request_from_proto(proto), responder);
    }
    Ok(())
}

async fn run_sink(channel: Channel, streams: Arc<Streams>, delay: Duration, cancel: CancellationToken) {
    loop {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        *streams.sink.lock() = Some(tx);

        let mut client = OpenNmsIpcClient::new(channel.clone());
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = client.sink_streaming(ReceiverStream::new(rx)) => outcome,
        };
        streams.sink.lock().take();
        match outcome {
            Ok(_) => warn!("Sink stream closed by controller"),
            Err(status) => warn!(error = %status, "Sink stream failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        info!("Reopening sink stream");
    }
    streams.sink.lock().take();
    debug!("Sink stream stopped");
}

fn request_from_proto(proto: RpcRequestProto) -> RpcRequest {
    RpcRequest {
        rpc_id: proto.rpc_id,
        module_id: proto.module_id,
        system_id: proto.system_id,
        location: proto.location,
        expiration_time: proto.expiration_time,
        content: proto.rpc_content,
        tracing_info: proto.tracing_info,
    }
}

fn response_to_proto(response: RpcResponse) -> RpcResponseProto {
    RpcResponseProto {
        rpc_id: response.rpc_id,
        rpc_content: response.content,
        system_id: response.system_id,
        location: response.location,
        module_id: response.module_id,
        tracing_info: response.tracing_info,
    }
}

fn sink_to_proto(message: SinkMessage) -> ipc::SinkMessage {
    ipc::SinkMessage {
        message_id: message.message_id,
        content: message.content,
        system_id: message.system_id,
        location: message.location,
        module_id: message.module_id,
        tracing_info: message.tracing_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str, tls: bool) -> GrpcSettings {
        GrpcSettings {
            url: url.to_string(),
            tls_enabled: tls,
            tls_ca_cert: None,
            reconnect_delay: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_uri_scheme() {
        assert_eq!(settings("localhost:8990", false).uri(), "http://localhost:8990");
        assert_eq!(settings("localhost:8990", true).uri(), "https://localhost:8990");
        assert_eq!(settings("http://ctl:1", true).uri(), "http://ctl:1");
    }

    #[test]
    fn test_empty_url_rejected() {
        assert!(matches!(settings(" ", false).endpoint(), Err(BrokerError::Config(_))));
    }

    #[test]
    fn test_settings_from_config() {
        let mut config = MinionConfig::default();
        config.broker_url = "ctl:8990".into();
        config.broker_properties.insert("tls-enabled".into(), "true".into());
        config.broker_properties.insert("tls-ca-cert".into(), "/etc/ca.pem".into());
        config.broker_properties.insert("reconnect-delay".into(), "250".into());
        let s = GrpcSettings::from_config(&config);
        assert!(s.tls_enabled);
        assert_eq!(s.tls_ca_cert, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(s.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_headers_frame() {
        let transport = GrpcTransport::new(settings("ctl:1", false), Identity::new("minion-1", "Remote"));
        let headers = transport.headers();
        assert_eq!(headers.module_id, HEADERS_MODULE_ID);
        assert_eq!(headers.rpc_id, "minion-1");
        assert_eq!(headers.system_id, "minion-1");
        assert_eq!(headers.location, "Remote");
        assert!(headers.rpc_content.is_empty());
    }

    #[tokio::test]
    async fn test_publish_before_start_fails() {
        let transport = GrpcTransport::new(settings("ctl:1", false), Identity::default());
        let err = transport
            .publish(SinkMessage::new("Heartbeat", b"x".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected("sink")));
        transport.stop().await;
        transport.stop().await;
    }
}

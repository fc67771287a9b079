//! Cisco NX-OS model-driven telemetry over gRPC dial-out.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use minion_api::{ApiError, Identified, Listener, MinionConfig, Sink, SinkMessage, SinkModule};
use minion_proto::mdt::g_rpc_mdt_dialout_server::{GRpcMdtDialout, GRpcMdtDialoutServer};
use minion_proto::{MdtDialoutArgs, TelemetryMessage, TelemetryMessageLog};
use parking_lot::Mutex;
use prost::Message;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::listener::ListenerTasks;

/// NX-OS dial-out gRPC server, publishing under `Telemetry-<name>`.
pub struct NxosGrpcModule {
    listener: Listener,
    module_id: String,
    bind_host: String,
    tasks: ListenerTasks,
    bound: Mutex<Option<SocketAddr>>,
}

impl NxosGrpcModule {
    pub fn new(listener: Listener) -> Self {
        Self::with_bind_host(listener, "0.0.0.0")
    }

    /// Serves on `host` instead of every interface.
    pub fn with_bind_host(listener: Listener, host: impl Into<String>) -> Self {
        Self {
            module_id: listener.module_id(),
            listener,
            bind_host: host.into(),
            tasks: ListenerTasks::new(),
            bound: Mutex::new(None),
        }
    }

    /// Bound address once started; `None` before `start` or after a bind failure.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

impl Identified for NxosGrpcModule {
    fn id(&self) -> &str {
        &self.module_id
    }
}

#[async_trait]
impl SinkModule for NxosGrpcModule {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> minion_api::Result<()> {
        let address = format!("{}:{}", self.bind_host, self.listener.port);
        let tcp = TcpListener::bind(&address).await.map_err(|e| {
            ApiError::listener(&self.module_id, SinkError::bind(&address, e).to_string())
        })?;
        let local = tcp.local_addr()?;
        *self.bound.lock() = Some(local);

        let cancel = self.tasks.token();
        let service = DialoutService {
            publisher: Arc::new(DialoutPublisher {
                sink,
                module_id: self.module_id.clone(),
                system_id: config.id.clone(),
                location: config.location.clone(),
            }),
            cancel: cancel.clone(),
            streams: self.tasks.tracker(),
        };
        let router = tonic::transport::Server::builder()
            .add_service(GRpcMdtDialoutServer::new(service));
        let module_id = self.module_id.clone();
        self.tasks.spawn(async move {
            let incoming = TcpListenerStream::new(tcp);
            if let Err(e) = router
                .serve_with_incoming_shutdown(incoming, cancel.cancelled_owned())
                .await
            {
                warn!(module = %module_id, error = %SinkError::from(e), "NX-OS telemetry server failed");
            }
        });
        info!(listener = %self.listener.name, address = %local, "NX-OS telemetry listener started");
        Ok(())
    }

    async fn stop(&self) {
        self.tasks.stop(&self.module_id).await;
    }
}

/// Wraps dial-out payloads into telemetry envelopes.
struct DialoutPublisher {
    sink: Arc<dyn Sink>,
    module_id: String,
    system_id: String,
    location: String,
}

impl DialoutPublisher {
    async fn publish(&self, peer: Option<SocketAddr>, data: Vec<u8>) {
        let log = TelemetryMessageLog {
            location: self.location.clone(),
            system_id: self.system_id.clone(),
            source_address: peer.map(|p| p.ip().to_string()).unwrap_or_default(),
            source_port: peer.map_or(0, |p| u32::from(p.port())),
            message: vec![TelemetryMessage {
                timestamp: Utc::now().timestamp_millis().max(0) as u64,
                bytes: data,
            }],
        };
        let message = SinkMessage::new(self.module_id.clone(), log.encode_to_vec());
        if let Err(e) = self.sink.send(message).await {
            warn!(module = %self.module_id, error = %e, "Failed to forward NX-OS telemetry");
        }
    }
}

struct DialoutService {
    publisher: Arc<DialoutPublisher>,
    cancel: CancellationToken,
    streams: TaskTracker,
}

#[async_trait]
impl GRpcMdtDialout for DialoutService {
    type MdtDialoutStream = ReceiverStream<Result<MdtDialoutArgs, Status>>;

    async fn mdt_dialout(
        &self,
        request: Request<Streaming<MdtDialoutArgs>>,
    ) -> Result<Response<Self::MdtDialoutStream>, Status> {
        let peer = request.remote_addr();
        let mut inbound = request.into_inner();
        // The response stays open while the reader holds the sender.
        let (keepalive, rx) = mpsc::channel(1);
        let publisher = Arc::clone(&self.publisher);
        let cancel = self.cancel.clone();
        debug!(peer = ?peer, "NX-OS dial-out stream opened");

        self.streams.spawn(async move {
            let _keepalive = keepalive;
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => break,
                    n = inbound.message() => n,
                };
                match next {
                    Ok(Some(args)) if args.data.is_empty() => {
                        if !args.errors.is_empty() {
                            warn!(peer = ?peer, errors = %args.errors, "NX-OS reported errors");
                        }
                    }
                    Ok(Some(args)) => publisher.publish(peer, args.data).await,
                    Ok(None) => break,
                    Err(status) => {
                        if !status.message().is_empty() {
                            warn!(peer = ?peer, error = %status.message(), "NX-OS dial-out stream failed");
                        }
                        break;
                    }
                }
            }
            debug!(peer = ?peer, "NX-OS dial-out stream closed");
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

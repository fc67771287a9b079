//! UDP telemetry listeners: flow decoding and verbatim forwarding.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use minion_api::{ApiError, Identified, Listener, MinionConfig, Sink, SinkMessage, SinkModule};
use minion_proto::{TelemetryMessage, TelemetryMessageLog};
use parking_lot::Mutex;
use prost::Message;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SinkError;
use crate::flow::{decoder_for, FlowDecoder, HostnameResolver};
use crate::listener::ListenerTasks;

/// Listener property; `false` turns off reverse-DNS enrichment of flows.
pub const PROP_REVERSE_DNS: &str = "reverse-dns";

const MAX_DATAGRAM: usize = 65_535;

/// One UDP telemetry listener, publishing under `Telemetry-<name>`.
pub struct UdpTelemetryModule {
    listener: Listener,
    module_id: String,
    bind_host: String,
    tasks: ListenerTasks,
    bound: Mutex<Option<SocketAddr>>,
}

impl UdpTelemetryModule {
    pub fn new(listener: Listener) -> Self {
        Self::with_bind_host(listener, "0.0.0.0")
    }

    /// Listens on `host` instead of every interface.
    pub fn with_bind_host(listener: Listener, host: impl Into<String>) -> Self {
        Self {
            module_id: listener.module_id(),
            listener,
            bind_host: host.into(),
            tasks: ListenerTasks::new(),
            bound: Mutex::new(None),
        }
    }

    /// Bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    fn reverse_dns(&self) -> bool {
        self.listener
            .properties
            .get(PROP_REVERSE_DNS)
            .map_or(true, |v| !v.eq_ignore_ascii_case("false"))
    }
}

impl Identified for UdpTelemetryModule {
    fn id(&self) -> &str {
        &self.module_id
    }
}

#[async_trait]
impl SinkModule for UdpTelemetryModule {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> minion_api::Result<()> {
        let address = format!("{}:{}", self.bind_host, self.listener.port);
        let socket = UdpSocket::bind(&address).await.map_err(|e| {
            ApiError::listener(&self.module_id, SinkError::bind(&address, e).to_string())
        })?;
        let local = socket.local_addr()?;
        *self.bound.lock() = Some(local);

        let mode = match decoder_for(self.listener.parser) {
            Some(decoder) => Mode::Flows {
                decoder,
                resolver: if self.reverse_dns() {
                    HostnameResolver::new()
                } else {
                    HostnameResolver::disabled()
                },
            },
            None => Mode::Forward,
        };
        let receiver = TelemetryReceiver {
            socket,
            sink,
            module_id: self.module_id.clone(),
            system_id: config.id.clone(),
            location: config.location.clone(),
            mode,
        };
        self.tasks.spawn(receiver.run(self.tasks.token()));
        info!(
            listener = %self.listener.name,
            parser = %self.listener.parser,
            address = %local,
            "Telemetry listener started"
        );
        Ok(())
    }

    async fn stop(&self) {
        self.tasks.stop(&self.module_id).await;
    }
}

enum Mode {
    Flows {
        decoder: Box<dyn FlowDecoder>,
        resolver: HostnameResolver,
    },
    Forward,
}

struct TelemetryReceiver {
    socket: UdpSocket,
    sink: Arc<dyn Sink>,
    module_id: String,
    system_id: String,
    location: String,
    mode: Mode,
}

impl TelemetryReceiver {
    async fn run(mut self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };
            match received {
                Ok((n, peer)) => self.handle(&buf[..n], peer).await,
                Err(e) => warn!(module = %self.module_id, error = %e, "Telemetry receive failed"),
            }
        }
    }

    async fn handle(&mut self, datagram: &[u8], peer: SocketAddr) {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let messages = match &mut self.mode {
            Mode::Forward => vec![TelemetryMessage {
                timestamp: now,
                bytes: datagram.to_vec(),
            }],
            Mode::Flows { decoder, resolver } => {
                let flows = match decoder.decode(peer, datagram, now) {
                    Ok(flows) => flows,
                    Err(e) => {
                        warn!(module = %self.module_id, %peer, error = %e, "Dropping datagram");
                        return;
                    }
                };
                let mut messages = Vec::with_capacity(flows.len());
                for mut flow in flows {
                    resolver.enrich(&mut flow).await;
                    messages.push(TelemetryMessage {
                        timestamp: now,
                        bytes: flow.encode_to_vec(),
                    });
                }
                messages
            }
        };
        if messages.is_empty() {
            debug!(module = %self.module_id, %peer, "No flows in datagram");
            return;
        }

        let log = TelemetryMessageLog {
            location: self.location.clone(),
            system_id: self.system_id.clone(),
            source_address: peer.ip().to_string(),
            source_port: u32::from(peer.port()),
            message: messages,
        };
        let message = SinkMessage::new(self.module_id.clone(), log.encode_to_vec());
        if let Err(e) = self.sink.send(message).await {
            warn!(module = %self.module_id, error = %e, "Failed to forward telemetry");
        }
    }
}

//! SNMP trap receiver. Informs are acknowledged before the trap is forwarded.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use minion_api::dto::TrapLogDto;
use minion_api::{ApiError, Identified, MinionConfig, Sink, SinkMessage, SinkModule, ToXml};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SinkError};
use crate::listener::ListenerTasks;

pub const TRAP_MODULE_ID: &str = "Trap";

const MAX_DATAGRAM: usize = 65_535;

/// SNMP trap receiver on the configured trap port.
pub struct TrapModule {
    bind_host: String,
    tasks: ListenerTasks,
    bound: Mutex<Option<SocketAddr>>,
}

impl TrapModule {
    pub fn new() -> Self {
        Self::with_bind_host("0.0.0.0")
    }

    /// Listens on `host` instead of every interface.
    pub fn with_bind_host(host: impl Into<String>) -> Self {
        Self {
            bind_host: host.into(),
            tasks: ListenerTasks::new(),
            bound: Mutex::new(None),
        }
    }

    /// Bound address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }
}

impl Default for TrapModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for TrapModule {
    fn id(&self) -> &str {
        TRAP_MODULE_ID
    }
}

#[async_trait]
impl SinkModule for TrapModule {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> minion_api::Result<()> {
        let address = format!("{}:{}", self.bind_host, config.trap_port);
        let socket = UdpSocket::bind(&address)
            .await
            .map_err(|e| ApiError::listener(TRAP_MODULE_ID, SinkError::bind(&address, e).to_string()))?;
        let local = socket.local_addr()?;
        *self.bound.lock() = Some(local);

        let receiver = TrapReceiver {
            socket,
            sink,
            system_id: config.id.clone(),
            location: config.location.clone(),
        };
        self.tasks.spawn(receiver.run(self.tasks.token()));
        info!(address = %local, "Trap listener started");
        Ok(())
    }

    async fn stop(&self) {
        self.tasks.stop(TRAP_MODULE_ID).await;
    }
}

struct TrapReceiver {
    socket: UdpSocket,
    sink: Arc<dyn Sink>,
    system_id: String,
    location: String,
}

impl TrapReceiver {
    async fn run(self, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.socket.recv_from(&mut buf) => r,
            };
            match received {
                Ok((n, peer)) => {
                    if let Err(e) = self.handle(&buf[..n], peer).await {
                        warn!(%peer, error = %e, "Dropping trap");
                    }
                }
                Err(e) => warn!(error = %e, "Trap receive failed"),
            }
        }
    }

    async fn handle(&self, datagram: &[u8], peer: SocketAddr) -> Result<()> {
        let trap = minion_snmp::decode_trap(datagram, peer.ip(), Utc::now().timestamp_millis())?;

        if let Some(ack) = minion_snmp::inform_ack(datagram)? {
            self.socket.send_to(&ack, peer).await?;
            debug!(%peer, "Acknowledged inform");
        }

        let log = TrapLogDto {
            location: self.location.clone(),
            system_id: self.system_id.clone(),
            trap_address: trap.trap_address,
            messages: vec![trap.dto],
        };
        self.sink
            .send(SinkMessage::new(TRAP_MODULE_ID, log.to_xml_bytes()))
            .await?;
        Ok(())
    }
}

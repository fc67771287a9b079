//! Syslog listener: UDP datagrams and newline-framed TCP on one port.

pub mod parser;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use minion_api::dto::{SyslogMessageDto, SyslogMessageLogDto};
use minion_api::{Identified, MinionConfig, Sink, SinkMessage, SinkModule, ToXml};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SinkError};
use crate::listener::ListenerTasks;

pub use parser::{parse, SyslogRecord, DEFAULT_PRIORITY};

pub const SYSLOG_MODULE_ID: &str = "Syslog";

const MAX_DATAGRAM: usize = 65_535;

/// Wraps records into `syslog-message-log` documents.
struct SyslogPublisher {
    sink: Arc<dyn Sink>,
    system_id: String,
    location: String,
}

impl SyslogPublisher {
    async fn publish(&self, line: &str, source: SocketAddr) {
        let record = parser::parse(line, Utc::now());
        if record.is_keepalive() {
            trace!(%source, "Dropping keep-alive");
            return;
        }
        let log = SyslogMessageLogDto {
            system_id: self.system_id.clone(),
            location: self.location.clone(),
            source_address: source.ip().to_string(),
            source_port: source.port(),
            messages: vec![SyslogMessageDto {
                timestamp: record.timestamp,
                content: record.to_bytes(),
            }],
        };
        if let Err(e) = self
            .sink
            .send(SinkMessage::new(SYSLOG_MODULE_ID, log.to_xml_bytes()))
            .await
        {
            warn!(%source, error = %e, "Failed to forward syslog message");
        }
    }
}

pub struct SyslogModule {
    bind_host: String,
    tasks: ListenerTasks,
    bound: Mutex<Option<(SocketAddr, SocketAddr)>>,
}

impl SyslogModule {
    pub fn new() -> Self {
        Self::with_bind_host("0.0.0.0")
    }

    /// Listens on `host` instead of every interface. Tests bind to loopback.
    pub fn with_bind_host(host: impl Into<String>) -> Self {
        Self {
            bind_host: host.into(),
            tasks: ListenerTasks::new(),
            bound: Mutex::new(None),
        }
    }

    /// Bound UDP and TCP addresses once started.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        *self.bound.lock()
    }

    async fn bind(&self, port: u16) -> Result<(UdpSocket, TcpListener)> {
        let address = format!("{}:{port}", self.bind_host);
        let udp = UdpSocket::bind(&address)
            .await
            .map_err(|e| SinkError::bind(&address, e))?;
        let tcp = TcpListener::bind(&address)
            .await
            .map_err(|e| SinkError::bind(&address, e))?;
        Ok((udp, tcp))
    }
}

impl Default for SyslogModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for SyslogModule {
    fn id(&self) -> &str {
        SYSLOG_MODULE_ID
    }
}

#[async_trait]
impl SinkModule for SyslogModule {
    async fn start(&self, config: &MinionConfig, sink: Arc<dyn Sink>) -> minion_api::Result<()> {
        let (udp, tcp) = self
            .bind(config.syslog_port)
            .await
            .map_err(|e| minion_api::ApiError::listener(SYSLOG_MODULE_ID, e.to_string()))?;
        let addrs = (udp.local_addr()?, tcp.local_addr()?);
        *self.bound.lock() = Some(addrs);

        let publisher = Arc::new(SyslogPublisher {
            sink,
            system_id: config.id.clone(),
            location: config.location.clone(),
        });
        self.tasks.spawn(run_udp(udp, Arc::clone(&publisher), self.tasks.token()));
        self.tasks.spawn(run_tcp(
            tcp,
            publisher,
            self.tasks.token(),
            self.tasks.tracker(),
        ));
        info!(udp = %addrs.0, tcp = %addrs.1, "Syslog listener started");
        Ok(())
    }

    async fn stop(&self) {
        self.tasks.stop(SYSLOG_MODULE_ID).await;
    }
}

async fn run_udp(socket: UdpSocket, publisher: Arc<SyslogPublisher>, cancel: CancellationToken) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            r = socket.recv_from(&mut buf) => r,
        };
        match received {
            Ok((n, source)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                publisher.publish(&text, source).await;
            }
            Err(e) => warn!(error = %e, "Syslog UDP receive failed"),
        }
    }
}

async fn run_tcp(
    listener: TcpListener,
    publisher: Arc<SyslogPublisher>,
    cancel: CancellationToken,
    tracker: tokio_util::task::TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            a = listener.accept() => a,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "Syslog TCP client connected");
                tracker.spawn(read_lines(
                    stream,
                    peer,
                    Arc::clone(&publisher),
                    cancel.clone(),
                ));
            }
            Err(e) => warn!(error = %e, "Syslog TCP accept failed"),
        }
    }
}

async fn read_lines(
    stream: TcpStream,
    peer: SocketAddr,
    publisher: Arc<SyslogPublisher>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            l = lines.next_line() => l,
        };
        match line {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => publisher.publish(&line, peer).await,
            Ok(None) => break,
            Err(e) => {
                debug!(%peer, error = %e, "Syslog TCP client read failed");
                break;
            }
        }
    }
    debug!(%peer, "Syslog TCP client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use minion_api::FromXml;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    async fn started(sink: Arc<RecordingSink>) -> SyslogModule {
        let module = SyslogModule::with_bind_host("127.0.0.1");
        let config = MinionConfig {
            id: "m1".into(),
            location: "Lab".into(),
            syslog_port: 0,
            ..Default::default()
        };
        module.start(&config, sink).await.unwrap();
        module
    }

    #[tokio::test]
    async fn test_udp_message() {
        let sink = RecordingSink::new();
        let module = started(sink.clone()).await;
        let (udp, _) = module.local_addrs().unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"<13>X", udp).await.unwrap();
        client.send_to(b"<34>Mar  9 22:14:15 host su: failed", udp).await.unwrap();

        let message = sink.next().await;
        assert_eq!(message.module_id, SYSLOG_MODULE_ID);
        let log = SyslogMessageLogDto::from_xml_bytes(&message.content).unwrap();
        assert_eq!(log.system_id, "m1");
        assert_eq!(log.location, "Lab");
        assert_eq!(log.source_address, "127.0.0.1");
        assert_eq!(log.source_port, client.local_addr().unwrap().port());
        assert_eq!(
            log.messages[0].content,
            b"<34>Mar  9 22:14:15 host su: failed".to_vec()
        );

        module.stop().await;
    }

    #[tokio::test]
    async fn test_tcp_lines() {
        let sink = RecordingSink::new();
        let module = started(sink.clone()).await;
        let (_, tcp) = module.local_addrs().unwrap();

        let mut client = TcpStream::connect(tcp).await.unwrap();
        client
            .write_all(b"<13>first line\r\n\n<14>second line\n")
            .await
            .unwrap();

        let first = SyslogMessageLogDto::from_xml_bytes(&sink.next().await.content).unwrap();
        let second = SyslogMessageLogDto::from_xml_bytes(&sink.next().await.content).unwrap();
        assert_eq!(first.messages[0].content, b"<13>first line".to_vec());
        assert_eq!(second.messages[0].content, b"<14>second line".to_vec());
        assert!(sink.try_next(Duration::from_millis(50)).await.is_none());

        tokio::time::timeout(Duration::from_secs(2), module.stop())
            .await
            .unwrap();
    }
}

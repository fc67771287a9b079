use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use minion_api::dto::{DetectorRequest, DetectorResponse, PollStatus, PollerRequest};
use minion_api::{ApiError, Identified, ServiceDetector, ServiceMonitor};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use super::{resolve_address, text_matches, with_retries, TCP_DETECTOR, TCP_MONITOR};
use crate::error::{Result, RpcError};

/// Connects to `ip:port`, then, when a banner is expected, reads the first
/// line and matches it. Returns the connect time.
pub(crate) async fn check_tcp(
    ip: IpAddr,
    port: u16,
    banner: Option<&str>,
    timeout: Duration,
) -> Result<Duration> {
    let started = Instant::now();
    let deadline = started + timeout;
    let stream = tokio::time::timeout_at(deadline, TcpStream::connect(SocketAddr::new(ip, port)))
        .await
        .map_err(|_| RpcError::Timeout(timeout))??;
    let connected = started.elapsed();

    let Some(expected) = banner.filter(|b| !b.is_empty() && *b != "*") else {
        return Ok(connected);
    };
    let mut line = String::new();
    tokio::time::timeout_at(deadline, BufReader::new(stream).read_line(&mut line))
        .await
        .map_err(|_| RpcError::Timeout(timeout))??;
    let line = line.trim_end();
    if text_matches(line, expected)? {
        Ok(connected)
    } else {
        Err(RpcError::unexpected(format!("banner '{line}' does not match '{expected}'")))
    }
}

fn port_of(value: Option<&str>) -> Result<u16> {
    let value = value.ok_or_else(|| ApiError::payload("attribute", "missing port"))?;
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::payload("attribute", format!("bad port '{value}'")).into())
}

#[derive(Debug, Default)]
pub struct TcpDetector;

impl Identified for TcpDetector {
    fn id(&self) -> &str {
        TCP_DETECTOR
    }
}

#[async_trait]
impl ServiceDetector for TcpDetector {
    async fn detect(&self, request: &DetectorRequest) -> DetectorResponse {
        let attrs = request.attributes();
        let outcome = async {
            let port = port_of(attrs.get_attribute_value("port"))?;
            let ip = resolve_address(&request.address).await?;
            let banner = attrs.get_attribute_value("banner");
            with_retries(request.retries(), || check_tcp(ip, port, banner, request.timeout())).await
        }
        .await;
        match outcome {
            Ok(_) => DetectorResponse::detected(true),
            // A refused or silent port is "not detected", not an error.
            Err(RpcError::Io(_) | RpcError::Timeout(_) | RpcError::Unexpected(_)) => {
                DetectorResponse::detected(false)
            }
            Err(e) => DetectorResponse::error(e.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct TcpMonitor;

impl Identified for TcpMonitor {
    fn id(&self) -> &str {
        TCP_MONITOR
    }
}

#[async_trait]
impl ServiceMonitor for TcpMonitor {
    async fn poll(&self, request: &PollerRequest) -> PollStatus {
        let port = match port_of(request.get_attribute_value("port")) {
            Ok(port) => port,
            Err(e) => return PollStatus::unknown(e.to_string()),
        };
        let ip = match resolve_address(&request.address).await {
            Ok(ip) => ip,
            Err(e) => return PollStatus::down(e.to_string()),
        };
        let banner = request.get_attribute_value("banner");
        match with_retries(request.retries(), || check_tcp(ip, port, banner, request.timeout())).await
        {
            Ok(elapsed) => PollStatus::up(elapsed),
            Err(e) => {
                debug!(%ip, port, error = %e, "TCP poll failed");
                PollStatus::down(e.to_string())
            }
        }
    }
}

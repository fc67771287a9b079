//! Built-in detectors, monitors and collectors.
//!
//! Each probe is registered under the controller's class name for it, so a
//! Detect, Poller or Collect request naming that class lands here.

pub mod http;
pub mod icmp;
pub mod tcp;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use minion_api::{Registry, ServiceCollector, ServiceDetector, ServiceMonitor};
use regex::Regex;

use crate::error::{Result, RpcError};

pub use http::{HttpCollector, HttpDetector, HttpMonitor};
pub use icmp::{IcmpDetector, IcmpMonitor};
pub use tcp::{TcpDetector, TcpMonitor};

pub const TCP_DETECTOR: &str = "org.opennms.netmgt.provision.detector.simple.TcpDetector";
pub const HTTP_DETECTOR: &str = "org.opennms.netmgt.provision.detector.simple.HttpDetector";
pub const ICMP_DETECTOR: &str = "org.opennms.netmgt.provision.detector.icmp.IcmpDetector";
pub const TCP_MONITOR: &str = "org.opennms.netmgt.poller.monitors.TcpMonitor";
pub const HTTP_MONITOR: &str = "org.opennms.netmgt.poller.monitors.HttpMonitor";
pub const ICMP_MONITOR: &str = "org.opennms.netmgt.poller.monitors.IcmpMonitor";
pub const HTTP_COLLECTOR: &str = "org.opennms.netmgt.collectd.HttpCollector";

/// Accepted status codes when `response` is absent or malformed.
pub const DEFAULT_RESPONSE_RANGE: (u16, u16) = (100, 399);

pub fn register_probes(
    detectors: &Registry<dyn ServiceDetector>,
    monitors: &Registry<dyn ServiceMonitor>,
    collectors: &Registry<dyn ServiceCollector>,
) {
    detectors.register(Arc::new(TcpDetector));
    detectors.register(Arc::new(HttpDetector::new()));
    detectors.register(Arc::new(IcmpDetector));
    monitors.register(Arc::new(TcpMonitor));
    monitors.register(Arc::new(HttpMonitor::new()));
    monitors.register(Arc::new(IcmpMonitor));
    collectors.register(Arc::new(HttpCollector::new()));
}

/// Parses `"lo-hi"` or a single code.
pub fn parse_response_range(value: Option<&str>) -> (u16, u16) {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_RESPONSE_RANGE;
    };
    let parsed = match value.split_once('-') {
        Some((lo, hi)) => lo.trim().parse().ok().zip(hi.trim().parse().ok()),
        None => value.parse().ok().map(|code| (code, code)),
    };
    match parsed {
        Some((lo, hi)) if lo <= hi => (lo, hi),
        _ => DEFAULT_RESPONSE_RANGE,
    }
}

/// `expected` is a substring, or a regular expression when prefixed by `~`.
pub fn text_matches(text: &str, expected: &str) -> Result<bool> {
    match expected.strip_prefix('~') {
        Some(pattern) => Ok(Regex::new(pattern)?.is_match(text)),
        None => Ok(text.contains(expected)),
    }
}

/// Resolves a literal address or host name to its first address.
pub async fn resolve_address(address: &str) -> Result<IpAddr> {
    let address = address.trim();
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((address, 0))
        .await
        .map_err(RpcError::resolve)?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| RpcError::resolve(format!("no address found for {address}")))
}

/// Runs `attempt` up to `retries + 1` times, returning the first success or
/// the last failure.
pub(crate) async fn with_retries<T, F, Fut>(retries: u32, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last = None;
    for _ in 0..=retries {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err(e) => last = Some(e),
        }
    }
    Err(last.unwrap_or(RpcError::Timeout(Duration::ZERO)))
}

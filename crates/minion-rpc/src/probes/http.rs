//! HTTP detector, monitor and collector.
//!
//! Common attributes: `port` (80), `url` (`/`), `response` (accepted status
//! range), `response-text` (substring or `~regex` the body must match) and
//! `timeout`. The collector also takes `pattern`, a regular expression whose
//! named groups become collected attributes.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use minion_api::dto::{
    Attributes, CollectionResource, CollectionSet, CollectionStatus, CollectorRequest,
    CollectorResponse, DetectorRequest, DetectorResponse, PollStatus, PollerRequest,
};
use minion_api::{Identified, ServiceCollector, ServiceDetector, ServiceMonitor};
use regex::Regex;
use tokio::time::Instant;
use tracing::debug;

use super::{
    parse_response_range, resolve_address, text_matches, with_retries, HTTP_COLLECTOR,
    HTTP_DETECTOR, HTTP_MONITOR,
};
use crate::error::{Result, RpcError};

const DEFAULT_PORT: u16 = 80;
const COLLECTION_GROUP: &str = "http";

/// What a probe expects from one HTTP exchange.
#[derive(Debug, Clone)]
pub(crate) struct HttpCheck {
    pub url: String,
    pub range: (u16, u16),
    pub response_text: Option<String>,
}

impl HttpCheck {
    pub fn from_attributes(ip: IpAddr, attrs: &Attributes) -> Self {
        let port = attrs.get_attribute_value_as_int("port", i64::from(DEFAULT_PORT));
        let path = attrs.get_attribute_value_or("url", "/");
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let host = match ip {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        Self {
            url: format!("http://{host}:{port}{path}"),
            range: parse_response_range(attrs.get_attribute_value("response")),
            response_text: attrs
                .get_attribute_value("response-text")
                .filter(|t| !t.is_empty())
                .map(str::to_string),
        }
    }
}

/// Result of one exchange that passed the check.
#[derive(Debug)]
pub(crate) struct HttpOutcome {
    pub status: u16,
    pub elapsed: Duration,
    pub body: String,
}

pub(crate) async fn run_check(
    client: &reqwest::Client,
    check: &HttpCheck,
    timeout: Duration,
) -> Result<HttpOutcome> {
    let started = Instant::now();
    let response = client.get(&check.url).timeout(timeout).send().await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    let elapsed = started.elapsed();
    let (lo, hi) = check.range;
    if status < lo || status > hi {
        return Err(RpcError::unexpected(format!(
            "HTTP status {status} outside {lo}-{hi}"
        )));
    }
    if let Some(expected) = &check.response_text {
        if !text_matches(&body, expected)? {
            return Err(RpcError::unexpected(format!(
                "response body does not match '{expected}'"
            )));
        }
    }
    Ok(HttpOutcome {
        status,
        elapsed,
        body,
    })
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(concat!("minion/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

pub struct HttpDetector {
    client: reqwest::Client,
}

impl HttpDetector {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for HttpDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for HttpDetector {
    fn id(&self) -> &str {
        HTTP_DETECTOR
    }
}

#[async_trait]
impl ServiceDetector for HttpDetector {
    async fn detect(&self, request: &DetectorRequest) -> DetectorResponse {
        let ip = match resolve_address(&request.address).await {
            Ok(ip) => ip,
            Err(e) => return DetectorResponse::error(e.to_string()),
        };
        let check = HttpCheck::from_attributes(ip, &request.attributes());
        let timeout = request.timeout();
        match with_retries(request.retries(), || run_check(&self.client, &check, timeout)).await {
            Ok(_) => DetectorResponse::detected(true),
            Err(RpcError::Pattern(e)) => DetectorResponse::error(e.to_string()),
            Err(e) => {
                debug!(url = %check.url, error = %e, "HTTP service not detected");
                DetectorResponse::detected(false)
            }
        }
    }
}

pub struct HttpMonitor {
    client: reqwest::Client,
}

impl HttpMonitor {
    pub fn new() -> Self {
        Self { client: client() }
    }
}

impl Default for HttpMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for HttpMonitor {
    fn id(&self) -> &str {
        HTTP_MONITOR
    }
}

#[async_trait]
impl ServiceMonitor for HttpMonitor {
    async fn poll(&self, request: &PollerRequest) -> PollStatus {
        let ip = match resolve_address(&request.address).await {
            Ok(ip) => ip,
            Err(e) => return PollStatus::down(e.to_string()),
        };
        let check = HttpCheck::from_attributes(ip, &request.attributes);
        let timeout = request.timeout();
        match with_retries(request.retries(), || run_check(&self.client, &check, timeout)).await {
            Ok(outcome) => PollStatus::up(outcome.elapsed),
            Err(e) => PollStatus::down(e.to_string()),
        }
    }
}

/// Fetches a page and turns the named groups of `pattern` into attributes.
pub struct HttpCollector {
    client: reqwest::Client,
}

impl HttpCollector {
    pub fn new() -> Self {
        Self { client: client() }
    }

    async fn collect_set(&self, request: &CollectorRequest) -> Result<CollectionSet> {
        let ip = resolve_address(&request.address).await?;
        let attrs = &request.attributes;
        let check = HttpCheck::from_attributes(ip, attrs);
        let timeout = Duration::from_millis(
            attrs.get_attribute_value_as_int("timeout", 3000).max(0) as u64,
        );
        let retries = attrs.get_attribute_value_as_int("retry", 0).clamp(0, 100) as u32;
        let outcome = with_retries(retries, || run_check(&self.client, &check, timeout)).await?;

        let mut resource = CollectionResource::node()
            .gauge(
                COLLECTION_GROUP,
                "response-time",
                outcome.elapsed.as_micros() as f64 / 1000.0,
            )
            .gauge(COLLECTION_GROUP, "status-code", f64::from(outcome.status));
        if let Some(pattern) = attrs.get_attribute_value("pattern") {
            let regex = Regex::new(pattern)?;
            if let Some(captures) = regex.captures(&outcome.body) {
                for name in regex.capture_names().flatten() {
                    let Some(m) = captures.name(name) else { continue };
                    let text = m.as_str().trim();
                    resource = match text.replace(',', "").parse::<f64>() {
                        Ok(number) => resource.gauge(COLLECTION_GROUP, name, number),
                        Err(_) => resource.string(COLLECTION_GROUP, name, text),
                    };
                }
            }
        }
        Ok(CollectionSet {
            timestamp: Utc::now(),
            status: CollectionStatus::Succeeded,
            agent_address: request.address.clone(),
            resources: vec![resource],
        })
    }
}

impl Default for HttpCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for HttpCollector {
    fn id(&self) -> &str {
        HTTP_COLLECTOR
    }
}

#[async_trait]
impl ServiceCollector for HttpCollector {
    async fn collect(&self, request: &CollectorRequest) -> CollectorResponse {
        match self.collect_set(request).await {
            Ok(set) => CollectorResponse::success(set),
            Err(e) => CollectorResponse::error(e.to_string()),
        }
    }
}

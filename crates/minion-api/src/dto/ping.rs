//! `ping-request` / `ping-response`.

use std::net::IpAddr;
use std::time::Duration;

use roxmltree::Node;

use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

pub const DEFAULT_PING_TIMEOUT_MS: u64 = 800;
pub const DEFAULT_PACKET_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingRequest {
    pub location: String,
    pub system_id: String,
    pub address: IpAddr,
    pub retries: u32,
    /// Per-attempt timeout in milliseconds.
    pub timeout: u64,
    pub packet_size: usize,
    pub dscp: u8,
    pub allow_fragmentation: bool,
}

impl PingRequest {
    pub fn new(address: IpAddr) -> Self {
        Self {
            location: String::new(),
            system_id: String::new(),
            address,
            retries: 0,
            timeout: DEFAULT_PING_TIMEOUT_MS,
            packet_size: DEFAULT_PACKET_SIZE,
            dscp: 0,
            allow_fragmentation: true,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingResponse {
    /// Round trip time in milliseconds.
    pub rtt: Option<f64>,
    pub error: Option<String>,
}

impl PingResponse {
    pub fn rtt(rtt: Duration) -> Self {
        Self {
            rtt: Some(rtt.as_micros() as f64 / 1000.0),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            rtt: None,
            error: Some(message.into()),
        }
    }
}

impl FromXml for PingRequest {
    const ROOT: &'static str = "ping-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let raw = xml::child_text(node, "address")
            .or_else(|| xml::attr(node, "address").map(str::to_string))
            .ok_or_else(|| ApiError::payload(Self::ROOT, "missing address"))?;
        let address = raw
            .parse::<IpAddr>()
            .map_err(|e| ApiError::payload(Self::ROOT, format!("bad address '{raw}': {e}")))?;
        let mut req = PingRequest::new(address);
        req.location = xml::attr_string(node, "location");
        req.system_id = xml::attr_string(node, "system-id");
        req.retries = xml::attr_parse(node, "retries")?.unwrap_or(0);
        req.timeout = xml::attr_parse(node, "timeout")?.unwrap_or(DEFAULT_PING_TIMEOUT_MS);
        req.packet_size = xml::attr_parse(node, "packet-size")?.unwrap_or(DEFAULT_PACKET_SIZE);
        req.dscp = xml::attr_parse(node, "dscp")?.unwrap_or(0);
        req.allow_fragmentation = xml::attr(node, "allow-fragmentation")
            .map(|v| !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        Ok(req)
    }
}

impl ToXml for PingRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("retries", self.retries)
            .attr("timeout", self.timeout)
            .attr("packet-size", self.packet_size)
            .attr("dscp", self.dscp)
            .attr("allow-fragmentation", self.allow_fragmentation)
            .child(Element::leaf("address", self.address))
    }
}

impl FromXml for PingResponse {
    const ROOT: &'static str = "ping-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let rtt = match xml::child_text(node, "rtt") {
            Some(v) => Some(v.parse::<f64>().map_err(|e| {
                ApiError::payload(Self::ROOT, format!("bad rtt '{v}': {e}"))
            })?),
            None => None,
        };
        Ok(Self {
            rtt,
            error: xml::child_text(node, "error"),
        })
    }
}

impl ToXml for PingResponse {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .child_opt(self.rtt.map(|r| Element::leaf("rtt", r)))
            .child_opt(self.error.as_ref().map(|e| Element::leaf("error", e)))
    }
}

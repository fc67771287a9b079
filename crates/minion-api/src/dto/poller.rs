//! `poller-request` / `poller-response`.
//!
//! The `timeout` attribute of a poller request is in microseconds.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::Node;

use crate::dto::attribute::{AttributeStyle, Attributes};
use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

pub const DEFAULT_POLLER_TIMEOUT_US: i64 = 3_000_000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollerRequest {
    pub location: String,
    pub system_id: String,
    pub class_name: String,
    pub service_name: String,
    pub address: String,
    pub node_id: i64,
    pub node_label: String,
    pub node_location: String,
    pub attributes: Attributes,
}

impl PollerRequest {
    pub fn get_attribute_value(&self, key: &str) -> Option<&str> {
        self.attributes.get_attribute_value(key)
    }

    pub fn get_attribute_value_as_int(&self, key: &str, default: i64) -> i64 {
        self.attributes.get_attribute_value_as_int(key, default)
    }

    /// Timeout from the `timeout` attribute, interpreted as microseconds.
    pub fn timeout(&self) -> Duration {
        let us = self.get_attribute_value_as_int("timeout", DEFAULT_POLLER_TIMEOUT_US);
        Duration::from_micros(us.max(0) as u64)
    }

    pub fn retries(&self) -> u32 {
        self.get_attribute_value_as_int("retry", 0).clamp(0, 100) as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollStatusCode {
    #[default]
    Unknown,
    Up,
    Down,
    Unresponsive,
}

impl PollStatusCode {
    pub fn code(&self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Up => 1,
            Self::Down => 2,
            Self::Unresponsive => 3,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Up,
            2 => Self::Down,
            3 => Self::Unresponsive,
            _ => Self::Unknown,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Unresponsive => "Unresponsive",
        }
    }
}

impl fmt::Display for PollStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus {
    pub code: PollStatusCode,
    pub reason: Option<String>,
    /// Milliseconds.
    pub response_time: Option<f64>,
    pub time: DateTime<Utc>,
    pub properties: Vec<(String, f64)>,
}

impl PollStatus {
    fn with_code(code: PollStatusCode, reason: Option<String>) -> Self {
        Self {
            code,
            reason,
            response_time: None,
            time: Utc::now(),
            properties: Vec::new(),
        }
    }

    pub fn up(response_time: Duration) -> Self {
        let ms = response_time.as_micros() as f64 / 1000.0;
        let mut status = Self::with_code(PollStatusCode::Up, None);
        status.response_time = Some(ms);
        status.properties.push(("response-time".to_string(), ms));
        status
    }

    pub fn down(reason: impl Into<String>) -> Self {
        Self::with_code(PollStatusCode::Down, Some(reason.into()))
    }

    pub fn unresponsive(reason: impl Into<String>) -> Self {
        Self::with_code(PollStatusCode::Unresponsive, Some(reason.into()))
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self::with_code(PollStatusCode::Unknown, Some(reason.into()))
    }

    pub fn is_up(&self) -> bool {
        self.code == PollStatusCode::Up
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerResponse {
    pub status: PollStatus,
}

impl FromXml for PollerRequest {
    const ROOT: &'static str = "poller-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            class_name: xml::attr_string(node, "class-name"),
            service_name: xml::attr_string(node, "service-name"),
            address: xml::attr_string(node, "address"),
            node_id: xml::attr_parse(node, "node-id")?.unwrap_or_default(),
            node_label: xml::attr_string(node, "node-label"),
            node_location: xml::attr_string(node, "node-location"),
            attributes: Attributes::from_children(node, "attribute"),
        })
    }
}

impl ToXml for PollerRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("class-name", &self.class_name)
            .attr("service-name", &self.service_name)
            .attr("address", &self.address)
            .attr("node-id", self.node_id)
            .attr("node-label", &self.node_label)
            .attr("node-location", &self.node_location)
            .children(
                self.attributes
                    .to_elements("attribute", AttributeStyle::ValueAttr),
            )
    }
}

impl FromXml for PollerResponse {
    const ROOT: &'static str = "poller-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let status = xml::child(node, "poll-status")
            .ok_or_else(|| ApiError::payload(Self::ROOT, "missing poll-status"))?;
        let time = match xml::attr(status, "time") {
            Some(t) => DateTime::parse_from_rfc3339(t)
                .map_err(|e| ApiError::payload(Self::ROOT, format!("bad time '{t}': {e}")))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let mut properties = Vec::new();
        if let Some(props) = xml::child(status, "properties") {
            for p in xml::children(props, "property") {
                let value = xml::text(p).trim().parse::<f64>().map_err(|e| {
                    ApiError::payload(Self::ROOT, format!("bad property value: {e}"))
                })?;
                properties.push((xml::attr_string(p, "key"), value));
            }
        }
        Ok(Self {
            status: PollStatus {
                code: PollStatusCode::from_code(xml::attr_parse(status, "code")?.unwrap_or(0)),
                reason: xml::attr(status, "reason").map(str::to_string),
                response_time: xml::attr_parse(status, "response-time")?,
                time,
                properties,
            },
        })
    }
}

impl ToXml for PollerResponse {
    fn to_element(&self) -> Element {
        let s = &self.status;
        let props = (!s.properties.is_empty()).then(|| {
            Element::new("properties").children(
                s.properties
                    .iter()
                    .map(|(k, v)| Element::new("property").attr("key", k).text(v.to_string())),
            )
        });
        Element::new(Self::ROOT).child(
            Element::new("poll-status")
                .attr("time", s.time.to_rfc3339_opts(SecondsFormat::Millis, true))
                .attr_opt("reason", s.reason.as_ref())
                .attr_opt("response-time", s.response_time)
                .attr("code", s.code.code())
                .attr("name", s.code.name())
                .child_opt(props),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_microseconds() {
        let req = PollerRequest::from_xml(
            r#"<poller-request location="L" system-id="S" class-name="x" service-name="HTTP" address="10.0.0.1" node-id="42" node-label="n" node-location="L">
                 <attribute key="Timeout" value="500"/>
               </poller-request>"#,
        )
        .unwrap();
        assert_eq!(req.node_id, 42);
        assert_eq!(req.get_attribute_value_as_int("timeout", 0), 500);
        assert_eq!(req.timeout(), Duration::from_micros(500));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = PollerResponse {
            status: PollStatus::up(Duration::from_millis(12)),
        };
        let xml = resp.to_xml();
        assert!(xml.contains(r#"code="1" name="Up""#));
        assert!(xml.contains(r#"<property key="response-time">12</property>"#));
        let parsed = PollerResponse::from_xml(&xml).unwrap();
        assert!(parsed.status.is_up());
        assert_eq!(parsed.status.response_time, Some(12.0));
    }

    #[test]
    fn test_down_status() {
        let resp = PollerResponse {
            status: PollStatus::down("connection refused"),
        };
        let parsed = PollerResponse::from_xml(&resp.to_xml()).unwrap();
        assert_eq!(parsed.status.code, PollStatusCode::Down);
        assert_eq!(parsed.status.reason.as_deref(), Some("connection refused"));
    }
}

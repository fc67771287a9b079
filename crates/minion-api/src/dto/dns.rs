//! `dns-lookup-request` / `dns-lookup-response`.

use std::fmt;

use roxmltree::Node;

use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryType {
    #[default]
    Lookup,
    ReverseLookup,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lookup => "LOOKUP",
            Self::ReverseLookup => "REVERSE_LOOKUP",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsLookupRequest {
    pub location: String,
    pub system_id: String,
    pub host_request: String,
    pub query_type: QueryType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsLookupResponse {
    pub host_response: Option<String>,
    pub failure_message: Option<String>,
}

impl DnsLookupResponse {
    pub fn success(host: impl Into<String>) -> Self {
        Self {
            host_response: Some(host.into()),
            failure_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            host_response: None,
            failure_message: Some(message.into()),
        }
    }
}

impl FromXml for DnsLookupRequest {
    const ROOT: &'static str = "dns-lookup-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let query_type = match xml::attr(node, "query-type").unwrap_or("LOOKUP") {
            "LOOKUP" => QueryType::Lookup,
            "REVERSE_LOOKUP" => QueryType::ReverseLookup,
            other => {
                return Err(ApiError::payload(
                    Self::ROOT,
                    format!("unknown query-type '{other}'"),
                ))
            }
        };
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            host_request: xml::attr_string(node, "host-request"),
            query_type,
        })
    }
}

impl ToXml for DnsLookupRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("host-request", &self.host_request)
            .attr("query-type", self.query_type)
    }
}

impl FromXml for DnsLookupResponse {
    const ROOT: &'static str = "dns-lookup-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            host_response: xml::attr(node, "host-response").map(str::to_string),
            failure_message: xml::attr(node, "failure-message").map(str::to_string),
        })
    }
}

impl ToXml for DnsLookupResponse {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr_opt("host-response", self.host_response.as_ref())
            .attr_opt("failure-message", self.failure_message.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reverse_lookup() {
        let req = DnsLookupRequest::from_xml(
            r#"<dns-lookup-request location="Remote" system-id="m1" host-request="10.0.0.1" query-type="REVERSE_LOOKUP"/>"#,
        )
        .unwrap();
        assert_eq!(req.query_type, QueryType::ReverseLookup);
        assert_eq!(req.host_request, "10.0.0.1");
        assert_eq!(req.system_id, "m1");
    }

    #[test]
    fn test_unknown_query_type() {
        let res = DnsLookupRequest::from_xml(
            r#"<dns-lookup-request host-request="x" query-type="MX"/>"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_response_xml() {
        assert_eq!(
            DnsLookupResponse::success("10.0.0.1").to_xml(),
            r#"<dns-lookup-response host-response="10.0.0.1"/>"#
        );
        assert_eq!(
            DnsLookupResponse::failure("no such host").to_xml(),
            r#"<dns-lookup-response failure-message="no such host"/>"#
        );
    }
}

//! `snmp-request` / `snmp-response` and the SNMP value encoding shared with
//! trap messages.
//!
//! Values travel as base64 of their byte form. Integer-like types use the
//! minimal two's-complement big-integer form: leading zero bytes are stripped
//! and a `0x00` is prepended when the first remaining byte has its top bit set.

use std::net::Ipv4Addr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use roxmltree::Node;

use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

pub const TYPE_INTEGER: u8 = 2;
pub const TYPE_OCTET_STRING: u8 = 4;
pub const TYPE_NULL: u8 = 5;
pub const TYPE_OBJECT_IDENTIFIER: u8 = 6;
pub const TYPE_IPADDRESS: u8 = 64;
pub const TYPE_COUNTER32: u8 = 65;
pub const TYPE_GAUGE32: u8 = 66;
pub const TYPE_TIMETICKS: u8 = 67;
pub const TYPE_OPAQUE: u8 = 68;
pub const TYPE_COUNTER64: u8 = 70;
pub const TYPE_NO_SUCH_OBJECT: u8 = 128;
pub const TYPE_NO_SUCH_INSTANCE: u8 = 129;
pub const TYPE_END_OF_MIB: u8 = 130;

/// Encodes an unsigned value in big-integer form.
pub fn encode_bigint_unsigned(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[first] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[first..]);
    out
}

/// Encodes a signed value in minimal two's-complement form.
pub fn encode_bigint_signed(value: i64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Decodes a two's-complement big-integer byte sequence.
pub fn decode_bigint(bytes: &[u8]) -> i128 {
    if bytes.is_empty() {
        return 0;
    }
    let mut value: i128 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for b in bytes.iter().take(16) {
        value = (value << 8) | i128::from(*b);
    }
    value
}

/// A typed SNMP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpValue {
    pub type_code: u8,
    pub bytes: Vec<u8>,
}

impl SnmpValue {
    pub fn new(type_code: u8, bytes: Vec<u8>) -> Self {
        Self { type_code, bytes }
    }

    pub fn integer(value: i32) -> Self {
        Self::new(TYPE_INTEGER, encode_bigint_signed(i64::from(value)))
    }

    pub fn unsigned(type_code: u8, value: u64) -> Self {
        Self::new(type_code, encode_bigint_unsigned(value))
    }

    pub fn octet_string(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(TYPE_OCTET_STRING, bytes.into())
    }

    /// Object identifiers are carried as their dotted text form.
    pub fn oid(oid: &str) -> Self {
        Self::new(TYPE_OBJECT_IDENTIFIER, oid.as_bytes().to_vec())
    }

    pub fn ip_address(addr: Ipv4Addr) -> Self {
        Self::new(TYPE_IPADDRESS, addr.octets().to_vec())
    }

    pub fn null(type_code: u8) -> Self {
        Self::new(type_code, Vec::new())
    }

    pub fn is_end_of_view(&self) -> bool {
        matches!(
            self.type_code,
            TYPE_END_OF_MIB | TYPE_NO_SUCH_OBJECT | TYPE_NO_SUCH_INSTANCE
        )
    }

    /// Numeric interpretation for integer-like types.
    pub fn as_i128(&self) -> Option<i128> {
        match self.type_code {
            TYPE_INTEGER | TYPE_COUNTER32 | TYPE_GAUGE32 | TYPE_TIMETICKS | TYPE_COUNTER64 => {
                Some(decode_bigint(&self.bytes))
            }
            _ => None,
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    fn to_element(&self) -> Element {
        Element::new("value")
            .attr("type", self.type_code)
            .text(self.to_base64())
    }

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let type_code = xml::attr_parse(node, "type")?.unwrap_or(TYPE_NULL);
        let bytes = STANDARD
            .decode(xml::text(node).trim())
            .map_err(|e| ApiError::payload("value", format!("bad base64: {e}")))?;
        Ok(Self { type_code, bytes })
    }
}

/// One varbind split into its base OID and instance suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpResult {
    pub base: String,
    pub instance: String,
    pub value: SnmpValue,
}

impl SnmpResult {
    pub fn new(base: impl Into<String>, instance: impl Into<String>, value: SnmpValue) -> Self {
        Self {
            base: base.into(),
            instance: instance.into(),
            value,
        }
    }

    pub fn to_element(&self) -> Element {
        Element::new("result")
            .child(Element::leaf("base", &self.base))
            .child(Element::leaf("instance", &self.instance))
            .child(self.value.to_element())
    }

    pub fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let value = match xml::child(node, "value") {
            Some(v) => SnmpValue::from_node(v)?,
            None => SnmpValue::null(TYPE_NULL),
        };
        Ok(Self {
            base: xml::child_text(node, "base").unwrap_or_default(),
            instance: xml::child_text(node, "instance").unwrap_or_default(),
            value,
        })
    }
}

/// SNMP protocol version of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
    V3,
}

impl SnmpVersion {
    /// Version number as used in agent configs (1, 2, 3).
    pub fn from_config(value: i64) -> Self {
        match value {
            1 => Self::V1,
            3 => Self::V3,
            _ => Self::V2c,
        }
    }

    pub fn config_value(&self) -> i64 {
        match self {
            Self::V1 => 1,
            Self::V2c => 2,
            Self::V3 => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2c => "v2c",
            Self::V3 => "v3",
        }
    }
}

/// Agent connection settings from the `<agent>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnmpAgentConfig {
    pub address: String,
    pub port: u16,
    /// Milliseconds.
    pub timeout: u64,
    pub retries: u32,
    pub max_repetitions: u32,
    pub max_vars_per_pdu: u32,
    pub version: SnmpVersion,
    pub read_community: String,
}

impl Default for SnmpAgentConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 161,
            timeout: 3000,
            retries: 1,
            max_repetitions: 2,
            max_vars_per_pdu: 10,
            version: SnmpVersion::V2c,
            read_community: "public".to_string(),
        }
    }
}

impl SnmpAgentConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    // Accepts both the kebab-case and camelCase element names.
    fn field(node: Node<'_, '_>, names: &[&str]) -> Option<String> {
        names.iter().find_map(|n| xml::child_text(node, n))
    }

    fn parse_field<T: std::str::FromStr>(node: Node<'_, '_>, names: &[&str]) -> Result<Option<T>> {
        match Self::field(node, names) {
            None => Ok(None),
            Some(v) => v.parse::<T>().map(Some).map_err(|_| {
                ApiError::payload("agent", format!("{} '{v}' is not a number", names[0]))
            }),
        }
    }

    pub fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            address: Self::field(node, &["address"]).unwrap_or(d.address),
            port: Self::parse_field(node, &["port"])?.unwrap_or(d.port),
            timeout: Self::parse_field(node, &["timeout"])?.unwrap_or(d.timeout),
            retries: Self::parse_field(node, &["retries"])?.unwrap_or(d.retries),
            max_repetitions: Self::parse_field(node, &["max-repetitions", "maxRepetitions"])?
                .unwrap_or(d.max_repetitions),
            max_vars_per_pdu: Self::parse_field(node, &["max-vars-per-pdu", "maxVarsPerPdu"])?
                .unwrap_or(d.max_vars_per_pdu),
            version: Self::parse_field::<i64>(node, &["version"])?
                .map(SnmpVersion::from_config)
                .unwrap_or(d.version),
            read_community: Self::field(node, &["read-community", "readCommunity"])
                .unwrap_or(d.read_community),
        })
    }

    pub fn to_element(&self) -> Element {
        Element::new("agent")
            .child(Element::leaf("address", &self.address))
            .child(Element::leaf("port", self.port))
            .child(Element::leaf("timeout", self.timeout))
            .child(Element::leaf("retries", self.retries))
            .child(Element::leaf("max-repetitions", self.max_repetitions))
            .child(Element::leaf("max-vars-per-pdu", self.max_vars_per_pdu))
            .child(Element::leaf("version", self.version.config_value()))
            .child(Element::leaf("read-community", &self.read_community))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpWalkRequest {
    pub correlation_id: String,
    pub max_repetitions: Option<u32>,
    pub instance: Option<String>,
    pub oids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpGetRequest {
    pub correlation_id: String,
    pub oids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpRequest {
    pub location: String,
    pub system_id: String,
    pub description: String,
    pub agent: SnmpAgentConfig,
    pub walks: Vec<SnmpWalkRequest>,
    pub gets: Vec<SnmpGetRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpMultiResponse {
    pub correlation_id: String,
    pub results: Vec<SnmpResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpResponse {
    pub responses: Vec<SnmpMultiResponse>,
    pub error: Option<String>,
}

fn oid_list(node: Node<'_, '_>) -> Vec<String> {
    xml::children(node, "oid")
        .map(|o| xml::text(o).trim().to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

impl FromXml for SnmpRequest {
    const ROOT: &'static str = "snmp-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let agent = match xml::child(node, "agent") {
            Some(a) => SnmpAgentConfig::from_node(a)?,
            None => return Err(ApiError::payload(Self::ROOT, "missing agent")),
        };
        let walks = xml::children(node, "walk")
            .map(|w| -> Result<SnmpWalkRequest> {
                Ok(SnmpWalkRequest {
                    correlation_id: xml::attr_string(w, "correlation-id"),
                    max_repetitions: xml::attr_parse(w, "max-repetitions")?,
                    instance: xml::attr(w, "instance").map(str::to_string),
                    oids: oid_list(w),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let gets = xml::children(node, "get")
            .map(|g| SnmpGetRequest {
                correlation_id: xml::attr_string(g, "correlation-id"),
                oids: oid_list(g),
            })
            .collect();
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            description: xml::attr_string(node, "description"),
            agent,
            walks,
            gets,
        })
    }
}

impl ToXml for SnmpRequest {
    fn to_element(&self) -> Element {
        let walks = self.walks.iter().map(|w| {
            Element::new("walk")
                .attr("correlation-id", &w.correlation_id)
                .attr_opt("max-repetitions", w.max_repetitions)
                .attr_opt("instance", w.instance.as_ref())
                .children(w.oids.iter().map(|o| Element::leaf("oid", o)))
        });
        let gets = self.gets.iter().map(|g| {
            Element::new("get")
                .attr("correlation-id", &g.correlation_id)
                .children(g.oids.iter().map(|o| Element::leaf("oid", o)))
        });
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("description", &self.description)
            .child(self.agent.to_element())
            .children(walks)
            .children(gets)
    }
}

impl FromXml for SnmpResponse {
    const ROOT: &'static str = "snmp-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let responses = xml::children(node, "response")
            .map(|r| -> Result<SnmpMultiResponse> {
                Ok(SnmpMultiResponse {
                    correlation_id: xml::attr_string(r, "correlation-id"),
                    results: xml::children(r, "result")
                        .map(SnmpResult::from_node)
                        .collect::<Result<Vec<_>>>()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            responses,
            error: xml::attr(node, "error").map(str::to_string),
        })
    }
}

impl ToXml for SnmpResponse {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr_opt("error", self.error.as_ref())
            .children(self.responses.iter().map(|r| {
                Element::new("response")
                    .attr("correlation-id", &r.correlation_id)
                    .children(r.results.iter().map(SnmpResult::to_element))
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_bigint_unsigned_roundtrip() {
        let samples = [
            0u32,
            1,
            0x7f,
            0x80,
            0xff,
            0x100,
            0x7fff,
            0x8000,
            0x00ff_ffff,
            0x7fff_ffff,
            0x8000_0000,
            u32::MAX,
        ];
        for v in samples {
            let encoded = encode_bigint_unsigned(u64::from(v));
            assert_eq!(decode_bigint(&encoded), i128::from(v), "value {v}");
            assert!(
                encoded[0] & 0x80 == 0,
                "top bit of leading byte set for {v}: {encoded:?}"
            );
            if encoded.len() > 1 && encoded[0] == 0 {
                assert!(encoded[1] & 0x80 != 0, "redundant zero for {v}");
            }
        }
        // Stride through the whole range.
        let mut v: u64 = 0;
        while v <= u64::from(u32::MAX) {
            let encoded = encode_bigint_unsigned(v);
            assert_eq!(decode_bigint(&encoded), i128::from(v));
            v += 65_537;
        }
    }

    #[test]
    fn test_bigint_known_forms() {
        assert_eq!(encode_bigint_unsigned(0), vec![0x00]);
        assert_eq!(encode_bigint_unsigned(127), vec![0x7f]);
        assert_eq!(encode_bigint_unsigned(128), vec![0x00, 0x80]);
        assert_eq!(encode_bigint_unsigned(256), vec![0x01, 0x00]);
        assert_eq!(encode_bigint_signed(-1), vec![0xff]);
        assert_eq!(encode_bigint_signed(-129), vec![0xff, 0x7f]);
        assert_eq!(encode_bigint_signed(128), vec![0x00, 0x80]);
        assert_eq!(decode_bigint(&[0xff, 0x7f]), -129);
    }

    #[test]
    fn test_value_base64() {
        assert_eq!(SnmpValue::unsigned(TYPE_COUNTER32, 128).to_base64(), "AIA=");
        assert_eq!(SnmpValue::octet_string("abc").to_base64(), "YWJj");
        assert_eq!(SnmpValue::integer(-1).as_i128(), Some(-1));
        assert_eq!(SnmpValue::octet_string("x").as_i128(), None);
    }

    #[test]
    fn test_parse_request() {
        let req = SnmpRequest::from_xml(
            r#"<snmp-request location="L" system-id="S" description="sys">
                 <agent><address>10.0.0.5</address><port>1161</port><version>1</version><readCommunity>priv</readCommunity></agent>
                 <walk correlation-id="w1" max-repetitions="5"><oid>.1.3.6.1.2.1.2</oid></walk>
                 <get correlation-id="g1"><oid>.1.3.6.1.2.1.1.1.0</oid><oid>.1.3.6.1.2.1.1.5.0</oid></get>
               </snmp-request>"#,
        )
        .unwrap();
        assert_eq!(req.agent.address, "10.0.0.5");
        assert_eq!(req.agent.port, 1161);
        assert_eq!(req.agent.version, SnmpVersion::V1);
        assert_eq!(req.agent.read_community, "priv");
        assert_eq!(req.agent.timeout, 3000);
        assert_eq!(req.walks.len(), 1);
        assert_eq!(req.walks[0].max_repetitions, Some(5));
        assert_eq!(req.gets[0].oids.len(), 2);
    }

    #[test]
    fn test_response_xml() {
        let resp = SnmpResponse {
            responses: vec![SnmpMultiResponse {
                correlation_id: "g1".into(),
                results: vec![SnmpResult::new(
                    ".1.3.6.1.2.1.1.5",
                    ".0",
                    SnmpValue::octet_string("abc"),
                )],
            }],
            error: None,
        };
        let xml = resp.to_xml();
        assert_eq!(
            xml,
            r#"<snmp-response><response correlation-id="g1"><result><base>.1.3.6.1.2.1.1.5</base><instance>.0</instance><value type="4">YWJj</value></result></response></snmp-response>"#
        );
        assert_eq!(SnmpResponse::from_xml(&xml).unwrap(), resp);
    }
}

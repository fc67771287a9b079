//! `trap-message-log`, the sink payload of the SNMP trap listener.

use roxmltree::Node;

use crate::dto::snmp::SnmpResult;
use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

/// `snmpTraps`, parent of the six generic trap OIDs.
pub const SNMP_TRAPS_OID: &str = ".1.3.6.1.6.3.1.1.5";
/// Generic trap type of enterprise-specific traps.
pub const ENTERPRISE_SPECIFIC: i32 = 6;

/// Adds the leading dot used for OIDs on the wire.
pub fn normalize_oid(oid: &str) -> String {
    let oid = oid.trim();
    if oid.starts_with('.') {
        oid.to_string()
    } else {
        format!(".{oid}")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapIdentity {
    pub enterprise_id: String,
    pub generic: i32,
    pub specific: i32,
}

impl TrapIdentity {
    pub fn new(enterprise_id: impl Into<String>, generic: i32, specific: i32) -> Self {
        Self {
            enterprise_id: enterprise_id.into(),
            generic,
            specific,
        }
    }

    /// Derives the v1 identity of a v2c `snmpTrapOID` value.
    ///
    /// The standard traps `snmpTraps.N` map to generic `N - 1`; anything else
    /// is enterprise specific with the last sub-id as the specific type and
    /// the OID without its last two sub-ids as the enterprise.
    pub fn from_trap_oid(oid: &str) -> Self {
        let oid = normalize_oid(oid);
        let parts: Vec<&str> = oid.trim_start_matches('.').split('.').collect();

        if let Some(rest) = oid.strip_prefix(SNMP_TRAPS_OID) {
            if let Some(n) = rest.strip_prefix('.').and_then(|n| n.parse::<i32>().ok()) {
                if (1..=6).contains(&n) {
                    return Self::new(SNMP_TRAPS_OID, n - 1, 0);
                }
            }
        }

        let specific = parts
            .last()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or_default();
        let keep = parts.len().saturating_sub(2);
        let enterprise = format!(".{}", parts[..keep].join("."));
        Self::new(enterprise, ENTERPRISE_SPECIFIC, specific)
    }

    fn to_element(&self) -> Element {
        Element::new("trap-identity")
            .attr("enterprise-id", &self.enterprise_id)
            .attr("generic", self.generic)
            .attr("specific", self.specific)
    }
}

/// One received trap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapDto {
    pub agent_address: String,
    pub community: String,
    /// `v1` or `v2c`.
    pub version: String,
    /// sysUpTime of the agent in hundredths of a second.
    pub timestamp: u64,
    pub pdu_length: usize,
    /// Reception time, epoch milliseconds.
    pub creation_time: i64,
    pub trap_identity: TrapIdentity,
    pub results: Vec<SnmpResult>,
}

impl TrapDto {
    fn to_element(&self) -> Element {
        Element::new("messages")
            .child(Element::leaf("agent-address", &self.agent_address))
            .child(Element::leaf("community", &self.community))
            .child(Element::leaf("version", &self.version))
            .child(Element::leaf("timestamp", self.timestamp))
            .child(Element::leaf("pdu-length", self.pdu_length))
            .child(Element::leaf("creation-time", self.creation_time))
            .child(self.trap_identity.to_element())
            .child(
                Element::new("results")
                    .children(self.results.iter().map(SnmpResult::to_element)),
            )
    }

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let number = |name: &str| -> Result<Option<i64>> {
            xml::child_text(node, name)
                .map(|v| {
                    v.parse::<i64>().map_err(|e| {
                        ApiError::payload("trap-message-log", format!("bad {name}: {e}"))
                    })
                })
                .transpose()
        };
        let identity = xml::child(node, "trap-identity")
            .map(|i| -> Result<TrapIdentity> {
                Ok(TrapIdentity {
                    enterprise_id: xml::attr_string(i, "enterprise-id"),
                    generic: xml::attr_parse(i, "generic")?.unwrap_or_default(),
                    specific: xml::attr_parse(i, "specific")?.unwrap_or_default(),
                })
            })
            .transpose()?
            .unwrap_or_default();
        let results = match xml::child(node, "results") {
            Some(r) => xml::children(r, "result")
                .map(SnmpResult::from_node)
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        Ok(Self {
            agent_address: xml::child_text(node, "agent-address").unwrap_or_default(),
            community: xml::child_text(node, "community").unwrap_or_default(),
            version: xml::child_text(node, "version").unwrap_or_default(),
            timestamp: number("timestamp")?.unwrap_or_default().max(0) as u64,
            pdu_length: number("pdu-length")?.unwrap_or_default().max(0) as usize,
            creation_time: number("creation-time")?.unwrap_or_default(),
            trap_identity: identity,
            results,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrapLogDto {
    pub location: String,
    pub system_id: String,
    pub trap_address: String,
    pub messages: Vec<TrapDto>,
}

impl ToXml for TrapLogDto {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("trap-address", &self.trap_address)
            .children(self.messages.iter().map(TrapDto::to_element))
    }
}

impl FromXml for TrapLogDto {
    const ROOT: &'static str = "trap-message-log";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            trap_address: xml::attr_string(node, "trap-address"),
            messages: xml::children(node, "messages")
                .map(TrapDto::from_node)
                .collect::<Result<Vec<_>>>()?,
        })
    }
}

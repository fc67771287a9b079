//! `minion` identity document sent by the heartbeat.

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::Node;

use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinionIdentityDto {
    pub id: String,
    pub location: String,
    pub timestamp: DateTime<Utc>,
}

impl MinionIdentityDto {
    pub fn now(id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            location: location.into(),
            timestamp: Utc::now(),
        }
    }
}

impl ToXml for MinionIdentityDto {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .child(Element::leaf("id", &self.id))
            .child(Element::leaf("location", &self.location))
            .child(Element::leaf(
                "timestamp",
                self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ))
    }
}

impl FromXml for MinionIdentityDto {
    const ROOT: &'static str = "minion";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let raw = xml::child_text(node, "timestamp")
            .ok_or_else(|| ApiError::payload(Self::ROOT, "missing timestamp"))?;
        let timestamp = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| ApiError::payload(Self::ROOT, format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(Self {
            id: xml::child_text(node, "id").unwrap_or_default(),
            location: xml::child_text(node, "location").unwrap_or_default(),
            timestamp,
        })
    }
}

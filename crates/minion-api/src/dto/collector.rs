//! `collector-request` / `collector-response`.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use roxmltree::Node;

use crate::dto::attribute::{AttributeStyle, Attributes};
use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorRequest {
    pub location: String,
    pub system_id: String,
    pub class_name: String,
    pub address: String,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Succeeded,
    Failed,
}

impl fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => f.write_str("SUCCEEDED"),
            Self::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    Gauge,
    Counter,
}

impl NumericType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Gauge => "gauge",
            Self::Counter => "counter",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericAttribute {
    pub group: String,
    pub name: String,
    pub kind: NumericType,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringAttribute {
    pub group: String,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionResource {
    pub resource_type: String,
    pub instance: String,
    pub numeric: Vec<NumericAttribute>,
    pub strings: Vec<StringAttribute>,
}

impl CollectionResource {
    /// The node-level resource.
    pub fn node() -> Self {
        Self {
            resource_type: "node".to_string(),
            instance: String::new(),
            numeric: Vec::new(),
            strings: Vec::new(),
        }
    }

    pub fn gauge(mut self, group: &str, name: &str, value: f64) -> Self {
        self.numeric.push(NumericAttribute {
            group: group.to_string(),
            name: name.to_string(),
            kind: NumericType::Gauge,
            value,
        });
        self
    }

    pub fn string(mut self, group: &str, name: &str, value: impl Into<String>) -> Self {
        self.strings.push(StringAttribute {
            group: group.to_string(),
            name: name.to_string(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSet {
    pub timestamp: DateTime<Utc>,
    pub status: CollectionStatus,
    pub agent_address: String,
    pub resources: Vec<CollectionResource>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorResponse {
    pub collection_set: Option<CollectionSet>,
    pub error: Option<String>,
}

impl CollectorResponse {
    pub fn success(set: CollectionSet) -> Self {
        Self {
            collection_set: Some(set),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            collection_set: None,
            error: Some(message.into()),
        }
    }
}

impl FromXml for CollectorRequest {
    const ROOT: &'static str = "collector-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            class_name: xml::attr_string(node, "class-name"),
            address: xml::attr_string(node, "address"),
            attributes: Attributes::from_children(node, "attribute"),
        })
    }
}

impl ToXml for CollectorRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("class-name", &self.class_name)
            .attr("address", &self.address)
            .children(
                self.attributes
                    .to_elements("attribute", AttributeStyle::ValueAttr),
            )
    }
}

impl ToXml for CollectorResponse {
    fn to_element(&self) -> Element {
        let set = self.collection_set.as_ref().map(|set| {
            Element::new("collection-set")
                .attr(
                    "timestamp",
                    set.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                )
                .attr("collection-status", set.status)
                .child(Element::new("agent").attr("address", &set.agent_address))
                .children(set.resources.iter().map(|r| {
                    Element::new("collection-resource")
                        .attr("type", &r.resource_type)
                        .attr("instance", &r.instance)
                        .children(r.numeric.iter().map(|n| {
                            Element::new("numeric-attribute")
                                .attr("group", &n.group)
                                .attr("name", &n.name)
                                .attr("type", n.kind.as_str())
                                .attr("value", n.value)
                        }))
                        .children(r.strings.iter().map(|s| {
                            Element::new("string-attribute")
                                .attr("group", &s.group)
                                .attr("name", &s.name)
                                .attr("value", &s.value)
                        }))
                }))
        });
        Element::new(Self::ROOT)
            .attr_opt("error", self.error.as_ref())
            .child_opt(set)
    }
}

impl FromXml for CollectorResponse {
    const ROOT: &'static str = "collector-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let error = xml::attr(node, "error").map(str::to_string);
        let Some(set) = xml::child(node, "collection-set") else {
            return Ok(Self {
                collection_set: None,
                error,
            });
        };
        let timestamp = match xml::attr(set, "timestamp") {
            Some(t) => DateTime::parse_from_rfc3339(t)
                .map_err(|e| ApiError::payload(Self::ROOT, format!("bad timestamp: {e}")))?
                .with_timezone(&Utc),
            None => Utc::now(),
        };
        let status = match xml::attr(set, "collection-status") {
            Some("FAILED") => CollectionStatus::Failed,
            _ => CollectionStatus::Succeeded,
        };
        let mut resources = Vec::new();
        for r in xml::children(set, "collection-resource") {
            let mut resource = CollectionResource {
                resource_type: xml::attr_string(r, "type"),
                instance: xml::attr_string(r, "instance"),
                numeric: Vec::new(),
                strings: Vec::new(),
            };
            for n in xml::children(r, "numeric-attribute") {
                resource.numeric.push(NumericAttribute {
                    group: xml::attr_string(n, "group"),
                    name: xml::attr_string(n, "name"),
                    kind: match xml::attr(n, "type") {
                        Some("counter") => NumericType::Counter,
                        _ => NumericType::Gauge,
                    },
                    value: xml::attr_parse(n, "value")?.unwrap_or_default(),
                });
            }
            for s in xml::children(r, "string-attribute") {
                resource.strings.push(StringAttribute {
                    group: xml::attr_string(s, "group"),
                    name: xml::attr_string(s, "name"),
                    value: xml::attr_string(s, "value"),
                });
            }
            resources.push(resource);
        }
        Ok(Self {
            collection_set: Some(CollectionSet {
                timestamp,
                status,
                agent_address: xml::child(set, "agent")
                    .map(|a| xml::attr_string(a, "address"))
                    .unwrap_or_default(),
                resources,
            }),
            error,
        })
    }
}

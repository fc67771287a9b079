//! `syslog-message-log`, the sink payload of the syslog listener.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use roxmltree::Node;

use crate::error::{ApiError, Result};
use crate::xml::{self, Element, FromXml, ToXml};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyslogMessageDto {
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Raw message bytes, `<pri>` prefix included.
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyslogMessageLogDto {
    pub system_id: String,
    pub location: String,
    pub source_address: String,
    pub source_port: u16,
    pub messages: Vec<SyslogMessageDto>,
}

impl ToXml for SyslogMessageLogDto {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("system-id", &self.system_id)
            .attr("location", &self.location)
            .attr("source-address", &self.source_address)
            .attr("source-port", self.source_port)
            .children(self.messages.iter().map(|m| {
                Element::new("messages")
                    .attr("timestamp", m.timestamp)
                    .text(STANDARD.encode(&m.content))
            }))
    }
}

impl FromXml for SyslogMessageLogDto {
    const ROOT: &'static str = "syslog-message-log";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        let messages = xml::children(node, "messages")
            .map(|m| -> Result<SyslogMessageDto> {
                let content = STANDARD
                    .decode(xml::text(m).trim())
                    .map_err(|e| ApiError::payload(Self::ROOT, format!("bad base64: {e}")))?;
                Ok(SyslogMessageDto {
                    timestamp: xml::attr_parse(m, "timestamp")?.unwrap_or_default(),
                    content,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            system_id: xml::attr_string(node, "system-id"),
            location: xml::attr_string(node, "location"),
            source_address: xml::attr_string(node, "source-address"),
            source_port: xml::attr_parse(node, "source-port")?.unwrap_or_default(),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_log_xml() {
        let log = SyslogMessageLogDto {
            system_id: "S".into(),
            location: "L".into(),
            source_address: "10.0.0.1".into(),
            source_port: 514,
            messages: vec![SyslogMessageDto {
                timestamp: 1000,
                content: b"<13>hello".to_vec(),
            }],
        };
        let xml = log.to_xml();
        assert_eq!(
            xml,
            r#"<syslog-message-log system-id="S" location="L" source-address="10.0.0.1" source-port="514"><messages timestamp="1000">PDEzPmhlbGxv</messages></syslog-message-log>"#
        );
        assert_eq!(SyslogMessageLogDto::from_xml(&xml).unwrap(), log);
    }
}

//! `detector-request` / `detector-response`.
//!
//! The `timeout` attribute of a detector request is in milliseconds.

use std::time::Duration;

use roxmltree::Node;

use crate::dto::attribute::{AttributeStyle, Attributes};
use crate::error::Result;
use crate::xml::{self, Element, FromXml, ToXml};

pub const DEFAULT_DETECTOR_TIMEOUT_MS: i64 = 2000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorRequest {
    pub location: String,
    pub system_id: String,
    pub class_name: String,
    pub address: String,
    pub detector_attributes: Attributes,
    pub runtime_attributes: Attributes,
}

impl DetectorRequest {
    /// Detector attributes with runtime attributes layered on top.
    pub fn attributes(&self) -> Attributes {
        self.detector_attributes
            .merged_with(&self.runtime_attributes)
    }

    pub fn get_attribute_value(&self, key: &str) -> Option<String> {
        self.attributes()
            .get_attribute_value(key)
            .map(str::to_string)
    }

    pub fn get_attribute_value_as_int(&self, key: &str, default: i64) -> i64 {
        self.attributes().get_attribute_value_as_int(key, default)
    }

    /// Timeout from the `timeout` attribute, interpreted as milliseconds.
    pub fn timeout(&self) -> Duration {
        let ms = self.get_attribute_value_as_int("timeout", DEFAULT_DETECTOR_TIMEOUT_MS);
        Duration::from_millis(ms.max(0) as u64)
    }

    pub fn retries(&self) -> u32 {
        self.get_attribute_value_as_int("retries", 1).clamp(0, 100) as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectorResponse {
    pub detected: bool,
    pub error: Option<String>,
    pub attributes: Attributes,
}

impl DetectorResponse {
    pub fn detected(detected: bool) -> Self {
        Self {
            detected,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            detected: false,
            error: Some(message.into()),
            attributes: Attributes::new(),
        }
    }
}

impl FromXml for DetectorRequest {
    const ROOT: &'static str = "detector-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            location: xml::attr_string(node, "location"),
            system_id: xml::attr_string(node, "system-id"),
            class_name: xml::attr_string(node, "class-name"),
            address: xml::attr_string(node, "address"),
            detector_attributes: Attributes::from_children(node, "detector-attribute"),
            runtime_attributes: Attributes::from_children(node, "runtime-attribute"),
        })
    }
}

impl ToXml for DetectorRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("location", &self.location)
            .attr("system-id", &self.system_id)
            .attr("class-name", &self.class_name)
            .attr("address", &self.address)
            .children(
                self.detector_attributes
                    .to_elements("detector-attribute", AttributeStyle::Content),
            )
            .children(
                self.runtime_attributes
                    .to_elements("runtime-attribute", AttributeStyle::Content),
            )
    }
}

impl FromXml for DetectorResponse {
    const ROOT: &'static str = "detector-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            detected: xml::attr_bool(node, "detected"),
            error: xml::attr(node, "error").map(str::to_string),
            attributes: Attributes::from_children(node, "attribute"),
        })
    }
}

impl ToXml for DetectorResponse {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr_opt("error", self.error.as_ref())
            .attr("detected", self.detected)
            .children(self.attributes.to_elements("attribute", AttributeStyle::Content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_request_and_merge() {
        let req = DetectorRequest::from_xml(
            r#"<detector-request location="L" system-id="S" class-name="org.opennms.netmgt.provision.detector.simple.TcpDetector" address="127.0.0.1">
                 <detector-attribute key="port">80</detector-attribute>
                 <detector-attribute key="Timeout">500</detector-attribute>
                 <runtime-attribute key="PORT">8080</runtime-attribute>
               </detector-request>"#,
        )
        .unwrap();
        assert_eq!(req.address, "127.0.0.1");
        assert_eq!(req.get_attribute_value_as_int("port", 0), 8080);
        assert_eq!(req.timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_default_timeout() {
        let req = DetectorRequest::default();
        assert_eq!(req.timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_response_xml() {
        let mut resp = DetectorResponse::detected(true);
        resp.attributes.push("vendor", "acme");
        assert_eq!(
            resp.to_xml(),
            r#"<detector-response detected="true"><attribute key="vendor">acme</attribute></detector-response>"#
        );
        assert_eq!(
            DetectorResponse::error("no route").to_xml(),
            r#"<detector-response error="no route" detected="false"/>"#
        );
    }
}

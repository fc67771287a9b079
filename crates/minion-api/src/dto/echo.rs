//! `echo-request` / `echo-response`.

use roxmltree::Node;

use crate::error::Result;
use crate::xml::{self, Element, FromXml, ToXml};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoRequest {
    pub id: i64,
    pub message: String,
    /// Delay in milliseconds before answering.
    pub delay: Option<u64>,
    /// Answer with an error instead of the message.
    pub throw: bool,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoResponse {
    pub id: i64,
    pub message: String,
    pub error: Option<String>,
    pub body: Option<String>,
}

impl EchoResponse {
    pub fn from_request(request: &EchoRequest) -> Self {
        Self {
            id: request.id,
            message: request.message.clone(),
            error: None,
            body: request.body.clone(),
        }
    }

    pub fn error(id: i64, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

impl FromXml for EchoRequest {
    const ROOT: &'static str = "echo-request";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            id: xml::attr_parse(node, "id")?.unwrap_or_default(),
            message: xml::attr_string(node, "message"),
            delay: xml::attr_parse(node, "delay")?,
            throw: xml::attr_bool(node, "throw"),
            body: xml::child(node, "body").map(xml::text),
        })
    }
}

impl ToXml for EchoRequest {
    fn to_element(&self) -> Element {
        Element::new(Self::ROOT)
            .attr("id", self.id)
            .attr("message", &self.message)
            .attr_opt("delay", self.delay)
            .attr_opt("throw", self.throw.then_some(true))
            .child_opt(self.body.as_ref().map(|b| Element::leaf("body", b)))
    }
}

impl FromXml for EchoResponse {
    const ROOT: &'static str = "echo-response";

    fn from_node(node: Node<'_, '_>) -> Result<Self> {
        Ok(Self {
            id: xml::attr_parse(node, "id")?.unwrap_or_default(),
            message: xml::attr_string(node, "message"),
            error: xml::attr(node, "error").map(str::to_string),
            body: xml::child(node, "body").map(xml::text),
        })
    }
}

impl ToXml for EchoResponse {
    fn to_element(&self) -> Element {
        let e = Element::new(Self::ROOT).attr("id", self.id);
        let e = if self.message.is_empty() && self.error.is_some() {
            e
        } else {
            e.attr("message", &self.message)
        };
        e.attr_opt("error", self.error.as_ref())
            .child_opt(self.body.as_ref().map(|b| Element::leaf("body", b)))
    }
}

//! Minimal XML support for module payloads.
//!
//! Documents are parsed with `roxmltree` and written with [`Element`], a small
//! builder that emits attributes in insertion order and self-closes empty
//! elements.

use std::fmt::Write;

use roxmltree::{Document, Node};

use crate::error::{ApiError, Result};

/// Types that serialize to an XML element.
pub trait ToXml {
    fn to_element(&self) -> Element;

    fn to_xml(&self) -> String {
        self.to_element().to_string()
    }

    fn to_xml_bytes(&self) -> Vec<u8> {
        self.to_xml().into_bytes()
    }
}

/// Types that decode from the root element of an XML document.
pub trait FromXml: Sized {
    /// Expected root element name.
    const ROOT: &'static str;

    fn from_node(node: Node<'_, '_>) -> Result<Self>;

    fn from_xml(content: &str) -> Result<Self> {
        let doc = Document::parse(content)?;
        let root = doc.root_element();
        if root.tag_name().name() != Self::ROOT {
            return Err(ApiError::payload(
                Self::ROOT,
                format!("unexpected root element <{}>", root.tag_name().name()),
            ));
        }
        Self::from_node(root)
    }

    fn from_xml_bytes(content: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(content)
            .map_err(|e| ApiError::payload(Self::ROOT, format!("invalid UTF-8: {e}")))?;
        Self::from_xml(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Content {
    Element(Element),
    Text(String),
}

/// An XML element under construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Content>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.push((key.into(), value.to_string()));
        self
    }

    /// Adds the attribute only when `value` is present.
    pub fn attr_opt<V: ToString>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.attr(key, v),
            None => self,
        }
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    pub fn child_opt(self, child: Option<Element>) -> Self {
        match child {
            Some(c) => self.child(c),
            None => self,
        }
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children
            .extend(children.into_iter().map(Content::Element));
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.children.push(Content::Text(text));
        }
        self
    }

    /// `<name>text</name>`, a common shape for leaf values.
    pub fn leaf(name: impl Into<String>, text: impl ToString) -> Self {
        Self::new(name).text(text.to_string())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", k, escape(v, true));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Content::Element(e) => e.write_to(out),
                Content::Text(t) => out.push_str(&escape(t, false)),
            }
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        self.write_to(&mut out);
        f.write_str(&out)
    }
}

fn escape(value: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\'' if attribute => out.push_str("&apos;"),
            '\n' if attribute => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    out
}

// Reader helpers over roxmltree nodes.

pub fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name)
}

pub fn attr_string(node: Node<'_, '_>, name: &str) -> String {
    node.attribute(name).unwrap_or_default().to_string()
}

/// Parses a numeric attribute, treating absence as `None` and garbage as an error.
pub fn attr_parse<T: std::str::FromStr>(
    node: Node<'_, '_>,
    name: &str,
) -> Result<Option<T>> {
    match node.attribute(name).map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v.parse::<T>().map(Some).map_err(|_| {
            ApiError::payload(
                node.tag_name().name(),
                format!("attribute {name}='{v}' is not a valid number"),
            )
        }),
    }
}

pub fn attr_bool(node: Node<'_, '_>, name: &str) -> bool {
    node.attribute(name)
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}

pub fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children()
        .find(|c| c.is_element() && c.tag_name().name() == name)
}

pub fn children<'a, 'i: 'a>(
    node: Node<'a, 'i>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

/// Concatenated text content of a node.
pub fn text(node: Node<'_, '_>) -> String {
    node.children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect::<String>()
}

pub fn child_text(node: Node<'_, '_>, name: &str) -> Option<String> {
    child(node, name).map(|c| text(c).trim().to_string())
}

/// Renders the inner content of a node back to XML (used for opaque bodies).
pub fn inner_xml(node: Node<'_, '_>, source: &str) -> String {
    let (Some(first), Some(last)) = (node.first_child(), node.last_child()) else {
        return String::new();
    };
    source[first.range().start..last.range().end].to_string()
}

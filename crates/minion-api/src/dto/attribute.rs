//! Key/value attribute lists carried by probe requests.
//!
//! Keys are matched case-insensitively at query time: the stored key is
//! lowercased and compared against the lowercased query.

use roxmltree::Node;

use crate::xml::{self, Element};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Output shape for an attribute element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeStyle {
    /// `<attribute key="K">V</attribute>`
    Content,
    /// `<attribute key="K" value="V"/>`
    ValueAttr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push(Attribute::new(key, value));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get_attribute_value(&self, key: &str) -> Option<&str> {
        let wanted = key.to_lowercase();
        self.0
            .iter()
            .find(|a| a.key.to_lowercase() == wanted)
            .map(|a| a.value.as_str())
    }

    pub fn get_attribute_value_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get_attribute_value(key).unwrap_or(default)
    }

    pub fn get_attribute_value_as_int(&self, key: &str, default: i64) -> i64 {
        self.get_attribute_value(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_attribute_value_as_bool(&self, key: &str, default: bool) -> bool {
        match self.get_attribute_value(key).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
            _ => default,
        }
    }

    /// Returns a copy where every entry of `overrides` replaces a same-key entry.
    pub fn merged_with(&self, overrides: &Attributes) -> Attributes {
        let mut merged = self.clone();
        for attr in overrides.iter() {
            let wanted = attr.key.to_lowercase();
            match merged.0.iter_mut().find(|a| a.key.to_lowercase() == wanted) {
                Some(existing) => existing.value.clone_from(&attr.value),
                None => merged.0.push(attr.clone()),
            }
        }
        merged
    }

    /// Reads every `<name key="..">` child of `node`.
    pub fn from_children(node: Node<'_, '_>, name: &str) -> Self {
        let attrs = xml::children(node, name)
            .map(|c| {
                let value = c
                    .attribute("value")
                    .map(str::to_string)
                    .unwrap_or_else(|| xml::text(c));
                Attribute::new(xml::attr_string(c, "key"), value)
            })
            .collect();
        Self(attrs)
    }

    pub fn to_elements(&self, name: &str, style: AttributeStyle) -> Vec<Element> {
        self.0
            .iter()
            .map(|a| {
                let e = Element::new(name).attr("key", &a.key);
                match style {
                    AttributeStyle::Content => e.text(a.value.clone()),
                    AttributeStyle::ValueAttr => e.attr("value", &a.value),
                }
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| Attribute::new(k, v)).collect())
    }
}

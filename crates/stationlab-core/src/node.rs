//! Hierarchical persistence nodes.
//!
//! Every persistent entity writes itself into a [`ConfigNode`] (a named node
//! with ordered key/value pairs and ordered child nodes) and reads itself back
//! from one. Values are stored as text; readers either ask for an explicit
//! [`Result`] (`parse_*`) or for the lenient form (`get_*`) that logs the
//! failure and substitutes a zero default.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Errors raised by the strict node accessors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("node {node} has no value '{key}'")]
    Missing { node: String, key: String },

    #[error("node {node}: cannot parse '{key}' from {value:?}")]
    Format {
        node: String,
        key: String,
        value: String,
    },
}

/// A named node of key/value pairs and nested nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    name: String,
    values: Vec<(String, String)>,
    nodes: Vec<ConfigNode>,
}

impl ConfigNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a value. Duplicate keys are kept; readers see the first one.
    pub fn add_value(&mut self, key: &str, value: impl Display) {
        self.values.push((key.to_string(), value.to_string()));
    }

    /// Replace the first value with this key, or append it.
    pub fn set_value(&mut self, key: &str, value: impl Display) {
        let value = value.to_string();
        match self.values.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value,
            None => self.values.push((key.to_string(), value)),
        }
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_value(&self, key: &str) -> bool {
        self.value(key).is_some()
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn add_node(&mut self, node: ConfigNode) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[ConfigNode] {
        &self.nodes
    }

    /// All child nodes with the given name, in insertion order.
    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ConfigNode> {
        self.nodes.iter().filter(move |n| n.name == name)
    }

    /// The first child node with the given name.
    pub fn node(&self, name: &str) -> Option<&ConfigNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    // -- Strict accessors --

    /// Parse a value, distinguishing missing keys from malformed text.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<T, NodeError> {
        let raw = self.value(key).ok_or_else(|| NodeError::Missing {
            node: self.name.clone(),
            key: key.to_string(),
        })?;
        raw.trim().parse().map_err(|_| NodeError::Format {
            node: self.name.clone(),
            key: key.to_string(),
            value: raw.to_string(),
        })
    }

    // -- Lenient accessors --

    /// Read a number, falling back to zero when missing or malformed.
    pub fn get_f64(&self, key: &str) -> f64 {
        self.lenient(key, 0.0)
    }

    pub fn get_usize(&self, key: &str) -> usize {
        self.lenient(key, 0)
    }

    pub fn get_u32(&self, key: &str) -> u32 {
        self.lenient(key, 0)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.lenient(key, false)
    }

    /// Read a string value, empty when missing.
    pub fn get_str(&self, key: &str) -> &str {
        self.value(key).unwrap_or("")
    }

    fn lenient<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.parse(key) {
            Ok(v) => v,
            Err(NodeError::Missing { .. }) => default,
            Err(err) => {
                tracing::warn!(%err, "using default for malformed value");
                default
            }
        }
    }
}

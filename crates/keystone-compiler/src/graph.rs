//! Resource graph and cloud configuration types.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property bag attached to a node.
pub type Properties = Map<String, Value>;

/// A versioned snapshot of infrastructure intent.
///
/// Node order is significant: resources are emitted in the order they appear.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceGraph {
    /// Resources to provision.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Declared relationships. Carried through but not used for ordering.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl ResourceGraph {
    /// Create a graph from nodes and edges.
    #[must_use]
    pub const fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self { nodes, edges }
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// A single resource in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, also used as the Terraform resource name.
    pub id: String,
    /// Resource type, e.g. `aws_instance`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource properties.
    #[serde(default)]
    pub properties: Properties,
    /// Canvas position. Ignored by compilation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    /// Create a node with no properties.
    #[must_use]
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            properties: Properties::new(),
            position: None,
        }
    }

    /// Set a property, returning the node.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property, treating JSON `null` as absent.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key).filter(|v| !v.is_null())
    }
}

/// Canvas coordinates for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A declared relationship between two nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Target cloud for a compilation.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudConfig {
    /// Provider name, e.g. `aws`.
    pub provider: String,
    /// Provider region.
    #[serde(default)]
    pub region: String,
    /// Provider credentials, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Map<String, Value>>,
}

impl CloudConfig {
    /// Create a config for a provider and region.
    #[must_use]
    pub fn new(provider: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            region: region.into(),
            credentials: None,
        }
    }

    /// Derive a config from a project's provider and its settings document.
    ///
    /// `region` is taken if it is a string and `credentials` if it is an
    /// object; anything else is ignored.
    #[must_use]
    pub fn from_settings(provider: impl Into<String>, settings: &Value) -> Self {
        let region = settings
            .get("region")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let credentials = settings
            .get("credentials")
            .and_then(Value::as_object)
            .cloned();

        Self {
            provider: provider.into(),
            region,
            credentials,
        }
    }
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

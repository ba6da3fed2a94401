//! Node definition registry
//!
//! Maps node identifiers to the [`NodeDefinition`] used to instantiate
//! nodes. Library nodes are registered by the host; builtin kinds are
//! collected at link time through `inventory`.
//!
//! # Usage
//!
//! ```ignore
//! use flow_engine::{NodeDefinition, NodeRegistry, PortDefinition};
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register(
//!     NodeDefinition::library("org.example.table", "Table")
//!         .with_output(PortDefinition::new("out", "sytable")),
//! );
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::port::PortDefinition;

/// Behavior class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Opaque node whose code runs in the external executor
    Library,
    /// Data source with a user-set output type
    Empty,
    /// Extracts lambdas from a document, output type set by the user
    ExtractLambdas,
    /// Applies a function to a value
    Apply,
    /// Maps a function over a list
    Map,
}

impl NodeKind {
    /// Whether the node exposes a datatype parameter
    pub fn has_datatype_parameter(self) -> bool {
        matches!(self, NodeKind::Empty | NodeKind::ExtractLambdas)
    }
}

/// Everything needed to instantiate a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    /// Unique identifier (e.g., "org.sysess.builtin.map")
    pub identifier: String,
    /// Human-readable name
    pub name: String,
    pub description: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Default parameter payload, opaque to the engine
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub kind: NodeKind,
}

impl NodeDefinition {
    pub fn new(identifier: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            description: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: serde_json::Value::Null,
            kind,
        }
    }

    /// Definition of a library node
    pub fn library(identifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(identifier, name, NodeKind::Library)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input(mut self, port: PortDefinition) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: PortDefinition) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Function pointer producing a builtin definition
///
/// Submitted with `inventory::submit!` and collected by
/// [`NodeRegistry::with_builtins`].
pub struct NodeDefinitionFn(pub fn() -> NodeDefinition);

inventory::collect!(NodeDefinitionFn);

/// Registry of node definitions keyed by identifier
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    entries: HashMap<String, NodeDefinition>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry seeded with every builtin kind
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for entry in inventory::iter::<NodeDefinitionFn> {
            registry.register((entry.0)());
        }
        log::debug!("Registered {} builtin node definitions", registry.entries.len());
        registry
    }

    /// Register a definition, replacing one with the same identifier
    pub fn register(&mut self, definition: NodeDefinition) {
        self.entries.insert(definition.identifier.clone(), definition);
    }

    pub fn get(&self, identifier: &str) -> Option<&NodeDefinition> {
        self.entries.get(identifier)
    }

    /// Get all registered definitions
    pub fn all_definitions(&self) -> Vec<&NodeDefinition> {
        self.entries.values().collect()
    }

    /// Check if a node identifier is registered
    pub fn has_node_type(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// List all registered identifiers
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same identifier.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::builtin;

    fn test_definition(identifier: &str) -> NodeDefinition {
        NodeDefinition::library(identifier, format!("Test {}", identifier))
            .with_input(PortDefinition::new("in", "sytable"))
            .with_output(PortDefinition::new("out", "sytable"))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(test_definition("test-node"));

        assert!(registry.has_node_type("test-node"));
        assert!(!registry.has_node_type("unknown"));
        assert_eq!(registry.get("test-node").unwrap().name, "Test test-node");
    }

    #[test]
    fn test_merge_override() {
        let mut registry1 = NodeRegistry::new();
        let mut def1 = test_definition("node-a");
        def1.name = "Base".to_string();
        registry1.register(def1);

        let mut registry2 = NodeRegistry::new();
        let mut def2 = test_definition("node-a");
        def2.name = "Override".to_string();
        registry2.register(def2);
        registry2.register(test_definition("node-b"));

        registry1.merge(registry2);
        assert_eq!(registry1.all_definitions().len(), 2);
        assert_eq!(registry1.get("node-a").unwrap().name, "Override");
    }

    #[test]
    fn test_with_builtins_collects_inventory() {
        let registry = NodeRegistry::with_builtins();
        for identifier in [builtin::APPLY, builtin::MAP, builtin::EMPTY, builtin::EXTRACT_LAMBDAS] {
            assert!(registry.has_node_type(identifier), "missing {}", identifier);
        }
        assert_eq!(registry.get(builtin::MAP).unwrap().kind, NodeKind::Map);
    }
}

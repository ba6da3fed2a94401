//! Ports and port definitions
//!
//! A [`PortDefinition`] is the library-side description of a port. A
//! [`Port`] is one instance of it, owned by a node, a subflow (its parent
//! ports) or a flow input/output (its inner port).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::{GraphElement, HasPorts};
use crate::constants::defaults;
use crate::datatype::TypeTerm;
use crate::document::Document;
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::ids::{generate_uuid, ElementId, Executable, FlowId, FlowIoId, NodeId, PortId};

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortKind {
    Input,
    Output,
}

/// Instance count of a numbered port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortCount {
    pub min: usize,
    pub max: usize,
    pub default: usize,
}

impl PortCount {
    pub fn new(min: usize, max: usize, default: usize) -> Self {
        Self { min, max, default }
    }

    /// Exactly one instance.
    pub fn single() -> Self {
        Self::new(1, 1, 1)
    }
}

/// Library description of a port
///
/// Definitions with an `n` range expand into several port instances sharing
/// the name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Name, shared by all instances of a numbered port
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Type string in the port type language
    #[serde(rename = "type")]
    pub datatype: String,
    /// Storage scheme of the payload
    pub scheme: String,
    /// `(min, max, default)` instance count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<PortCount>,
    /// Whether execution needs data on this input
    #[serde(default)]
    pub requires_input_data: bool,
    /// Whether the port is shown in previews
    #[serde(default)]
    pub preview: bool,
}

impl PortDefinition {
    /// Create a definition with a single instance
    pub fn new(name: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            datatype: datatype.into(),
            scheme: "hdf5".to_string(),
            n: None,
            requires_input_data: false,
            preview: false,
        }
    }

    /// Create a definition accepting any type
    pub fn any(name: impl Into<String>) -> Self {
        Self::new(name, defaults::ANY_PORT_TYPE)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Make this a numbered port
    pub fn with_count(mut self, min: usize, max: usize, default: usize) -> Self {
        self.n = Some(PortCount::new(min, max, default));
        self
    }

    pub fn requiring_input_data(mut self) -> Self {
        self.requires_input_data = true;
        self
    }

    pub fn count(&self) -> PortCount {
        self.n.unwrap_or_else(PortCount::single)
    }

    /// Whether instances can be added or removed
    pub fn is_numbered(&self) -> bool {
        let n = self.count();
        n.max > n.min
    }
}

/// Expand definitions into one entry per instance.
///
/// `counts` overrides the default instance count by name.
pub(crate) fn expand_definitions(
    definitions: &[PortDefinition],
    counts: &HashMap<String, usize>,
) -> Vec<PortDefinition> {
    definitions
        .iter()
        .flat_map(|def| {
            let n = counts
                .get(&def.name)
                .copied()
                .unwrap_or(def.count().default);
            std::iter::repeat(def.clone()).take(n)
        })
        .collect()
}

/// Element owning a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PortOwner {
    Node(NodeId),
    /// Parent port of a subflow or lambda
    Flow(FlowId),
    /// Inner port of a flow input or output
    FlowIo(FlowIoId),
}

impl PortOwner {
    pub fn executable(self) -> Option<Executable> {
        match self {
            PortOwner::Node(id) => Some(Executable::Node(id)),
            PortOwner::Flow(id) => Some(Executable::Flow(id)),
            PortOwner::FlowIo(_) => None,
        }
    }

    pub fn element(self) -> ElementId {
        match self {
            PortOwner::Node(id) => ElementId::Node(id),
            PortOwner::Flow(id) => ElementId::Flow(id),
            PortOwner::FlowIo(id) => ElementId::FlowIo(id),
        }
    }
}

/// One port instance
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) uuid: String,
    pub(crate) kind: PortKind,
    pub(crate) owner: PortOwner,
    /// Flow whose graph holds this port's vertex
    pub(crate) flow: FlowId,
    pub(crate) definition: PortDefinition,
    /// Declared type with generics identified per owner
    pub(crate) datatype_base: TypeTerm,
    /// `datatype_base` with the current inference bindings applied
    pub(crate) datatype: TypeTerm,
    /// Counterpart across a subflow boundary
    pub(crate) mirror: Option<PortId>,
    pub(crate) filename: String,
}

impl Port {
    pub fn id(&self) -> PortId {
        self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn is_input(&self) -> bool {
        self.kind == PortKind::Input
    }

    pub fn is_output(&self) -> bool {
        self.kind == PortKind::Output
    }

    pub fn owner(&self) -> PortOwner {
        self.owner
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn description(&self) -> &str {
        &self.definition.description
    }

    pub fn definition(&self) -> &PortDefinition {
        &self.definition
    }

    pub fn datatype_base(&self) -> &TypeTerm {
        &self.datatype_base
    }

    pub fn datatype(&self) -> &TypeTerm {
        &self.datatype
    }

    pub fn mirror(&self) -> Option<PortId> {
        self.mirror
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Whether the current types of the two ports unify.
    pub fn matches(&self, other: &Port) -> bool {
        self.datatype.matches(&other.datatype)
    }
}

impl GraphElement for Port {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        Some(self.flow)
    }
}

impl Document {
    /// Flow whose graph receives the ports of `owner`.
    fn port_flow(&self, owner: PortOwner) -> Result<FlowId> {
        match owner {
            PortOwner::Node(id) => Ok(self.node(id)?.flow),
            PortOwner::Flow(id) => self
                .flow(id)?
                .parent
                .ok_or_else(|| FlowEngineError::not_supported("The root flow has no parent ports")),
            PortOwner::FlowIo(id) => Ok(self.flow_io(id)?.flow),
        }
    }

    /// Create a port on `owner` at `index` (appended when `None`).
    ///
    /// The declared type is identified on its own; nodes re-identify their
    /// ports in a shared scope afterwards.
    pub(crate) fn create_port(
        &mut self,
        owner: PortOwner,
        kind: PortKind,
        definition: PortDefinition,
        index: Option<usize>,
    ) -> Result<PortId> {
        let flow = self.port_flow(owner)?;
        let declared = self.context.aliases.parse(&definition.datatype)?;
        let datatype_base = declared.identify(&mut HashMap::new(), &mut self.context.generic_ids);
        let id = PortId(self.next_id());

        self.ports.insert(
            id,
            Port {
                id,
                uuid: generate_uuid(),
                kind,
                owner,
                flow,
                definition,
                datatype: datatype_base.clone(),
                datatype_base,
                mirror: None,
                filename: String::new(),
            },
        );

        let graph_flow = self.flow_mut(flow)?;
        graph_flow.add_vertex(ElementId::Port(id));
        match kind {
            PortKind::Input => graph_flow.add_edge(ElementId::Port(id), owner.element())?,
            PortKind::Output => graph_flow.add_edge(owner.element(), ElementId::Port(id))?,
        }

        match owner {
            PortOwner::Node(node) => {
                let node = self.node_mut(node)?;
                let ports = match kind {
                    PortKind::Input => &mut node.inputs,
                    PortKind::Output => &mut node.outputs,
                };
                ports.insert(index.unwrap_or(ports.len()).min(ports.len()), id);
            }
            PortOwner::Flow(sub) => {
                let sub = self.flow_mut(sub)?;
                let ports = match kind {
                    PortKind::Input => &mut sub.inputs,
                    PortKind::Output => &mut sub.outputs,
                };
                ports.insert(index.unwrap_or(ports.len()).min(ports.len()), id);
            }
            PortOwner::FlowIo(flow_io) => {
                self.flow_io_mut(flow_io)?.port = id;
            }
        }

        match kind {
            PortKind::Input => self.emit(FlowEvent::InputPortCreated { port: id }),
            PortKind::Output => {
                if let Some(executable) = owner.executable() {
                    self.refresh_output_filenames(executable)?;
                }
                self.emit(FlowEvent::OutputPortCreated { port: id });
            }
        }
        Ok(id)
    }

    /// Disconnect and delete a port.
    pub(crate) fn remove_port(&mut self, port: PortId) -> Result<()> {
        self.disconnect_port(port)?;
        let (kind, owner, flow) = {
            let p = self.port(port)?;
            (p.kind, p.owner, p.flow)
        };

        match owner {
            PortOwner::Node(node) => {
                if let Ok(node) = self.node_mut(node) {
                    node.inputs.retain(|p| *p != port);
                    node.outputs.retain(|p| *p != port);
                }
            }
            PortOwner::Flow(sub) => {
                if let Ok(sub) = self.flow_mut(sub) {
                    sub.inputs.retain(|p| *p != port);
                    sub.outputs.retain(|p| *p != port);
                }
            }
            PortOwner::FlowIo(_) => {}
        }
        if let Some(mirror) = self.port(port)?.mirror {
            if let Ok(mirror) = self.port_mut(mirror) {
                mirror.mirror = None;
            }
        }
        self.flow_mut(flow)?.remove_vertex(ElementId::Port(port))?;
        self.drop_port(port);

        match kind {
            PortKind::Input => self.emit(FlowEvent::InputPortRemoved { port }),
            PortKind::Output => {
                if let Some(executable) = owner.executable() {
                    self.refresh_output_filenames(executable)?;
                }
                self.emit(FlowEvent::OutputPortRemoved { port });
            }
        }
        Ok(())
    }

    /// Reallocate the output filenames of an executable in port order and
    /// hand the new names to connected inputs.
    pub(crate) fn refresh_output_filenames(&mut self, owner: Executable) -> Result<()> {
        let outputs = match owner {
            Executable::Node(id) => self.node(id)?.output_ports().to_vec(),
            Executable::Flow(id) => self.flow(id)?.output_ports().to_vec(),
        };
        for port in &outputs {
            let old = std::mem::take(&mut self.port_mut(*port)?.filename);
            if !old.is_empty() {
                self.context.filenames.release(&old);
            }
        }

        let full_uuid = self.full_uuid(self.executable_uuid(owner)?);
        let namespace = self.context.namespace_uuid().to_string();
        let suffix = self.context.config.data_suffix.clone();
        for (index, port) in outputs.iter().enumerate() {
            let filename = self
                .context
                .filenames
                .allocate(&namespace, &full_uuid, index, &suffix)?;
            self.port_mut(*port)?.filename = filename;
            self.propagate_filename(*port)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(datatype: &str) -> Port {
        let term = TypeTerm::parse(datatype).unwrap();
        Port {
            id: PortId(0),
            uuid: String::new(),
            kind: PortKind::Output,
            owner: PortOwner::Node(NodeId(0)),
            flow: FlowId(0),
            definition: PortDefinition::new("out", datatype),
            datatype_base: term.clone(),
            datatype: term,
            mirror: None,
            filename: String::new(),
        }
    }

    #[test]
    fn test_expand_definitions_uses_defaults_and_overrides() {
        let defs = vec![
            PortDefinition::new("table", "sytable").with_count(1, 4, 2),
            PortDefinition::new("text", "sytext"),
        ];

        let expanded = expand_definitions(&defs, &HashMap::new());
        let names: Vec<&str> = expanded.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["table", "table", "text"]);

        let counts = HashMap::from([("table".to_string(), 3)]);
        assert_eq!(expand_definitions(&defs, &counts).len(), 4);
    }

    #[test]
    fn test_port_definition_numbered() {
        assert!(!PortDefinition::any("a").is_numbered());
        assert!(PortDefinition::any("a").with_count(0, 2, 1).is_numbered());
        assert!(!PortDefinition::any("a").with_count(1, 1, 1).is_numbered());
    }

    #[test]
    fn test_port_matches() {
        assert!(port("<a>").matches(&port("sytable")));
        assert!(port("[<a>]").matches(&port("[sytext]")));
        assert!(!port("sytable").matches(&port("sytext")));
        assert!(port("*").matches(&port("sytext")));
    }

    #[test]
    fn test_port_definition_serialization() {
        let def = PortDefinition::new("in", "sytable").with_count(0, 3, 1);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "sytable");
        assert_eq!(json["n"]["max"], 3);
        assert_eq!(json["requiresInputData"], false);
    }
}

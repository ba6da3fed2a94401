//! Nodes
//!
//! A [`Node`] is one instance of a registered [`NodeDefinition`]. Its ports
//! are created from the definition when the node is added to a flow;
//! numbered ports can be added and removed afterwards within the limits of
//! their `n` range.

use std::collections::HashMap;

use crate::capabilities::{GraphElement, HasExecutionState, HasPorts};
use crate::datatype::{unify, TypeMapping, TypeTerm};
use crate::document::{Document, Position};
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::ids::{generate_uuid, ElementId, Executable, FlowId, NodeId, PortId};
use crate::infer::InferProbe;
use crate::port::{expand_definitions, PortDefinition, PortKind, PortOwner};
use crate::registry::{NodeDefinition, NodeKind};
use crate::state_machine::NodeStateMachine;

/// Template a datatype parameter must fit, per node kind.
fn datatype_template(kind: NodeKind) -> Option<&'static str> {
    match kind {
        NodeKind::Empty => Some("<a>"),
        NodeKind::ExtractLambdas => Some("[<a> -> <b>]"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) uuid: String,
    pub(crate) name: String,
    pub(crate) flow: FlowId,
    pub(crate) position: Position,
    pub(crate) definition: NodeDefinition,
    pub(crate) parameters: serde_json::Value,
    pub(crate) inputs: Vec<PortId>,
    pub(crate) outputs: Vec<PortId>,
    pub(crate) machine: NodeStateMachine,
    pub(crate) progress: i32,
    /// User-set output type of `Empty` and `ExtractLambdas` nodes
    pub(crate) datatype_parameter: Option<String>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identifier(&self) -> &str {
        &self.definition.identifier
    }

    pub fn kind(&self) -> NodeKind {
        self.definition.kind
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn definition(&self) -> &NodeDefinition {
        &self.definition
    }

    pub fn parameters(&self) -> &serde_json::Value {
        &self.parameters
    }

    pub fn machine(&self) -> &NodeStateMachine {
        &self.machine
    }

    pub fn datatype_parameter(&self) -> Option<&str> {
        self.datatype_parameter.as_deref()
    }

    fn port_definitions(&self, kind: PortKind) -> &[PortDefinition] {
        match kind {
            PortKind::Input => &self.definition.inputs,
            PortKind::Output => &self.definition.outputs,
        }
    }

    fn ports(&self, kind: PortKind) -> &[PortId] {
        match kind {
            PortKind::Input => &self.inputs,
            PortKind::Output => &self.outputs,
        }
    }
}

impl GraphElement for Node {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        Some(self.flow)
    }
}

impl HasPorts for Node {
    fn input_ports(&self) -> &[PortId] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortId] {
        &self.outputs
    }
}

impl HasExecutionState for Node {
    fn is_armed(&self) -> bool {
        self.machine.is_armed()
    }

    fn is_queued(&self) -> bool {
        self.machine.is_queued()
    }

    fn is_executing(&self) -> bool {
        self.machine.is_executing()
    }

    fn is_done(&self) -> bool {
        self.machine.is_done()
    }

    fn is_done_locked(&self) -> bool {
        self.machine.is_done_locked()
    }

    fn in_error_state(&self) -> bool {
        self.machine.in_error_state()
    }

    fn is_valid(&self) -> bool {
        self.machine.is_valid()
    }

    fn is_configuration_valid(&self) -> bool {
        self.machine.is_configuration_valid()
    }

    fn is_dependent_armable(&self) -> bool {
        self.machine.is_dependent_armable()
    }

    fn is_queueable(&self) -> bool {
        self.machine.is_queueable()
    }

    fn is_abortable(&self) -> bool {
        self.machine.is_abortable()
    }

    fn is_reloadable(&self) -> bool {
        self.machine.is_reloadable()
    }

    fn is_configurable(&self) -> bool {
        self.machine.is_configurable()
    }

    fn is_executable(&self) -> bool {
        self.machine.is_executable()
    }

    fn is_state_deletable(&self) -> bool {
        self.machine.is_state_deletable()
    }

    fn has_pending_request(&self) -> bool {
        self.machine.has_pending_request()
    }

    fn state_string(&self) -> String {
        self.machine.state_string()
    }
}

impl Document {
    /// Instantiate a registered node in `flow`.
    pub fn create_node(&mut self, flow: FlowId, identifier: &str, position: Position) -> Result<NodeId> {
        let definition = self
            .registry
            .get(identifier)
            .cloned()
            .ok_or_else(|| FlowEngineError::UnknownNodeType(identifier.to_string()))?;
        self.flow(flow)?;

        let id = NodeId(self.next_id());
        let node = Node {
            id,
            uuid: generate_uuid(),
            name: definition.name.clone(),
            flow,
            position,
            parameters: definition.parameters.clone(),
            definition,
            inputs: Vec::new(),
            outputs: Vec::new(),
            machine: NodeStateMachine::new(),
            progress: 0,
            datatype_parameter: None,
        };
        let counts = HashMap::new();
        let inputs = expand_definitions(&node.definition.inputs, &counts);
        let outputs = expand_definitions(&node.definition.outputs, &counts);
        self.nodes.insert(id, node);

        let f = self.flow_mut(flow)?;
        f.add_vertex(ElementId::Node(id));
        f.nodes.push(id);

        for definition in inputs {
            self.create_port(PortOwner::Node(id), PortKind::Input, definition, None)?;
        }
        for definition in outputs {
            self.create_port(PortOwner::Node(id), PortKind::Output, definition, None)?;
        }
        self.update_port_types(id)?;

        self.emit(FlowEvent::NodeCreated { flow, node: id });
        log::debug!("Created {} ({}) in {}", id, identifier, flow);
        self.add_child_state(flow, Executable::Node(id))?;

        if self.context.config.validate_on_create {
            self.validate(Executable::Node(id))?;
        }
        self.revalidate_lambdas(flow)?;
        Ok(id)
    }

    /// Remove a node with its connections and ports.
    pub fn remove_node(&mut self, node: NodeId) -> Result<()> {
        let (flow, ports) = {
            let n = self.node(node)?;
            (n.flow, n.port_ids())
        };

        for port in &ports {
            self.disconnect_port(*port)?;
        }
        self.emit(FlowEvent::NodeRemoved { flow, node });

        let f = self.flow_mut(flow)?;
        for port in &ports {
            f.remove_vertex(ElementId::Port(*port))?;
        }
        f.remove_vertex(ElementId::Node(node))?;
        f.nodes.retain(|n| *n != node);
        for port in ports {
            self.drop_port(port);
        }
        self.nodes.remove(&node);

        self.remove_child_state(flow, Executable::Node(node))?;
        self.revalidate_lambdas(flow)
    }

    pub fn set_node_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<()> {
        self.node_mut(node)?.name = name.into();
        Ok(())
    }

    /// Replace the parameter payload and request validation.
    pub fn set_parameters(&mut self, node: NodeId, parameters: serde_json::Value) -> Result<()> {
        self.node_mut(node)?.parameters = parameters;
        self.validate(Executable::Node(node))
    }

    /// All inputs have a connection.
    pub fn inputs_are_connected(&self, node: NodeId) -> Result<bool> {
        Ok(self.node(node)?.inputs.iter().all(|p| self.is_connected(*p)))
    }

    /// Deletable when neither the node nor any downstream node is running.
    pub fn is_node_deletable(&self, node: NodeId) -> Result<bool> {
        let executable = Executable::Node(node);
        if !self.check(executable, |s| s.is_state_deletable()) {
            return Ok(false);
        }
        Ok(self
            .dependents(executable)?
            .into_iter()
            .all(|(dependent, _)| self.check(dependent, |s| s.is_state_deletable())))
    }

    // ── Port types ──────────────────────────────────────────────────────

    /// Type string of a port, with the datatype parameter applied to
    /// outputs of parameterized nodes.
    fn port_type_string<'a>(node: &'a Node, definition: &'a PortDefinition, kind: PortKind) -> &'a str {
        match (kind, node.datatype_parameter.as_deref()) {
            (PortKind::Output, Some(datatype)) if node.kind().has_datatype_parameter() => datatype,
            _ => &definition.datatype,
        }
    }

    /// Identify the port types of a list of definitions in one scope.
    fn identify_definitions(
        &mut self,
        node: &Node,
        inputs: &[PortDefinition],
        outputs: &[PortDefinition],
    ) -> Result<(Vec<TypeTerm>, Vec<TypeTerm>)> {
        let mut scope = HashMap::new();
        let mut identify = |definitions: &[PortDefinition], kind: PortKind| -> Result<Vec<TypeTerm>> {
            definitions
                .iter()
                .map(|def| -> Result<TypeTerm> {
                    let parsed = self
                        .context
                        .aliases
                        .parse(Self::port_type_string(node, def, kind))?;
                    Ok(parsed.identify(&mut scope, &mut self.context.generic_ids))
                })
                .collect()
        };
        let inputs = identify(inputs, PortKind::Input)?;
        let outputs = identify(outputs, PortKind::Output)?;
        Ok((inputs, outputs))
    }

    /// Re-identify all port types of a node in a shared scope and re-infer.
    pub(crate) fn update_port_types(&mut self, node: NodeId) -> Result<()> {
        let n = self.node(node)?.clone();
        let inputs: Vec<PortDefinition> = n
            .inputs
            .iter()
            .map(|p| Ok(self.port(*p)?.definition.clone()))
            .collect::<Result<_>>()?;
        let outputs: Vec<PortDefinition> = n
            .outputs
            .iter()
            .map(|p| Ok(self.port(*p)?.definition.clone()))
            .collect::<Result<_>>()?;

        let (input_types, output_types) = self.identify_definitions(&n, &inputs, &outputs)?;
        for (port, base) in n
            .inputs
            .iter()
            .zip(input_types)
            .chain(n.outputs.iter().zip(output_types))
        {
            self.port_mut(*port)?.datatype_base = base;
        }
        self.infer_all()
    }

    /// Instance counts per port name of one side.
    fn port_counts(&self, node: &Node, kind: PortKind) -> Result<HashMap<String, usize>> {
        let mut counts = HashMap::new();
        for def in node.port_definitions(kind) {
            counts.insert(def.name.clone(), 0);
        }
        for port in node.ports(kind) {
            *counts.entry(self.port(*port)?.definition.name.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Replacement types for the existing ports of `node` after the count
    /// of `name` on side `kind` changes by `delta`.
    fn numbered_port_probe(&mut self, node: NodeId, kind: PortKind, name: &str, delta: isize) -> Result<InferProbe> {
        let n = self.node(node)?.clone();
        let mut input_counts = self.port_counts(&n, PortKind::Input)?;
        let mut output_counts = self.port_counts(&n, PortKind::Output)?;
        let counts = match kind {
            PortKind::Input => &mut input_counts,
            PortKind::Output => &mut output_counts,
        };
        let count = counts.get(name).copied().unwrap_or(0);
        counts.insert(name.to_string(), count.saturating_add_signed(delta));

        let inputs = expand_definitions(&n.definition.inputs, &input_counts);
        let outputs = expand_definitions(&n.definition.outputs, &output_counts);
        let (input_types, output_types) = self.identify_definitions(&n, &inputs, &outputs)?;

        let mut probe = InferProbe::default();
        for (side, ports, types) in [
            (PortKind::Input, &n.inputs, input_types),
            (PortKind::Output, &n.outputs, output_types),
        ] {
            if side != kind {
                for (port, datatype) in ports.iter().zip(types) {
                    probe.replace.insert(*port, datatype);
                }
                continue;
            }
            // Position of the instance that is added or removed.
            let changed = ports
                .iter()
                .rposition(|p| self.ports.get(p).is_some_and(|p| p.definition.name == name))
                .map(|i| if delta > 0 { i + 1 } else { i })
                .unwrap_or(0);
            let mut types = types.into_iter();
            for (i, port) in ports.iter().enumerate() {
                if i == changed && delta > 0 {
                    types.next();
                }
                if i == changed && delta < 0 {
                    let fresh = TypeTerm::generic("a").identify(&mut HashMap::new(), &mut self.context.generic_ids);
                    probe.replace.insert(*port, fresh);
                    continue;
                }
                if let Some(datatype) = types.next() {
                    probe.replace.insert(*port, datatype);
                }
            }
        }
        Ok(probe)
    }

    fn can_create_port(&mut self, node: NodeId, kind: PortKind, name: &str) -> Result<bool> {
        let n = self.node(node)?;
        let Some(def) = n.port_definitions(kind).iter().find(|d| d.name == name) else {
            return Ok(false);
        };
        let max = def.count().max;
        let total = n.ports(kind).len();
        let count = self.port_counts(n, kind)?.get(name).copied().unwrap_or(0);
        if total >= self.context.config.max_numbered_ports || count >= max {
            return Ok(false);
        }
        let probe = self.numbered_port_probe(node, kind, name, 1)?;
        Ok(self.check_inference(&probe).is_ok())
    }

    fn can_delete_port(&mut self, node: NodeId, port: PortId) -> Result<bool> {
        let (kind, name) = {
            let p = self.port(port)?;
            (p.kind, p.definition.name.clone())
        };
        let n = self.node(node)?;
        if !n.ports(kind).contains(&port) {
            return Ok(false);
        }
        let Some(def) = n.port_definitions(kind).iter().find(|d| d.name == name) else {
            return Ok(false);
        };
        let min = def.count().min;
        let count = self.port_counts(n, kind)?.get(&name).copied().unwrap_or(0);
        if count <= min {
            return Ok(false);
        }
        let probe = self.numbered_port_probe(node, kind, &name, -1)?;
        Ok(self.check_inference(&probe).is_ok())
    }

    pub fn can_create_input(&mut self, node: NodeId, name: &str) -> Result<bool> {
        self.can_create_port(node, PortKind::Input, name)
    }

    pub fn can_create_output(&mut self, node: NodeId, name: &str) -> Result<bool> {
        self.can_create_port(node, PortKind::Output, name)
    }

    pub fn can_delete_input(&mut self, node: NodeId, port: PortId) -> Result<bool> {
        self.can_delete_port(node, port)
    }

    pub fn can_delete_output(&mut self, node: NodeId, port: PortId) -> Result<bool> {
        self.can_delete_port(node, port)
    }

    fn create_named_port(&mut self, node: NodeId, kind: PortKind, name: &str) -> Result<PortId> {
        if !self.can_create_port(node, kind, name)? {
            return Err(FlowEngineError::PortLimit { name: name.to_string() });
        }
        let n = self.node(node)?;
        let definition = n
            .port_definitions(kind)
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| FlowEngineError::UnknownPortName(name.to_string()))?;
        // Instances of one name stay adjacent: insert after the last one,
        // or where the definition order puts the group.
        let ports = n.ports(kind).to_vec();
        let index = match ports
            .iter()
            .rposition(|p| self.ports.get(p).is_some_and(|p| p.definition.name == name))
        {
            Some(last) => last + 1,
            None => {
                let before: Vec<&str> = n
                    .port_definitions(kind)
                    .iter()
                    .take_while(|d| d.name != name)
                    .map(|d| d.name.as_str())
                    .collect();
                ports
                    .iter()
                    .filter(|p| self.ports.get(p).is_some_and(|p| before.contains(&p.definition.name.as_str())))
                    .count()
            }
        };

        let port = self.create_port(PortOwner::Node(node), kind, definition, Some(index))?;
        self.update_port_types(node)?;
        Ok(port)
    }

    /// Add an instance of the numbered input `name`. Disarms the node.
    pub fn create_named_input(&mut self, node: NodeId, name: &str) -> Result<PortId> {
        let port = self.create_named_port(node, PortKind::Input, name)?;
        self.disarm_executable(Executable::Node(node), None)?;
        Ok(port)
    }

    /// Add an instance of the numbered output `name`. Re-arms the node.
    pub fn create_named_output(&mut self, node: NodeId, name: &str) -> Result<PortId> {
        let port = self.create_named_port(node, PortKind::Output, name)?;
        self.arm_executable(Executable::Node(node), None)?;
        Ok(port)
    }

    fn delete_named_port(&mut self, node: NodeId, port: PortId) -> Result<()> {
        if !self.can_delete_port(node, port)? {
            let name = self.port(port)?.definition.name.clone();
            return Err(FlowEngineError::PortLimit { name });
        }
        self.remove_port(port)?;
        self.update_port_types(node)
    }

    pub fn delete_input(&mut self, node: NodeId, port: PortId) -> Result<()> {
        self.delete_named_port(node, port)?;
        self.arm_executable(Executable::Node(node), None)
    }

    pub fn delete_output(&mut self, node: NodeId, port: PortId) -> Result<()> {
        self.delete_named_port(node, port)
    }

    // ── Datatype parameter ──────────────────────────────────────────────

    /// Set the output type of an `Empty` or `ExtractLambdas` node.
    ///
    /// The type must fit the node's template and keep the current
    /// connections well typed; otherwise nothing changes.
    pub fn set_datatype_parameter(&mut self, node: NodeId, datatype: &str) -> Result<()> {
        let n = self.node(node)?.clone();
        let template = datatype_template(n.kind()).ok_or_else(|| {
            FlowEngineError::not_supported(format!("{} has no datatype parameter", n.identifier()))
        })?;

        let parsed = self.context.aliases.parse(datatype)?;
        let template = TypeTerm::parse(template)?;
        unify(&template, &parsed, &mut TypeMapping::new())?;

        let mut probe = InferProbe::default();
        let mut scope = HashMap::new();
        let identified = parsed.identify(&mut scope, &mut self.context.generic_ids);
        for port in &n.outputs {
            probe.replace.insert(*port, identified.clone());
        }
        self.check_inference(&probe)?;

        self.node_mut(node)?.datatype_parameter = Some(datatype.to_string());
        self.update_port_types(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::builtin;
    use crate::document::tests::document;

    #[test]
    fn test_create_node_instantiates_ports() {
        let mut doc = document();
        let root = doc.root();
        let node = doc.create_node(root, "test.concat", Position::default()).unwrap();

        let n = doc.node(node).unwrap();
        assert_eq!(n.input_ports().len(), 2);
        assert_eq!(n.output_ports().len(), 1);
        assert!(!doc.port(n.outputs[0]).unwrap().filename().is_empty());
        assert!(doc.port(n.inputs[0]).unwrap().filename().is_empty());
        assert!(n.machine().has_pending_request());
        assert!(doc.create_node(root, "test.missing", Position::default()).is_err());
    }

    #[test]
    fn test_generics_are_shared_within_a_node() {
        let mut doc = document();
        let root = doc.root();
        let node = doc.create_node(root, "test.identity", Position::default()).unwrap();
        let n = doc.node(node).unwrap();

        let input = doc.port(n.inputs[0]).unwrap().datatype_base().clone();
        let output = doc.port(n.outputs[0]).unwrap().datatype_base().clone();
        assert_eq!(input, output);

        let other = doc.create_node(root, "test.identity", Position::default()).unwrap();
        let other_input = doc.port(doc.node(other).unwrap().inputs[0]).unwrap().datatype_base().clone();
        assert_ne!(input, other_input);
    }

    #[test]
    fn test_numbered_input_limits() {
        let mut doc = document();
        let root = doc.root();
        let node = doc.create_node(root, "test.concat", Position::default()).unwrap();

        assert!(doc.can_create_input(node, "in").unwrap());
        assert!(!doc.can_create_input(node, "missing").unwrap());
        doc.create_named_input(node, "in").unwrap();
        doc.create_named_input(node, "in").unwrap();
        assert_eq!(doc.node(node).unwrap().input_ports().len(), 4);
        assert!(!doc.can_create_input(node, "in").unwrap());
        assert!(matches!(
            doc.create_named_input(node, "in"),
            Err(FlowEngineError::PortLimit { .. })
        ));

        let first = doc.node(node).unwrap().inputs[0];
        doc.delete_input(node, first).unwrap();
        let remaining = doc.node(node).unwrap().inputs.clone();
        assert_eq!(remaining.len(), 3);
        doc.delete_input(node, remaining[0]).unwrap();
        doc.delete_input(node, remaining[1]).unwrap();
        assert!(!doc.can_delete_input(node, remaining[2]).unwrap());
    }

    #[test]
    fn test_remove_node_releases_everything() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let out = doc.node(a).unwrap().outputs[0];
        let inp = doc.node(b).unwrap().inputs[0];
        doc.create_connection(root, out, inp).unwrap();

        doc.remove_node(a).unwrap();
        assert!(doc.node(a).is_err());
        assert!(doc.port(out).is_err());
        assert!(doc.flow(root).unwrap().connections().is_empty());
        assert!(doc.port(inp).unwrap().filename().is_empty());
        assert!(doc.flow(root).unwrap().child_states().get(Executable::Node(a)).is_none());
    }

    #[test]
    fn test_datatype_parameter_must_fit_template() {
        let mut doc = document();
        let root = doc.root();
        let empty = doc.create_node(root, builtin::EMPTY, Position::default()).unwrap();
        let extract = doc.create_node(root, builtin::EXTRACT_LAMBDAS, Position::default()).unwrap();

        doc.set_datatype_parameter(empty, "sytable").unwrap();
        let out = doc.node(empty).unwrap().outputs[0];
        assert_eq!(doc.port(out).unwrap().datatype().to_string(), "sytable");

        assert!(doc.set_datatype_parameter(extract, "sytable").is_err());
        doc.set_datatype_parameter(extract, "[sytable -> sytext]").unwrap();

        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        assert!(doc.set_datatype_parameter(source, "sytable").is_err());
    }

    #[test]
    fn test_datatype_parameter_keeps_connections_typed() {
        let mut doc = document();
        let root = doc.root();
        let empty = doc.create_node(root, builtin::EMPTY, Position::default()).unwrap();
        let sink = doc.create_node(root, "test.int_sink", Position::default()).unwrap();
        let out = doc.node(empty).unwrap().outputs[0];
        let inp = doc.node(sink).unwrap().inputs[0];
        doc.create_connection(root, out, inp).unwrap();

        assert!(doc.set_datatype_parameter(empty, "sytext").is_err());
        assert_eq!(doc.node(empty).unwrap().datatype_parameter(), None);
        assert_eq!(doc.port(out).unwrap().datatype().to_string(), "int");
    }
}

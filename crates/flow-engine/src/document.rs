//! The document arena
//!
//! A [`Document`] owns every element of one open workflow: the root flow,
//! its subflows and lambdas, nodes, ports, connections, flow inputs and
//! outputs and text fields. Elements refer to each other through the typed
//! ids of [`crate::ids`]; all edits go through `&mut Document` methods,
//! which are spread over the modules by concern.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capabilities::HasExecutionState;
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::context::{DocumentContext, HostRequest};
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::flow::{Flow, FlowKind};
use crate::flowio::FlowIo;
use crate::ids::{
    generate_uuid, join_uuid, ConnectionId, ElementId, Executable, FlowId, FlowIoId, NodeId,
    PortId, TextFieldId,
};
use crate::node::Node;
use crate::port::Port;
use crate::registry::NodeRegistry;
use crate::textfield::TextField;

/// Canvas position
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Canvas rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

#[derive(Debug)]
pub struct Document {
    pub(crate) context: DocumentContext,
    pub(crate) registry: NodeRegistry,
    next_id: usize,
    root: FlowId,
    pub(crate) flows: BTreeMap<FlowId, Flow>,
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) ports: BTreeMap<PortId, Port>,
    pub(crate) connections: BTreeMap<ConnectionId, Connection>,
    pub(crate) flow_ios: BTreeMap<FlowIoId, FlowIo>,
    pub(crate) text_fields: BTreeMap<TextFieldId, TextField>,
}

impl Document {
    /// Empty document with the builtin node kinds registered
    pub fn new(config: EngineConfig) -> Self {
        Self::with_context(DocumentContext::new(config), NodeRegistry::with_builtins())
    }

    pub fn with_context(context: DocumentContext, registry: NodeRegistry) -> Self {
        let root = FlowId(0);
        let mut flows = BTreeMap::new();
        flows.insert(
            root,
            Flow::new(root, generate_uuid(), "Root".to_string(), None, FlowKind::Plain, Position::default()),
        );
        log::info!("Created document {}", context.namespace_uuid());

        Self {
            context,
            registry,
            next_id: 1,
            root,
            flows,
            nodes: BTreeMap::new(),
            ports: BTreeMap::new(),
            connections: BTreeMap::new(),
            flow_ios: BTreeMap::new(),
            text_fields: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> FlowId {
        self.root
    }

    pub fn context(&self) -> &DocumentContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut DocumentContext {
        &mut self.context
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Drain the requests queued for the external executor.
    pub fn take_requests(&mut self) -> Vec<HostRequest> {
        self.context.take_requests()
    }

    pub(crate) fn next_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn emit(&self, event: FlowEvent) {
        self.context.emit(event);
    }

    // ── Element lookup ──────────────────────────────────────────────────

    pub fn flow(&self, id: FlowId) -> Result<&Flow> {
        self.flows.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn flow_mut(&mut self, id: FlowId) -> Result<&mut Flow> {
        self.flows.get_mut(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn port(&self, id: PortId) -> Result<&Port> {
        self.ports.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn port_mut(&mut self, id: PortId) -> Result<&mut Port> {
        self.ports.get_mut(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn connection(&self, id: ConnectionId) -> Result<&Connection> {
        self.connections.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn flow_io(&self, id: FlowIoId) -> Result<&FlowIo> {
        self.flow_ios.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn flow_io_mut(&mut self, id: FlowIoId) -> Result<&mut FlowIo> {
        self.flow_ios.get_mut(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn text_field(&self, id: TextFieldId) -> Result<&TextField> {
        self.text_fields.get(&id).ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub(crate) fn text_field_mut(&mut self, id: TextFieldId) -> Result<&mut TextField> {
        self.text_fields
            .get_mut(&id)
            .ok_or_else(|| FlowEngineError::unknown(id))
    }

    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Flow whose graph holds the element's vertex.
    pub(crate) fn graph_flow(&self, element: ElementId) -> Option<FlowId> {
        match element {
            ElementId::Flow(id) => self.flows.get(&id).and_then(|f| f.parent),
            ElementId::Node(id) => self.nodes.get(&id).map(|n| n.flow),
            ElementId::Port(id) => self.ports.get(&id).map(|p| p.flow),
            ElementId::FlowIo(id) => self.flow_ios.get(&id).map(|f| f.flow),
            ElementId::TextField(id) => self.text_fields.get(&id).map(|t| t.flow),
        }
    }

    /// Flow containing an executable.
    pub fn parent_flow(&self, executable: Executable) -> Option<FlowId> {
        self.graph_flow(executable.into())
    }

    /// Strict ancestors of `flow`, nearest first.
    pub fn ancestors(&self, flow: FlowId) -> Vec<FlowId> {
        let mut result = Vec::new();
        let mut current = self.flows.get(&flow).and_then(|f| f.parent);
        while let Some(id) = current {
            result.push(id);
            current = self.flows.get(&id).and_then(|f| f.parent);
        }
        result
    }

    pub(crate) fn is_lambda(&self, flow: FlowId) -> bool {
        self.flows.get(&flow).is_some_and(|f| f.is_lambda())
    }

    // ── Uuids ───────────────────────────────────────────────────────────

    /// Uuid prefixed with the document namespace
    pub fn full_uuid(&self, uuid: &str) -> String {
        join_uuid(self.context.namespace_uuid(), uuid)
    }

    pub fn executable_uuid(&self, executable: Executable) -> Result<&str> {
        Ok(match executable {
            Executable::Node(id) => &self.node(id)?.uuid,
            Executable::Flow(id) => &self.flow(id)?.uuid,
        })
    }

    /// Flow uuids from the root down to the executable, joined with ".".
    pub fn hierarchical_uuid(&self, executable: Executable) -> Result<String> {
        let mut parts = vec![self.executable_uuid(executable)?.to_string()];
        if let Some(parent) = self.parent_flow(executable) {
            parts.push(self.flow(parent)?.uuid.clone());
            for ancestor in self.ancestors(parent) {
                parts.push(self.flow(ancestor)?.uuid.clone());
            }
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    // ── Execution state access ──────────────────────────────────────────

    pub fn execution_state(&self, executable: Executable) -> Result<&dyn HasExecutionState> {
        Ok(match executable {
            Executable::Node(id) => self.node(id)?,
            Executable::Flow(id) => self.flow(id)?,
        })
    }

    /// Evaluate a state predicate; unknown executables yield `false`.
    pub(crate) fn check(
        &self,
        executable: Executable,
        predicate: impl Fn(&dyn HasExecutionState) -> bool,
    ) -> bool {
        self.execution_state(executable).is_ok_and(predicate)
    }

    pub fn state_string(&self, executable: Executable) -> Result<String> {
        Ok(self.execution_state(executable)?.state_string())
    }

    /// Whether a request is outstanding on the executable or, for flows,
    /// on any descendant.
    pub fn has_pending_request(&self, executable: Executable) -> bool {
        match executable {
            Executable::Node(_) => self.check(executable, |s| s.has_pending_request()),
            Executable::Flow(id) => self.children(id).into_iter().any(|c| self.has_pending_request(c)),
        }
    }

    /// Direct stateful children: nodes, then subflows.
    pub fn children(&self, flow: FlowId) -> Vec<Executable> {
        self.flows
            .get(&flow)
            .map(|f| {
                f.nodes
                    .iter()
                    .map(|n| Executable::Node(*n))
                    .chain(f.subflows.iter().map(|s| Executable::Flow(*s)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Log and flag a broken internal invariant.
    pub(crate) fn consistency_guard(ok: bool, message: impl FnOnce() -> String) {
        if !ok {
            let message = message();
            log::error!("{}", message);
            debug_assert!(ok, "{}", message);
        }
    }
}

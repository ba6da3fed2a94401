//! Flows: the root document, subflows and lambdas
//!
//! A flow owns a [`DocumentGraph`] holding one vertex per contained
//! element. Structural containment and dataflow share that graph:
//!
//! - node input port → node → node output port
//! - subflow vertex, wired to its parent ports like a node
//! - flow input → inner output port; inner input port → flow output
//! - connection: source port → destination port
//!
//! Children's execution states are tracked in [`ChildStates`] and rolled up
//! into the flow's own [`FlowState`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capabilities::{GraphElement, HasExecutionState, HasPorts};
use crate::constants::defaults;
use crate::document::{Document, Position};
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::graph::{DocumentGraph, VertexId};
use crate::ids::{
    generate_uuid, ConnectionId, ElementId, Executable, FlowId, FlowIoId, NodeId, PortId,
    TextFieldId,
};
use crate::port::PortKind;
use crate::state_machine::NodeStateMachine;

/// Rolled-up state of a plain flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Done,
    DoneLocked,
    Armed,
    Invalid,
    Valid,
    Queued,
    Executing,
    Error,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FlowState::Done => "Done",
            FlowState::DoneLocked => "Done-Locked",
            FlowState::Armed => "Armed",
            FlowState::Invalid => "Invalid",
            FlowState::Valid => "Valid",
            FlowState::Queued => "Queued",
            FlowState::Executing => "Executing",
            FlowState::Error => "Error",
        };
        write!(f, "{}", label)
    }
}

/// In-state set of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildSet {
    Done,
    DoneLocked,
    Armed,
    Valid,
    Invalid,
    Queued,
    Executing,
    Error,
}

/// Membership of the direct children in the in-state sets.
///
/// One map entry per child, so a child is in exactly one set.
#[derive(Debug, Clone, Default)]
pub struct ChildStates {
    membership: HashMap<Executable, ChildSet>,
}

impl ChildStates {
    /// Move `child` into `set`, returning its previous set.
    pub(crate) fn insert(&mut self, child: Executable, set: ChildSet) -> Option<ChildSet> {
        self.membership.insert(child, set)
    }

    pub(crate) fn remove(&mut self, child: Executable) -> Option<ChildSet> {
        self.membership.remove(&child)
    }

    pub fn get(&self, child: Executable) -> Option<ChildSet> {
        self.membership.get(&child).copied()
    }

    pub fn any(&self, set: ChildSet) -> bool {
        self.membership.values().any(|s| *s == set)
    }

    /// Children in `set`, sorted.
    pub fn members(&self, set: ChildSet) -> Vec<Executable> {
        let mut members: Vec<Executable> = self
            .membership
            .iter()
            .filter(|(_, s)| **s == set)
            .map(|(child, _)| *child)
            .collect();
        members.sort();
        members
    }

    pub fn len(&self) -> usize {
        self.membership.len()
    }

    pub fn is_empty(&self) -> bool {
        self.membership.is_empty()
    }
}

/// Lambda specific parts
#[derive(Debug, Clone, Default)]
pub struct LambdaParts {
    pub(crate) machine: NodeStateMachine,
    /// "Function" output in the parent flow
    pub(crate) function_port: Option<PortId>,
    /// Flow output providing the result
    pub(crate) flow_output: Option<FlowIoId>,
}

impl LambdaParts {
    pub fn machine(&self) -> &NodeStateMachine {
        &self.machine
    }

    pub fn function_port(&self) -> Option<PortId> {
        self.function_port
    }
}

#[derive(Debug, Clone)]
pub enum FlowKind {
    Plain,
    /// Function-valued subflow, always executed as one unit
    Lambda(LambdaParts),
}

#[derive(Debug, Clone)]
pub struct Flow {
    pub(crate) id: FlowId,
    pub(crate) uuid: String,
    pub(crate) name: String,
    pub(crate) parent: Option<FlowId>,
    pub(crate) position: Position,
    pub(crate) kind: FlowKind,

    pub(crate) graph: DocumentGraph,
    vertices: HashMap<ElementId, VertexId>,
    elements: HashMap<VertexId, ElementId>,

    pub(crate) nodes: Vec<NodeId>,
    pub(crate) subflows: Vec<FlowId>,
    pub(crate) connections: Vec<ConnectionId>,
    pub(crate) flow_inputs: Vec<FlowIoId>,
    pub(crate) flow_outputs: Vec<FlowIoId>,
    pub(crate) text_fields: Vec<TextFieldId>,

    /// Parent ports, with vertices in the parent graph
    pub(crate) inputs: Vec<PortId>,
    pub(crate) outputs: Vec<PortId>,

    pub(crate) child_states: ChildStates,
    pub(crate) state: FlowState,
    pub(crate) locked: bool,
    pub(crate) broken_link: bool,
    pub(crate) progress: Option<i32>,
    /// Atom nodes of a locked execution still expected to finish
    pub(crate) locked_nodes: BTreeSet<Executable>,
    pub(crate) in_child_done: bool,
    name_counters: HashMap<String, usize>,
}

impl Flow {
    pub(crate) fn new(
        id: FlowId,
        uuid: String,
        name: String,
        parent: Option<FlowId>,
        kind: FlowKind,
        position: Position,
    ) -> Self {
        Self {
            id,
            uuid,
            name,
            parent,
            position,
            kind,
            graph: DocumentGraph::new(),
            vertices: HashMap::new(),
            elements: HashMap::new(),
            nodes: Vec::new(),
            subflows: Vec::new(),
            connections: Vec::new(),
            flow_inputs: Vec::new(),
            flow_outputs: Vec::new(),
            text_fields: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            child_states: ChildStates::default(),
            state: FlowState::Done,
            locked: false,
            broken_link: false,
            progress: None,
            locked_nodes: BTreeSet::new(),
            in_child_done: false,
            name_counters: HashMap::new(),
        }
    }

    pub fn id(&self) -> FlowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<FlowId> {
        self.parent
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn kind(&self) -> &FlowKind {
        &self.kind
    }

    pub fn is_lambda(&self) -> bool {
        matches!(self.kind, FlowKind::Lambda(_))
    }

    pub fn lambda(&self) -> Option<&LambdaParts> {
        match &self.kind {
            FlowKind::Lambda(parts) => Some(parts),
            FlowKind::Plain => None,
        }
    }

    pub(crate) fn lambda_mut(&mut self) -> Option<&mut LambdaParts> {
        match &mut self.kind {
            FlowKind::Lambda(parts) => Some(parts),
            FlowKind::Plain => None,
        }
    }

    /// Rolled-up state; for lambdas the machine decides the predicates.
    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn graph(&self) -> &DocumentGraph {
        &self.graph
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn subflows(&self) -> &[FlowId] {
        &self.subflows
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }

    pub fn flow_inputs(&self) -> &[FlowIoId] {
        &self.flow_inputs
    }

    pub fn flow_outputs(&self) -> &[FlowIoId] {
        &self.flow_outputs
    }

    pub fn text_fields(&self) -> &[TextFieldId] {
        &self.text_fields
    }

    pub fn child_states(&self) -> &ChildStates {
        &self.child_states
    }

    pub fn progress(&self) -> Option<i32> {
        self.progress
    }

    pub fn is_broken_link(&self) -> bool {
        self.broken_link
    }

    pub(crate) fn next_name(&mut self, base: &str) -> String {
        let counter = self.name_counters.entry(base.to_string()).or_insert(0);
        let name = format!("{} {}", base, counter);
        *counter += 1;
        name
    }

    pub fn vertex(&self, element: ElementId) -> Option<VertexId> {
        self.vertices.get(&element).copied()
    }

    pub fn element(&self, vertex: VertexId) -> Option<ElementId> {
        self.elements.get(&vertex).copied()
    }

    pub(crate) fn add_vertex(&mut self, element: ElementId) -> VertexId {
        if let Some(existing) = self.vertex(element) {
            Document::consistency_guard(false, || {
                format!("Duplicating existing element {:?} in {}", element, self.id)
            });
            return existing;
        }
        let vertex = self.graph.add_vertex();
        self.vertices.insert(element, vertex);
        self.elements.insert(vertex, element);
        vertex
    }

    pub(crate) fn remove_vertex(&mut self, element: ElementId) -> Result<()> {
        if let Some(vertex) = self.vertices.remove(&element) {
            self.elements.remove(&vertex);
            self.graph.remove_vertex(vertex)?;
        }
        Ok(())
    }

    fn require_vertex(&self, element: ElementId) -> Result<VertexId> {
        self.vertex(element)
            .ok_or_else(|| FlowEngineError::unknown(format!("{:?} in {}", element, self.id)))
    }

    pub(crate) fn add_edge(&mut self, src: ElementId, dst: ElementId) -> Result<()> {
        let s = self.require_vertex(src)?;
        let d = self.require_vertex(dst)?;
        self.graph.add_edge(s, d)?;
        Ok(())
    }

    pub(crate) fn remove_edge(&mut self, src: ElementId, dst: ElementId) -> Result<()> {
        let s = self.require_vertex(src)?;
        let d = self.require_vertex(dst)?;
        if let Some(edge) = self.graph.edge(s, d) {
            self.graph.remove_edge(edge)?;
        }
        Ok(())
    }
}

impl GraphElement for Flow {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        self.parent
    }
}

impl HasPorts for Flow {
    fn input_ports(&self) -> &[PortId] {
        &self.inputs
    }

    fn output_ports(&self) -> &[PortId] {
        &self.outputs
    }
}

impl HasExecutionState for Flow {
    fn is_armed(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_armed(),
            FlowKind::Plain => self.state == FlowState::Armed,
        }
    }

    fn is_queued(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_queued(),
            FlowKind::Plain => self.state == FlowState::Queued,
        }
    }

    fn is_executing(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_executing(),
            FlowKind::Plain => self.state == FlowState::Executing,
        }
    }

    fn is_done(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_done(),
            FlowKind::Plain => matches!(self.state, FlowState::Done | FlowState::DoneLocked),
        }
    }

    fn is_done_locked(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_done_locked(),
            FlowKind::Plain => self.state == FlowState::DoneLocked,
        }
    }

    fn in_error_state(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.in_error_state(),
            FlowKind::Plain => self.state == FlowState::Error,
        }
    }

    fn is_valid(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_valid(),
            FlowKind::Plain => self.state == FlowState::Valid,
        }
    }

    fn is_configuration_valid(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_configuration_valid(),
            FlowKind::Plain => self.state != FlowState::Invalid,
        }
    }

    fn is_dependent_armable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_dependent_armable(),
            FlowKind::Plain => false,
        }
    }

    fn is_queueable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_queueable(),
            FlowKind::Plain => matches!(self.state, FlowState::Armed | FlowState::Done),
        }
    }

    fn is_abortable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_abortable(),
            FlowKind::Plain => self.is_queued() || self.is_executing(),
        }
    }

    fn is_reloadable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_reloadable(),
            FlowKind::Plain => !self.is_abortable(),
        }
    }

    fn is_configurable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_configurable(),
            FlowKind::Plain => !(self.is_queued() || self.is_executing()),
        }
    }

    fn is_executable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_executable(),
            FlowKind::Plain => self.state == FlowState::Armed,
        }
    }

    fn is_state_deletable(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.is_state_deletable(),
            FlowKind::Plain => !(self.is_executing() || self.is_queued()),
        }
    }

    fn has_pending_request(&self) -> bool {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.has_pending_request(),
            FlowKind::Plain => false,
        }
    }

    fn state_string(&self) -> String {
        match &self.kind {
            FlowKind::Lambda(parts) => parts.machine.state_string(),
            FlowKind::Plain => self.state.to_string(),
        }
    }
}

impl Document {
    /// Create an empty subflow named "Subflow <n>".
    pub fn create_subflow(&mut self, parent: FlowId, position: Position) -> Result<FlowId> {
        self.create_function(parent, FlowKind::Plain, position)
    }

    pub(crate) fn create_function(&mut self, parent: FlowId, kind: FlowKind, position: Position) -> Result<FlowId> {
        let base = match kind {
            FlowKind::Plain => defaults::SUBFLOW_BASE_NAME,
            FlowKind::Lambda(_) => defaults::LAMBDA_BASE_NAME,
        };
        let is_lambda = matches!(kind, FlowKind::Lambda(_));
        let name = self.flow_mut(parent)?.next_name(base);
        let id = FlowId(self.next_id());

        self.flows
            .insert(id, Flow::new(id, generate_uuid(), name, Some(parent), kind, position));
        let parent_flow = self.flow_mut(parent)?;
        parent_flow.add_vertex(ElementId::Flow(id));
        parent_flow.subflows.push(id);

        self.add_child_state(parent, Executable::Flow(id))?;
        self.emit(FlowEvent::SubflowCreated { flow: parent, subflow: id });
        log::debug!("Created {} in {}", id, parent);

        if is_lambda {
            self.initialize_lambda(id)?;
        }
        if self.is_atom(id) {
            self.validate(Executable::Flow(id))?;
        }
        if self.is_lambda(parent) {
            self.top_validate(parent)?;
        }
        Ok(id)
    }

    /// Remove a subflow or lambda with everything it contains.
    pub fn remove_subflow(&mut self, subflow: FlowId) -> Result<()> {
        let parent = self
            .flow(subflow)?
            .parent
            .ok_or_else(|| FlowEngineError::not_supported("The root flow cannot be removed"))?;

        for port in self.flow(subflow)?.port_ids() {
            self.disconnect_port(port)?;
        }
        self.emit(FlowEvent::SubflowRemoved { flow: parent, subflow });
        self.purge_flow(subflow)?;

        let parent_flow = self.flow_mut(parent)?;
        parent_flow.remove_vertex(ElementId::Flow(subflow))?;
        parent_flow.subflows.retain(|s| *s != subflow);
        self.remove_child_state(parent, Executable::Flow(subflow))?;

        if self.is_lambda(parent) {
            self.top_validate(parent)?;
        }
        Ok(())
    }

    /// Drop a flow record and everything below it from the arenas.
    fn purge_flow(&mut self, id: FlowId) -> Result<()> {
        let flow = self.flows.remove(&id).ok_or_else(|| FlowEngineError::unknown(id))?;

        for sub in &flow.subflows {
            self.purge_flow(*sub)?;
        }
        for node in &flow.nodes {
            if let Some(node) = self.nodes.remove(node) {
                for port in node.port_ids() {
                    self.drop_port(port);
                }
            }
        }
        for connection in &flow.connections {
            self.connections.remove(connection);
        }
        for flow_io in flow.flow_inputs.iter().chain(&flow.flow_outputs) {
            if let Some(flow_io) = self.flow_ios.remove(flow_io) {
                self.drop_port(flow_io.port);
            }
        }
        for text_field in &flow.text_fields {
            self.text_fields.remove(text_field);
        }
        for port in flow.port_ids() {
            if let Some(parent) = flow.parent.and_then(|p| self.flows.get_mut(&p)) {
                parent.remove_vertex(ElementId::Port(port))?;
            }
            self.drop_port(port);
        }
        Ok(())
    }

    /// Remove a port from the arena, releasing its filename.
    pub(crate) fn drop_port(&mut self, port: PortId) {
        if let Some(port) = self.ports.remove(&port) {
            if port.kind == PortKind::Output && port.owner.executable().is_some() && !port.filename.is_empty() {
                self.context.filenames.release(&port.filename);
            }
        }
    }

    pub fn set_flow_name(&mut self, flow: FlowId, name: impl Into<String>) -> Result<()> {
        self.flow_mut(flow)?.name = name.into();
        Ok(())
    }

    // ── Locking ─────────────────────────────────────────────────────────

    /// Whether locking is possible: false anywhere below a lambda.
    pub fn can_lock(&self, flow: FlowId) -> bool {
        match self.flows.get(&flow) {
            Some(f) if f.is_lambda() => false,
            Some(f) => f.parent.is_none_or(|p| self.can_lock(p)),
            None => false,
        }
    }

    /// Locked flows execute as one unit. Flows below an atom are never locked.
    pub fn is_locked(&self, flow: FlowId) -> bool {
        let Some(f) = self.flows.get(&flow) else {
            return false;
        };
        if f.parent.is_some_and(|p| self.is_atom(p)) {
            return false;
        }
        f.locked && self.can_lock(flow)
    }

    /// Whether the flow executes as a single unit.
    pub fn is_atom(&self, flow: FlowId) -> bool {
        self.is_lambda(flow) || self.is_locked(flow)
    }

    pub(crate) fn is_atom_executable(&self, executable: Executable) -> bool {
        match executable {
            Executable::Flow(id) => self.is_atom(id),
            Executable::Node(_) => false,
        }
    }

    pub fn set_locked(&mut self, flow: FlowId, locked: bool) -> Result<()> {
        let f = self.flow_mut(flow)?;
        let was_locked = f.locked;
        f.locked = locked;

        if was_locked && !locked {
            self.arm_executable(Executable::Flow(flow), None)?;
        }
        self.notify_state_changed(Executable::Flow(flow))
    }

    /// A flow with a broken external link is always in error.
    pub fn set_broken_link(&mut self, flow: FlowId, broken: bool) -> Result<()> {
        self.flow_mut(flow)?.broken_link = broken;
        self.update_state(flow, true)
    }

    // ── State rollup ────────────────────────────────────────────────────

    /// Recursively without nodes.
    pub fn is_empty(&self, flow: FlowId) -> bool {
        self.flows
            .get(&flow)
            .is_none_or(|f| f.nodes.is_empty() && f.subflows.iter().all(|s| self.is_empty(*s)))
    }

    /// Report a state change of `executable` and let its flow react.
    pub(crate) fn notify_state_changed(&mut self, executable: Executable) -> Result<()> {
        let state = self.state_string(executable)?;
        self.emit(FlowEvent::StateChanged {
            element: executable,
            state,
        });
        match self.parent_flow(executable) {
            Some(parent) => self.on_child_state_changed(parent, executable),
            None => Ok(()),
        }
    }

    fn on_child_state_changed(&mut self, flow: FlowId, child: Executable) -> Result<()> {
        self.add_child_state(flow, child)?;

        let child_done = self.check(child, |s| s.is_done());
        let child_valid = self.check(child, |s| s.is_configuration_valid());
        if self.is_lambda(flow) {
            let settled = self.check(Executable::Flow(flow), |s| s.is_armed() || s.is_done());
            if settled != child_valid {
                self.top_validate(flow)?;
            }
        } else if child_done {
            self.update_flow_progress(flow)?;
        }
        Ok(())
    }

    /// Classify `child` into its in-state set and roll up.
    pub(crate) fn add_child_state(&mut self, flow: FlowId, child: Executable) -> Result<()> {
        let (done_locked, done, error, executing, queued, armed, config_valid) = {
            let s = self.execution_state(child)?;
            (
                s.is_done_locked(),
                s.is_done(),
                s.in_error_state(),
                s.is_executing(),
                s.is_queued(),
                s.is_armed(),
                s.is_configuration_valid(),
            )
        };

        let f = self.flow_mut(flow)?;
        let mut abort = false;
        if !f.in_child_done && f.locked_nodes.contains(&child) {
            if queued || executing {
            } else if done || error {
                f.locked_nodes.remove(&child);
            } else {
                f.locked_nodes.clear();
                abort = true;
            }
        }

        let set = if done_locked {
            ChildSet::DoneLocked
        } else if done {
            ChildSet::Done
        } else if error {
            ChildSet::Error
        } else if executing {
            ChildSet::Executing
        } else if queued {
            ChildSet::Queued
        } else if armed {
            ChildSet::Armed
        } else if config_valid {
            ChildSet::Valid
        } else {
            ChildSet::Invalid
        };
        f.child_states.insert(child, set);

        self.update_state(flow, true)?;
        if abort {
            log::debug!("Locked child {:?} left execution, aborting {}", child, flow);
            self.context.request(crate::context::HostRequest::Abort(Executable::Flow(flow)));
        }
        Ok(())
    }

    pub(crate) fn remove_child_state(&mut self, flow: FlowId, child: Executable) -> Result<()> {
        let f = self.flow_mut(flow)?;
        f.child_states.remove(child);
        f.locked_nodes.remove(&child);
        self.update_state(flow, true)
    }

    pub(crate) fn new_state(&self, flow: FlowId) -> Result<FlowState> {
        let f = self.flow(flow)?;
        if f.broken_link {
            return Ok(FlowState::Error);
        }
        if self.is_empty(flow) {
            return Ok(FlowState::Done);
        }

        let states = &f.child_states;
        let state = if states.any(ChildSet::Error) {
            FlowState::Error
        } else if states.any(ChildSet::Executing) {
            FlowState::Executing
        } else if states.any(ChildSet::Queued) {
            FlowState::Queued
        } else if states.any(ChildSet::Invalid) {
            FlowState::Invalid
        } else if states.any(ChildSet::Valid) {
            FlowState::Valid
        } else if states.any(ChildSet::Armed) {
            FlowState::Armed
        } else if states.any(ChildSet::DoneLocked) {
            let output_done_locked = self
                .output_node_set(flow)?
                .into_iter()
                .any(|n| self.check(n, |s| s.is_done_locked()));
            if output_done_locked {
                FlowState::DoneLocked
            } else {
                FlowState::Done
            }
        } else if states.any(ChildSet::Done) {
            FlowState::Done
        } else {
            FlowState::Armed
        };
        Ok(state)
    }

    /// Recompute the flow state. Emits when `emit` is set or the state
    /// changed.
    pub fn update_state(&mut self, flow: FlowId, emit: bool) -> Result<()> {
        let new_state = self.new_state(flow)?;
        let f = self.flow_mut(flow)?;
        let old_state = f.state;
        f.state = new_state;

        if emit || new_state != old_state {
            if new_state != old_state {
                log::debug!("{} {} -> {}", flow, old_state, new_state);
            }
            self.notify_state_changed(Executable::Flow(flow))?;
            if new_state == FlowState::Executing && old_state != FlowState::Queued {
                self.flow_mut(flow)?.progress = None;
            }
        }
        Ok(())
    }

    // ── Progress ────────────────────────────────────────────────────────

    pub fn progress(&self, executable: Executable) -> Result<Option<i32>> {
        Ok(match executable {
            Executable::Node(id) => Some(self.node(id)?.progress),
            Executable::Flow(id) => self.flow(id)?.progress,
        })
    }

    /// Counted nodes and summed percentages below `flow`.
    fn count_progress(&self, flow: FlowId) -> Result<(usize, f64)> {
        let f = self.flow(flow)?;
        let mut count = 0;
        let mut total = 0.0;
        for id in &f.nodes {
            let node = self.node(*id)?;
            if node.machine.is_queued() {
                count += 1;
            } else if node.machine.is_done() {
                total += 100.0;
                count += 1;
            } else if node.machine.is_executing() {
                total += f64::from(node.progress);
                count += 1;
            }
        }
        for sub in &f.subflows {
            let (c, t) = self.count_progress(*sub)?;
            count += c;
            total += t;
        }
        Ok((count, total))
    }

    pub(crate) fn update_flow_progress(&mut self, flow: FlowId) -> Result<()> {
        let (count, total) = self.count_progress(flow)?;
        let progress = if count > 0 {
            (total / count as f64) as i32
        } else {
            1
        };
        self.set_flow_progress(flow, progress)
    }

    pub(crate) fn set_flow_progress(&mut self, flow: FlowId, progress: i32) -> Result<()> {
        let f = self.flow_mut(flow)?;
        if f.progress == Some(progress) {
            return Ok(());
        }
        f.progress = Some(progress);
        let parent = f.parent;
        self.emit(FlowEvent::ProgressChanged {
            element: Executable::Flow(flow),
            progress,
        });
        match parent {
            Some(parent) => self.update_flow_progress(parent),
            None => Ok(()),
        }
    }

    /// `(total, finished)` node counts; an atom counts as one node.
    pub fn execution_status(&self, flow: FlowId) -> Result<(usize, usize)> {
        if self.is_atom(flow) {
            let done = self.check(Executable::Flow(flow), |s| s.is_done());
            return Ok((1, usize::from(done)));
        }
        let f = self.flow(flow)?;
        let mut total = f.nodes.len();
        let mut finished = f
            .child_states
            .members(ChildSet::Done)
            .into_iter()
            .chain(f.child_states.members(ChildSet::DoneLocked))
            .filter(|c| matches!(c, Executable::Node(_)))
            .count();
        for sub in &f.subflows {
            let (t, d) = self.execution_status(*sub)?;
            total += t;
            finished += d;
        }
        Ok((total, finished))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::tests::document;
    use crate::events::VecEventSink;

    #[test]
    fn test_child_states_membership_is_exclusive() {
        let mut states = ChildStates::default();
        let child = Executable::Node(NodeId(1));
        assert_eq!(states.insert(child, ChildSet::Valid), None);
        assert_eq!(states.insert(child, ChildSet::Armed), Some(ChildSet::Valid));
        assert!(!states.any(ChildSet::Valid));
        assert_eq!(states.members(ChildSet::Armed), vec![child]);
        assert_eq!(states.len(), 1);
    }

    #[test]
    fn test_subflow_names_count_per_base() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_subflow(root, Position::default()).unwrap();
        let b = doc.create_subflow(root, Position::default()).unwrap();
        let lambda = doc.create_lambda(root, Position::default()).unwrap();

        assert_eq!(doc.flow(a).unwrap().name(), "Subflow 0");
        assert_eq!(doc.flow(b).unwrap().name(), "Subflow 1");
        assert_eq!(doc.flow(lambda).unwrap().name(), "New Lambda 0");
    }

    #[test]
    fn test_empty_flow_is_done() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        assert_eq!(doc.flow(sub).unwrap().state(), FlowState::Done);
        assert!(doc.is_empty(root));
        assert_eq!(doc.new_state(root).unwrap(), FlowState::Done);
    }

    #[test]
    fn test_rollup_priority() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let a_out = doc.node(a).unwrap().outputs[0];
        let b_in = doc.node(b).unwrap().inputs[0];
        doc.create_connection(root, a_out, b_in).unwrap();

        doc.validate_done(Executable::Node(a), true).unwrap();
        doc.validate_done(Executable::Node(b), false).unwrap();
        assert_eq!(doc.flow(root).unwrap().state(), FlowState::Invalid);

        doc.validate(Executable::Node(b)).unwrap();
        doc.validate_done(Executable::Node(b), true).unwrap();
        assert_eq!(doc.flow(root).unwrap().state(), FlowState::Armed);

        doc.set_broken_link(root, true).unwrap();
        assert_eq!(doc.flow(root).unwrap().state(), FlowState::Error);
        doc.set_broken_link(root, false).unwrap();
        assert_eq!(doc.flow(root).unwrap().state(), FlowState::Armed);
    }

    #[test]
    fn test_update_state_is_idempotent() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        doc.validate_done(Executable::Node(a), true).unwrap();

        let sink = Arc::new(VecEventSink::new());
        doc.context_mut().add_sink(sink.clone());

        doc.update_state(root, false).unwrap();
        let first = doc.flow(root).unwrap().state();
        doc.update_state(root, false).unwrap();
        assert_eq!(doc.flow(root).unwrap().state(), first);
        assert!(sink.events().is_empty());

        doc.update_state(root, true).unwrap();
        let emitted = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, FlowEvent::StateChanged { element: Executable::Flow(f), .. } if *f == root))
            .count();
        assert_eq!(emitted, 1);
    }

    #[test]
    fn test_remove_subflow_removes_contents() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let inner = doc.create_node(sub, "test.table", Position::default()).unwrap();
        let nested = doc.create_subflow(sub, Position::default()).unwrap();

        doc.remove_subflow(sub).unwrap();
        assert!(doc.flow(sub).is_err());
        assert!(doc.flow(nested).is_err());
        assert!(doc.node(inner).is_err());
        assert!(doc.flow(root).unwrap().subflows().is_empty());
        assert!(doc.flow(root).unwrap().graph().real_vertices().next().is_none());
        assert!(doc.remove_subflow(root).is_err());
    }

    #[test]
    fn test_lock_rules() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let inner = doc.create_subflow(sub, Position::default()).unwrap();
        let lambda = doc.create_lambda(root, Position::default()).unwrap();
        let under_lambda = doc.create_subflow(lambda, Position::default()).unwrap();

        doc.set_locked(sub, true).unwrap();
        doc.set_locked(inner, true).unwrap();
        assert!(doc.is_locked(sub));
        assert!(doc.is_atom(sub));
        assert!(!doc.is_locked(inner));

        doc.set_locked(under_lambda, true).unwrap();
        assert!(!doc.can_lock(under_lambda));
        assert!(!doc.is_locked(under_lambda));
        assert!(doc.is_atom(lambda));
    }

    #[test]
    fn test_execution_status_counts_nodes() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        doc.create_node(sub, "test.source", Position::default()).unwrap();

        assert_eq!(doc.execution_status(root).unwrap(), (2, 0));

        doc.validate_done(Executable::Node(a), true).unwrap();
        doc.set_started(Executable::Node(a)).unwrap();
        doc.set_done(Executable::Node(a), true, Some(false)).unwrap();
        assert_eq!(doc.execution_status(root).unwrap(), (2, 1));

        doc.set_locked(sub, true).unwrap();
        assert_eq!(doc.execution_status(sub).unwrap(), (1, 0));
    }
}

//! Execution control
//!
//! Drives the per-node state machines and reacts to the states they enter:
//! readiness ripples downstream through arm/disarm cascades, and work for
//! the external executor is queued as [`HostRequest`]s. Results come back
//! through [`Document::validate_done`], [`Document::set_queued`],
//! [`Document::set_started`], [`Document::set_done`] and
//! [`Document::abort_done`].
//!
//! Plain flows have no machine of their own. They forward to their atom
//! nodes when locked and otherwise roll up their children's states.

use std::collections::HashSet;

use crate::capabilities::HasPorts;
use crate::context::HostRequest;
use crate::document::Document;
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::ids::{Executable, FlowId, NodeId, PortId};
use crate::port::PortOwner;
use crate::state_machine::{Entered, NodeState, NodeStateMachine, StateEvent};
use crate::validation::{validate_flow, ValidationError};

impl Document {
    // ── Machine access ──────────────────────────────────────────────────

    fn machine_mut(&mut self, executable: Executable) -> Result<&mut NodeStateMachine> {
        match executable {
            Executable::Node(id) => Ok(&mut self.node_mut(id)?.machine),
            Executable::Flow(id) => self
                .flow_mut(id)?
                .lambda_mut()
                .map(|parts| &mut parts.machine)
                .ok_or_else(|| FlowEngineError::not_supported(format!("{} has no state machine", id))),
        }
    }

    fn machine(&self, executable: Executable) -> Option<&NodeStateMachine> {
        match executable {
            Executable::Node(id) => self.nodes.get(&id).map(|n| &n.machine),
            Executable::Flow(id) => self.flows.get(&id).and_then(|f| f.lambda()).map(|p| p.machine()),
        }
    }

    /// Run a machine command and react to the entered states.
    fn drive(
        &mut self,
        executable: Executable,
        command: impl FnOnce(&mut NodeStateMachine) -> Vec<Entered>,
    ) -> Result<()> {
        let entered = command(self.machine_mut(executable)?);
        self.apply_entered(executable, entered)
    }

    fn fire(&mut self, executable: Executable, event: StateEvent) -> Result<()> {
        self.drive(executable, |m| m.fire(event).into_iter().collect())
    }

    pub(crate) fn apply_entered(&mut self, executable: Executable, entered: Vec<Entered>) -> Result<()> {
        for state in entered {
            log::debug!("{:?} entered {:?}", executable, state);
            self.notify_state_changed(executable)?;
            if let Entered::Node(state) = state {
                self.on_state_entered(executable, state)?;
            }
        }
        Ok(())
    }

    fn on_state_entered(&mut self, executable: Executable, state: NodeState) -> Result<()> {
        match state {
            NodeState::Validating => match executable {
                Executable::Flow(lambda) => {
                    let ok = self.internal_validate(lambda)?;
                    self.validate_done(executable, ok)
                }
                Executable::Node(_) => {
                    self.context.request(HostRequest::Validate(executable));
                    Ok(())
                }
            },
            NodeState::Invalid | NodeState::Error => self.disarm_dependents(executable),
            NodeState::Valid => {
                self.disarm_dependents(executable)?;
                self.arm_machine(executable)
            }
            NodeState::Armed => {
                if self.check(executable, |s| s.is_dependent_armable()) {
                    self.arm_dependents(executable)?;
                }
                Ok(())
            }
            NodeState::Executing => {
                self.reset_progress(executable);
                Ok(())
            }
            NodeState::Aborting | NodeState::AbortingValid => {
                self.context.request(HostRequest::Abort(executable));
                Ok(())
            }
            NodeState::Done | NodeState::DoneLocked => self.arm_valid_dependents(executable),
            NodeState::Initializing | NodeState::Queued => Ok(()),
        }
    }

    fn reset_progress(&mut self, executable: Executable) {
        match executable {
            Executable::Node(id) => {
                if let Some(node) = self.nodes.get_mut(&id) {
                    node.progress = 0;
                }
            }
            Executable::Flow(id) => {
                if let Some(flow) = self.flows.get_mut(&id) {
                    flow.progress = Some(0);
                }
            }
        }
    }

    // ── Dependencies ────────────────────────────────────────────────────

    /// Downstream executables fed by the outputs of `executable`, with the
    /// input port each one is fed through.
    pub(crate) fn dependents(&self, executable: Executable) -> Result<Vec<(Executable, PortId)>> {
        let outputs = match executable {
            Executable::Node(id) => self.node(id)?.output_ports().to_vec(),
            Executable::Flow(id) => self.flow(id)?.output_ports().to_vec(),
        };
        let mut result = Vec::new();
        for output in outputs {
            for port in self.destination_ports(output, true, false, true) {
                if let Some(dependent) = self.ports.get(&port).and_then(|p| p.owner.executable()) {
                    result.push((dependent, port));
                }
            }
        }
        Ok(result)
    }

    fn disarm_dependents(&mut self, executable: Executable) -> Result<()> {
        for (dependent, port) in self.dependents(executable)? {
            self.disarm_executable(dependent, Some(port))?;
        }
        Ok(())
    }

    fn arm_dependents(&mut self, executable: Executable) -> Result<()> {
        for (dependent, port) in self.dependents(executable)? {
            self.arm_executable(dependent, Some(port))?;
        }
        Ok(())
    }

    fn arm_valid_dependents(&mut self, executable: Executable) -> Result<()> {
        for (dependent, port) in self.dependents(executable)? {
            if self.check(dependent, |s| s.is_valid()) {
                self.arm_executable(dependent, Some(port))?;
            }
        }
        Ok(())
    }

    /// Whether the executable producing data for `input` lets dependents
    /// arm. Unconnected inputs and bare flow inputs do not. Locked subflows
    /// are looked through to the node producing the data.
    pub(crate) fn source_is_dependent_armable(&self, input: PortId) -> bool {
        self.source_port(input, true, false)
            .and_then(|p| self.ports.get(&p))
            .and_then(|p| p.owner.executable())
            .is_some_and(|owner| self.check(owner, |s| s.is_dependent_armable()))
    }

    /// Arm the machine of a node or lambda once all its sources allow it.
    fn arm_machine(&mut self, executable: Executable) -> Result<()> {
        let inputs = match executable {
            Executable::Node(id) => self.node(id)?.input_ports().to_vec(),
            Executable::Flow(id) => self.flow(id)?.input_ports().to_vec(),
        };
        if inputs.iter().all(|p| self.source_is_dependent_armable(*p)) {
            self.fire(executable, StateEvent::Armed)?;
        }
        Ok(())
    }

    // ── Arming ──────────────────────────────────────────────────────────

    /// Try to make `executable` ready for execution. `port` names the input
    /// whose upstream changed, if any.
    pub fn arm_executable(&mut self, executable: Executable, port: Option<PortId>) -> Result<()> {
        match executable {
            Executable::Node(_) => self.arm_machine(executable),
            Executable::Flow(id) if self.is_lambda(id) => self.arm_lambda(id, port),
            Executable::Flow(id) => self.arm_flow(id, port),
        }
    }

    pub fn disarm_executable(&mut self, executable: Executable, port: Option<PortId>) -> Result<()> {
        match executable {
            Executable::Node(_) => self.fire(executable, StateEvent::Disarmed),
            Executable::Flow(id) if self.is_lambda(id) => self.disarm_lambda(id, port),
            Executable::Flow(id) => self.disarm_flow(id, port),
        }
    }

    fn is_flow_io_port(&self, port: Option<PortId>) -> bool {
        port.and_then(|p| self.ports.get(&p))
            .is_some_and(|p| matches!(p.owner, PortOwner::FlowIo(_)))
    }

    fn arm_flow(&mut self, flow: FlowId, port: Option<PortId>) -> Result<()> {
        if self.is_flow_io_port(port) {
            return Ok(());
        }
        if self.check(Executable::Flow(flow), |s| s.is_executing() || s.is_queued()) {
            self.abort(Executable::Flow(flow))?;
        }
        self.reload(flow)
    }

    fn disarm_flow(&mut self, flow: FlowId, port: Option<PortId>) -> Result<()> {
        if self.is_flow_io_port(port) {
            return Ok(());
        }
        if self.check(Executable::Flow(flow), |s| s.is_executing() || s.is_queued()) {
            self.abort(Executable::Flow(flow))?;
        }
        self.disarm_contents(flow)
    }

    /// Re-arm the start nodes of `flow` and of its subflows.
    pub fn reload(&mut self, flow: FlowId) -> Result<()> {
        let starts = self.start_nodes(flow, true);
        for start in &starts {
            self.arm_executable(*start, None)?;
        }
        for sub in self.flow(flow)?.subflows.clone() {
            if !starts.contains(&Executable::Flow(sub)) {
                self.reload(sub)?;
            }
        }
        Ok(())
    }

    fn disarm_contents(&mut self, flow: FlowId) -> Result<()> {
        let starts = self.start_nodes(flow, true);
        for start in &starts {
            self.disarm_executable(*start, None)?;
        }
        for sub in self.flow(flow)?.subflows.clone() {
            if !starts.contains(&Executable::Flow(sub)) {
                self.disarm_executable(Executable::Flow(sub), None)?;
            }
        }
        Ok(())
    }

    /// A new connection reached `port`.
    pub(crate) fn input_connection_added(&mut self, port: PortId) -> Result<()> {
        match self.port(port)?.owner {
            PortOwner::Node(id) => self.arm_executable(Executable::Node(id), Some(port)),
            PortOwner::Flow(id) if self.is_lambda(id) => self.forward_to_mirror(port, true),
            PortOwner::Flow(id) if self.is_atom(id) => self.arm_flow(id, Some(port)),
            PortOwner::Flow(_) => self.forward_to_mirror(port, true),
            PortOwner::FlowIo(_) => Ok(()),
        }
    }

    pub(crate) fn input_connection_removed(&mut self, port: PortId) -> Result<()> {
        match self.port(port)?.owner {
            PortOwner::Node(id) => self.disarm_executable(Executable::Node(id), Some(port)),
            PortOwner::Flow(id) if self.is_lambda(id) => self.forward_to_mirror(port, false),
            PortOwner::Flow(id) if self.is_atom(id) => self.disarm_flow(id, Some(port)),
            PortOwner::Flow(_) => self.forward_to_mirror(port, false),
            PortOwner::FlowIo(_) => Ok(()),
        }
    }

    /// Arm or disarm everything fed by the flow input behind a parent port.
    fn forward_to_mirror(&mut self, port: PortId, arm: bool) -> Result<()> {
        let Some(mirror) = self.port(port)?.mirror else {
            return Ok(());
        };
        for destination in self.destination_ports(mirror, true, false, true) {
            let Some(dependent) = self.ports.get(&destination).and_then(|p| p.owner.executable()) else {
                continue;
            };
            if arm {
                self.arm_executable(dependent, Some(destination))?;
            } else {
                self.disarm_executable(dependent, Some(destination))?;
            }
        }
        Ok(())
    }

    fn arm_lambda(&mut self, lambda: FlowId, port: Option<PortId>) -> Result<()> {
        match port {
            Some(port) => {
                if self.port(port)?.owner == PortOwner::Flow(lambda) {
                    self.forward_to_mirror(port, true)?;
                }
            }
            None => {
                if self.check(Executable::Flow(lambda), |s| s.is_armed()) {
                    return Ok(());
                }
                self.arm_flow(lambda, None)?;
            }
        }
        if self.internal_validate(lambda)? {
            self.arm_machine(Executable::Flow(lambda))
        } else {
            self.top_validate(lambda)
        }
    }

    fn disarm_lambda(&mut self, lambda: FlowId, port: Option<PortId>) -> Result<()> {
        match port {
            Some(port) => {
                if self.port(port)?.owner == PortOwner::Flow(lambda) {
                    self.forward_to_mirror(port, false)?;
                }
            }
            None => self.disarm_flow(lambda, None)?,
        }
        if self.internal_validate(lambda)? {
            self.fire(Executable::Flow(lambda), StateEvent::Disarmed)
        } else {
            self.top_validate(lambda)
        }
    }

    // ── Validation ──────────────────────────────────────────────────────

    /// Ask for validation. Flows validate all their contents.
    pub fn validate(&mut self, executable: Executable) -> Result<()> {
        match executable {
            Executable::Node(_) => {
                let allowed = self
                    .machine(executable)
                    .is_some_and(|m| m.is_configurable() || (!m.is_initialized() && !m.has_pending_request()));
                if allowed {
                    self.drive(executable, NodeStateMachine::validate)?;
                }
                Ok(())
            }
            Executable::Flow(id) => {
                for child in self.children(id) {
                    self.validate(child)?;
                }
                if self.is_lambda(id) {
                    self.top_validate(id)?;
                }
                Ok(())
            }
        }
    }

    /// Validation result from the executor.
    pub fn validate_done(&mut self, executable: Executable, ok: bool) -> Result<()> {
        if let Executable::Flow(id) = executable {
            if !self.is_lambda(id) {
                return Err(FlowEngineError::not_supported(format!("{} is validated through its nodes", id)));
            }
        }
        self.reset_progress(executable);
        self.drive(executable, |m| m.validate_done(ok))
    }

    // ── Execution ───────────────────────────────────────────────────────

    /// Queue execution of `executable` and everything it depends on.
    ///
    /// Plain unlocked flows execute all their armed nodes. Nothing is queued
    /// while an input in the execution set is unconnected.
    pub fn execute(&mut self, executable: Executable) -> Result<()> {
        let (flow, target) = match executable {
            Executable::Flow(id) if !self.is_atom(id) => return self.execute_all(id),
            _ => match self.parent_flow(executable) {
                Some(parent) => (parent, Some(executable)),
                None => return Err(FlowEngineError::unknown(format!("{:?}", executable))),
            },
        };
        let nodes = self.node_set_list(flow, target, true, true);
        self.queue_execution(flow, nodes)
    }

    /// Queue execution of all armed executables of `flow`.
    pub fn execute_all(&mut self, flow: FlowId) -> Result<()> {
        let nodes = self.node_set_list(flow, None, true, true);
        self.queue_execution(flow, nodes)
    }

    fn queue_execution(&mut self, flow: FlowId, nodes: Vec<Executable>) -> Result<()> {
        if nodes.is_empty() {
            log::debug!("Nothing to execute in {}", flow);
            return Ok(());
        }
        match self.check_floating_inputs(flow, &nodes) {
            Err(FlowEngineError::FloatingInput(name)) => {
                log::debug!("Not executing {}: floating input on '{}'", flow, name);
                Ok(())
            }
            Err(e) => Err(e),
            Ok(()) => {
                self.context.request(HostRequest::Execute(nodes));
                Ok(())
            }
        }
    }

    fn check_floating_inputs(&self, flow: FlowId, nodes: &[Executable]) -> Result<()> {
        let scope = self.parent_flow(nodes[0]).unwrap_or(flow);
        for error in validate_flow(self, scope) {
            if let ValidationError::FloatingInput { executable, port } = error {
                if nodes.contains(&executable) {
                    return Err(FlowEngineError::FloatingInput(port));
                }
            }
        }
        for executable in nodes {
            if let Executable::Node(id) = executable {
                if !self.inputs_are_connected(*id)? {
                    return Err(FlowEngineError::FloatingInput(self.node(*id)?.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// The executor picked up the executable.
    pub fn set_queued(&mut self, executable: Executable) -> Result<()> {
        self.set_running(executable, StateEvent::Queued)
    }

    /// The executor started the executable.
    pub fn set_started(&mut self, executable: Executable) -> Result<()> {
        self.set_running(executable, StateEvent::Executing)
    }

    fn set_running(&mut self, executable: Executable, event: StateEvent) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => {
                let atoms = self.atom_nodes(id);
                if self.is_locked(id) {
                    self.flow_mut(id)?.locked_nodes = atoms.iter().copied().collect();
                }
                for atom in atoms {
                    self.fire(atom, event)?;
                }
                Ok(())
            }
            _ => self.fire(executable, event),
        }
    }

    /// Execution result from the executor.
    ///
    /// `locked` marks results whose data stays inside a locked flow. For
    /// plain flows it defaults to `true` and applies to every atom node
    /// except those feeding the flow's own outputs.
    pub fn set_done(&mut self, executable: Executable, ok: bool, locked: Option<bool>) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => self.set_flow_done(id, ok, locked.unwrap_or(true)),
            _ => match self.locked_parent(executable) {
                Some(flow) => self.set_child_done(flow, executable, ok, locked),
                None => self.finish(executable, ok, locked.unwrap_or(false)),
            },
        }
    }

    /// Nearest locked flow directly containing the executable.
    fn locked_parent(&self, executable: Executable) -> Option<FlowId> {
        self.parent_flow(executable).filter(|f| self.is_locked(*f))
    }

    fn finish(&mut self, executable: Executable, ok: bool, locked: bool) -> Result<()> {
        self.drive(executable, |m| m.execute_done(ok, locked))
    }

    fn set_flow_done(&mut self, flow: FlowId, ok: bool, locked: bool) -> Result<()> {
        if self.is_empty(flow) {
            return Ok(());
        }
        let contained: HashSet<Executable> = self.contained_output_node_set(flow)?.into_iter().collect();
        let atoms = self.atom_nodes(flow);

        self.flow_mut(flow)?.in_child_done = true;
        let result = atoms
            .into_iter()
            .try_for_each(|atom| self.finish(atom, ok, locked && !contained.contains(&atom)));
        self.end_child_done(flow)?;
        result
    }

    /// Result of one executable inside a locked flow.
    pub fn set_child_done(&mut self, flow: FlowId, child: Executable, ok: bool, locked: Option<bool>) -> Result<()> {
        let explicit = locked == Some(true);
        let locked = locked.unwrap_or_else(|| self.is_locked(flow));
        let keep_locked = explicit || (locked && !self.contained_output_node_set(flow)?.contains(&child));

        self.flow_mut(flow)?.in_child_done = true;
        let result = self.finish(child, ok, keep_locked);
        self.end_child_done(flow)?;
        result
    }

    fn end_child_done(&mut self, flow: FlowId) -> Result<()> {
        let finished: Vec<Executable> = self
            .flow(flow)?
            .locked_nodes
            .iter()
            .copied()
            .filter(|n| self.check(*n, |s| s.is_done() || s.in_error_state()))
            .collect();
        let f = self.flow_mut(flow)?;
        f.in_child_done = false;
        for node in finished {
            f.locked_nodes.remove(&node);
        }
        self.update_state(flow, false)
    }

    /// Executables feeding the parent outputs of `flow`.
    pub fn output_node_set(&self, flow: FlowId) -> Result<Vec<Executable>> {
        let mut result = Vec::new();
        for output in self.flow(flow)?.outputs.iter() {
            let owner = self
                .source_port(*output, true, false)
                .and_then(|p| self.ports.get(&p))
                .and_then(|p| p.owner.executable());
            if let Some(owner) = owner {
                if !result.contains(&owner) {
                    result.push(owner);
                }
            }
        }
        Ok(result)
    }

    /// The output node set restricted to executables inside `flow`.
    pub fn contained_output_node_set(&self, flow: FlowId) -> Result<Vec<Executable>> {
        Ok(self
            .output_node_set(flow)?
            .into_iter()
            .filter(|e| {
                self.parent_flow(*e)
                    .is_some_and(|parent| parent == flow || self.ancestors(parent).contains(&flow))
            })
            .collect())
    }

    /// Stop in-flight work.
    ///
    /// For plain flows the graph is walked breadth first from its entry; the
    /// first queued or executing executable on each branch is aborted and
    /// nothing behind it. A locked flow is aborted as one unit: its nodes
    /// change state but only the flow is sent to the executor.
    pub fn abort(&mut self, executable: Executable) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => {
                let queued = self.context.pending_requests().len();
                let mut frontier = Vec::new();
                crate::traversal::breadth_first(self.entry_elements(id), |element| {
                    match element.executable() {
                        Some(e) if self.check(e, |s| s.is_queued() || s.is_executing()) => {
                            frontier.push(e);
                            Vec::new()
                        }
                        _ => self.next_elements(element),
                    }
                });
                for e in frontier {
                    self.abort(e)?;
                }
                if self.is_atom(id) {
                    self.context.discard_aborts_since(queued);
                    self.context.request(HostRequest::Abort(executable));
                }
                Ok(())
            }
            _ => {
                if self.check(executable, |s| s.is_abortable()) {
                    self.drive(executable, NodeStateMachine::abort)?;
                }
                Ok(())
            }
        }
    }

    /// The executor confirmed an abort.
    pub fn abort_done(&mut self, executable: Executable) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => {
                for atom in self.atom_nodes(id) {
                    self.abort_done(atom)?;
                }
                Ok(())
            }
            _ => {
                self.reset_progress(executable);
                self.drive(executable, NodeStateMachine::abort_done)
            }
        }
    }

    /// Re-arm executables in the error state.
    pub fn clear_error(&mut self, executable: Executable) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => {
                for child in self.children(id) {
                    self.clear_error(child)?;
                }
                Ok(())
            }
            _ => {
                if self.check(executable, |s| s.in_error_state()) {
                    self.fire(executable, StateEvent::Armed)?;
                }
                Ok(())
            }
        }
    }

    /// Re-arm executables whose output was never materialized. Plain flows
    /// only act when locked, unless `force` is set.
    pub fn clear_locked_done(&mut self, executable: Executable, force: bool) -> Result<()> {
        match executable {
            Executable::Flow(id) if !self.is_lambda(id) => {
                if force || self.is_locked(id) {
                    let f = self.flow(id)?;
                    let subflows = f.subflows.clone();
                    let nodes = f.nodes.clone();
                    for sub in subflows {
                        self.clear_locked_done(Executable::Flow(sub), false)?;
                    }
                    for node in nodes {
                        self.clear_locked_done(Executable::Node(node), false)?;
                    }
                }
                Ok(())
            }
            _ => {
                if self.check(executable, |s| s.in_error_state() || s.is_done_locked()) {
                    self.fire(executable, StateEvent::Armed)?;
                }
                Ok(())
            }
        }
    }

    /// Progress report from the executor, in percent.
    pub fn update_progress(&mut self, node: NodeId, progress: i32) -> Result<()> {
        let n = self.node_mut(node)?;
        if !n.machine.is_executing() || n.progress == progress {
            return Ok(());
        }
        n.progress = progress;
        let flow = n.flow;
        self.emit(FlowEvent::ProgressChanged {
            element: Executable::Node(node),
            progress,
        });
        self.update_flow_progress(flow)
    }
}

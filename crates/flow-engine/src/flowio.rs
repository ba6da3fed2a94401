//! Flow inputs and outputs
//!
//! A [`FlowIo`] is the inside view of one subflow boundary port. A flow
//! input owns an output port feeding the subflow's contents; a flow output
//! owns an input port collecting a result. When the flow has a parent, each
//! one can have a parent port on the subflow in the containing flow. The
//! inner port and the parent port mirror each other.

use serde::{Deserialize, Serialize};

use crate::capabilities::{GraphElement, HasPorts};
use crate::constants::defaults;
use crate::document::{Document, Position};
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::ids::{generate_uuid, ElementId, FlowId, FlowIoId, PortId};
use crate::port::{PortDefinition, PortKind, PortOwner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowIoKind {
    Input,
    Output,
}

impl FlowIoKind {
    /// Kind of the inner port.
    fn inner_port_kind(self) -> PortKind {
        match self {
            Self::Input => PortKind::Output,
            Self::Output => PortKind::Input,
        }
    }

    /// Kind of the parent port on the subflow.
    fn parent_port_kind(self) -> PortKind {
        match self {
            Self::Input => PortKind::Input,
            Self::Output => PortKind::Output,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowIo {
    pub(crate) id: FlowIoId,
    pub(crate) uuid: String,
    pub(crate) kind: FlowIoKind,
    pub(crate) flow: FlowId,
    pub(crate) position: Position,
    /// Inner port, assigned by `create_port`
    pub(crate) port: PortId,
    pub(crate) parent_port: Option<PortId>,
    pub(crate) definition: PortDefinition,
}

impl FlowIo {
    pub fn id(&self) -> FlowIoId {
        self.id
    }

    pub fn kind(&self) -> FlowIoKind {
        self.kind
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn parent_port(&self) -> Option<PortId> {
        self.parent_port
    }

    pub fn definition(&self) -> &PortDefinition {
        &self.definition
    }
}

impl GraphElement for FlowIo {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        Some(self.flow)
    }
}

impl HasPorts for FlowIo {
    fn input_ports(&self) -> &[PortId] {
        match self.kind {
            FlowIoKind::Input => &[],
            FlowIoKind::Output => std::slice::from_ref(&self.port),
        }
    }

    fn output_ports(&self) -> &[PortId] {
        match self.kind {
            FlowIoKind::Input => std::slice::from_ref(&self.port),
            FlowIoKind::Output => &[],
        }
    }
}

impl Document {
    /// Create a flow input. Without a definition the port accepts any type;
    /// `create_parent_port` defaults to true except in lambdas.
    pub fn create_flow_input(
        &mut self,
        flow: FlowId,
        definition: Option<PortDefinition>,
        create_parent_port: Option<bool>,
    ) -> Result<FlowIoId> {
        let definition = definition.unwrap_or_else(|| PortDefinition::any(defaults::FLOW_INPUT_NAME));
        self.create_flow_io(flow, FlowIoKind::Input, definition, create_parent_port)
    }

    pub fn create_flow_output(
        &mut self,
        flow: FlowId,
        definition: Option<PortDefinition>,
        create_parent_port: Option<bool>,
    ) -> Result<FlowIoId> {
        let definition = definition.unwrap_or_else(|| PortDefinition::any(defaults::FLOW_OUTPUT_NAME));
        self.create_flow_io(flow, FlowIoKind::Output, definition, create_parent_port)
    }

    fn create_flow_io(
        &mut self,
        flow: FlowId,
        kind: FlowIoKind,
        definition: PortDefinition,
        create_parent_port: Option<bool>,
    ) -> Result<FlowIoId> {
        let (has_parent, is_lambda) = {
            let f = self.flow(flow)?;
            (f.parent.is_some(), f.is_lambda())
        };
        let create_parent_port = create_parent_port.unwrap_or(!is_lambda) && has_parent;

        let id = FlowIoId(self.next_id());
        self.flow_ios.insert(
            id,
            FlowIo {
                id,
                uuid: generate_uuid(),
                kind,
                flow,
                position: Position::default(),
                port: PortId(usize::MAX),
                parent_port: None,
                definition: definition.clone(),
            },
        );
        let f = self.flow_mut(flow)?;
        f.add_vertex(ElementId::FlowIo(id));
        match kind {
            FlowIoKind::Input => f.flow_inputs.push(id),
            FlowIoKind::Output => f.flow_outputs.push(id),
        }
        self.create_port(PortOwner::FlowIo(id), kind.inner_port_kind(), definition, None)?;

        self.emit(match kind {
            FlowIoKind::Input => FlowEvent::FlowInputCreated { flow, flow_io: id },
            FlowIoKind::Output => FlowEvent::FlowOutputCreated { flow, flow_io: id },
        });
        log::debug!("Created {:?} {} in {}", kind, id, flow);

        if create_parent_port {
            self.create_parent_port(id)?;
        }
        self.infer_all()?;
        self.revalidate_lambdas(flow)?;
        Ok(id)
    }

    /// Give a flow input or output a mirrored port on its subflow.
    ///
    /// Returns the existing parent port when there already is one.
    pub fn create_parent_port(&mut self, flow_io: FlowIoId) -> Result<PortId> {
        let (kind, flow, inner, definition, existing) = {
            let io = self.flow_io(flow_io)?;
            (io.kind, io.flow, io.port, io.definition.clone(), io.parent_port)
        };
        if let Some(existing) = existing {
            return Ok(existing);
        }
        if self.flow(flow)?.parent.is_none() {
            return Err(FlowEngineError::not_supported("The root flow has no parent ports"));
        }

        let index = self.parent_port_index(flow, flow_io)?;
        let parent = self.create_port(PortOwner::Flow(flow), kind.parent_port_kind(), definition, Some(index))?;
        self.port_mut(parent)?.mirror = Some(inner);
        self.port_mut(inner)?.mirror = Some(parent);
        self.flow_io_mut(flow_io)?.parent_port = Some(parent);
        self.infer_all()?;

        if kind == FlowIoKind::Input {
            // Consumers of the flow input now depend on an unconnected port.
            self.input_connection_removed(parent)?;
        }
        Ok(parent)
    }

    /// Position of a new parent port: after the parent ports of the flow
    /// inputs or outputs listed before `flow_io`.
    fn parent_port_index(&self, flow: FlowId, flow_io: FlowIoId) -> Result<usize> {
        let f = self.flow(flow)?;
        let siblings = match self.flow_io(flow_io)?.kind {
            FlowIoKind::Input => &f.flow_inputs,
            FlowIoKind::Output => &f.flow_outputs,
        };
        Ok(siblings
            .iter()
            .take_while(|id| **id != flow_io)
            .filter(|id| self.flow_ios.get(id).is_some_and(|io| io.parent_port.is_some()))
            .count())
    }

    /// Remove the parent port of a flow input or output, disconnecting it.
    pub fn delete_parent_port(&mut self, flow_io: FlowIoId) -> Result<()> {
        let Some(parent) = self.flow_io(flow_io)?.parent_port else {
            return Ok(());
        };
        let flow = self.flow_io(flow_io)?.flow;
        self.disconnect_port(parent)?;
        self.flow_io_mut(flow_io)?.parent_port = None;
        self.remove_port(parent)?;
        self.infer_all()?;
        self.revalidate_lambdas(flow)
    }

    pub fn remove_flow_input(&mut self, flow_io: FlowIoId) -> Result<()> {
        if self.flow_io(flow_io)?.kind != FlowIoKind::Input {
            return Err(FlowEngineError::not_supported(format!("{} is not a flow input", flow_io)));
        }
        self.remove_flow_io(flow_io)
    }

    pub fn remove_flow_output(&mut self, flow_io: FlowIoId) -> Result<()> {
        if self.flow_io(flow_io)?.kind != FlowIoKind::Output {
            return Err(FlowEngineError::not_supported(format!("{} is not a flow output", flow_io)));
        }
        self.remove_flow_io(flow_io)
    }

    fn remove_flow_io(&mut self, flow_io: FlowIoId) -> Result<()> {
        self.delete_parent_port(flow_io)?;
        let (kind, flow, port) = {
            let io = self.flow_io(flow_io)?;
            (io.kind, io.flow, io.port)
        };
        self.remove_port(port)?;

        let f = self.flow_mut(flow)?;
        f.remove_vertex(ElementId::FlowIo(flow_io))?;
        f.flow_inputs.retain(|id| *id != flow_io);
        f.flow_outputs.retain(|id| *id != flow_io);
        if let Some(parts) = f.lambda_mut() {
            if parts.flow_output == Some(flow_io) {
                parts.flow_output = None;
            }
        }
        self.flow_ios.remove(&flow_io);

        self.emit(match kind {
            FlowIoKind::Input => FlowEvent::FlowInputRemoved { flow, flow_io },
            FlowIoKind::Output => FlowEvent::FlowOutputRemoved { flow, flow_io },
        });
        self.infer_all()?;
        self.revalidate_lambdas(flow)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::tests::document;
    use crate::events::VecEventSink;
    use crate::ids::Executable;
    use crate::state_machine::NodeState;

    #[test]
    fn test_flow_input_mirrors_parent_port() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();

        let io = doc.flow_io(fi).unwrap();
        let parent = io.parent_port().unwrap();
        assert_eq!(doc.port(io.port()).unwrap().kind(), PortKind::Output);
        assert_eq!(doc.port(io.port()).unwrap().mirror(), Some(parent));
        assert_eq!(doc.port(parent).unwrap().mirror(), Some(io.port()));
        assert_eq!(doc.port(parent).unwrap().owner(), PortOwner::Flow(sub));
        assert_eq!(doc.flow(sub).unwrap().input_ports(), &[parent]);
        assert_eq!(io.output_ports(), &[io.port()]);
        assert!(io.input_ports().is_empty());
    }

    #[test]
    fn test_root_flow_io_has_no_parent_port() {
        let mut doc = document();
        let root = doc.root();
        let fo = doc.create_flow_output(root, None, Some(true)).unwrap();
        assert!(doc.flow_io(fo).unwrap().parent_port().is_none());
        assert!(doc.create_parent_port(fo).is_err());
    }

    #[test]
    fn test_parent_ports_follow_flow_io_order() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let first = doc.create_flow_input(sub, None, Some(false)).unwrap();
        let second = doc.create_flow_input(sub, None, None).unwrap();

        let parent = doc.create_parent_port(first).unwrap();
        let second_parent = doc.flow_io(second).unwrap().parent_port().unwrap();
        assert_eq!(doc.flow(sub).unwrap().input_ports(), &[parent, second_parent]);
        assert_eq!(doc.create_parent_port(first).unwrap(), parent);
    }

    #[test]
    fn test_types_flow_through_the_boundary() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let source_out = doc.node(source).unwrap().outputs[0];
        let parent = doc.flow_io(fi).unwrap().parent_port().unwrap();

        doc.create_connection(root, source_out, parent).unwrap();
        let inner = doc.flow_io(fi).unwrap().port();
        assert_eq!(doc.port(inner).unwrap().datatype().to_string(), "sytable");
    }

    #[test]
    fn test_parent_input_arms_inner_nodes() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();
        let inner = doc.create_node(sub, "test.table", Position::default()).unwrap();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let fi_port = doc.flow_io(fi).unwrap().port();
        let parent = doc.flow_io(fi).unwrap().parent_port().unwrap();
        let inner_in = doc.node(inner).unwrap().inputs[0];
        let source_out = doc.node(source).unwrap().outputs[0];

        doc.create_connection(sub, fi_port, inner_in).unwrap();
        doc.validate_done(Executable::Node(source), true).unwrap();
        doc.validate_done(Executable::Node(inner), true).unwrap();
        assert_eq!(doc.node(inner).unwrap().machine().state(), NodeState::Valid);

        doc.create_connection(root, source_out, parent).unwrap();
        assert_eq!(doc.node(inner).unwrap().machine().state(), NodeState::Armed);

        doc.delete_parent_port(fi).unwrap();
        assert!(doc.port(parent).is_err());
        assert_eq!(doc.node(inner).unwrap().machine().state(), NodeState::Valid);
    }

    #[test]
    fn test_remove_flow_io_cleans_up() {
        let mut doc = document();
        let root = doc.root();
        let sink = Arc::new(VecEventSink::new());
        doc.context_mut().add_sink(sink.clone());
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let fo = doc.create_flow_output(sub, None, None).unwrap();
        let port = doc.flow_io(fo).unwrap().port();
        let parent = doc.flow_io(fo).unwrap().parent_port().unwrap();

        assert!(doc.remove_flow_input(fo).is_err());
        doc.remove_flow_output(fo).unwrap();
        assert!(doc.flow_io(fo).is_err());
        assert!(doc.port(port).is_err());
        assert!(doc.port(parent).is_err());
        assert!(doc.flow(sub).unwrap().flow_outputs().is_empty());
        assert!(doc.flow(sub).unwrap().output_ports().is_empty());
        assert!(sink
            .events()
            .contains(&FlowEvent::FlowOutputRemoved { flow: sub, flow_io: fo }));
    }
}

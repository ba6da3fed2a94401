//! Connections between ports
//!
//! A connection is an edge from an output port vertex to an input port
//! vertex inside one flow graph. Creating one runs type inference, hands the
//! source's filename to the destination and lets the destination re-arm.

use serde::{Deserialize, Serialize};

use crate::capabilities::GraphElement;
use crate::document::Document;
use crate::error::{FlowEngineError, Result};
use crate::events::FlowEvent;
use crate::ids::{generate_uuid, ConnectionId, ElementId, FlowId, PortId};
use crate::port::PortOwner;

/// Bend point of a drawn connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) uuid: String,
    pub(crate) source: PortId,
    pub(crate) destination: PortId,
    pub(crate) flow: FlowId,
    pub(crate) route_points: Vec<RoutePoint>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn source(&self) -> PortId {
        self.source
    }

    pub fn destination(&self) -> PortId {
        self.destination
    }

    pub fn flow(&self) -> FlowId {
        self.flow
    }

    pub fn route_points(&self) -> &[RoutePoint] {
        &self.route_points
    }
}

impl GraphElement for Connection {
    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn owner_flow(&self) -> Option<FlowId> {
        Some(self.flow)
    }
}

impl Document {
    /// Why `source` cannot be connected to `destination`, if it cannot.
    ///
    /// Types are not compared inside a delayed inference transaction. Pairs
    /// that do not unify are removed when the transaction ends.
    fn connection_refusal(&self, flow: FlowId, source: PortId, destination: PortId) -> Result<Option<&'static str>> {
        let src = self.port(source)?;
        let dst = self.port(destination)?;
        let reason = if !src.is_output() || !dst.is_input() {
            Some("connections go from an output to an input")
        } else if src.owner == dst.owner {
            Some("ports belong to the same element")
        } else if src.flow != flow || dst.flow != flow {
            Some("ports are not in the same flow")
        } else if !self.context.in_delayed_inference() && !src.matches(dst) {
            Some("port types do not match")
        } else if self.is_connected(destination) {
            Some("input is already connected")
        } else {
            None
        };
        Ok(reason)
    }

    /// Whether `source` may be connected to `destination` inside `flow`.
    pub fn connection_is_allowed(&self, flow: FlowId, source: PortId, destination: PortId) -> bool {
        matches!(self.connection_refusal(flow, source, destination), Ok(None))
    }

    pub fn connection_between(&self, source: PortId, destination: PortId) -> Option<ConnectionId> {
        let flow = self.flows.get(&self.ports.get(&destination)?.flow)?;
        flow.connections.iter().copied().find(|c| {
            self.connections
                .get(c)
                .is_some_and(|c| c.source == source && c.destination == destination)
        })
    }

    /// Connect `source` to `destination`. Connecting an already connected
    /// pair returns the existing connection.
    pub fn create_connection(&mut self, flow: FlowId, source: PortId, destination: PortId) -> Result<ConnectionId> {
        if let Some(existing) = self.connection_between(source, destination) {
            return Ok(existing);
        }
        let port_name = |doc: &Self, port: PortId| doc.port(port).map(|p| format!("{} ({})", p.name(), p.id));
        let (output, input) = (port_name(self, source)?, port_name(self, destination)?);

        if let Some(reason) = self.connection_refusal(flow, source, destination)? {
            return Err(FlowEngineError::not_allowed(output, input, reason));
        }
        if self.context.config.reject_cycles && self.would_create_cycle(source, destination) {
            return Err(FlowEngineError::CycleDetected { output, input });
        }
        self.infer_connect(source, Some(destination), false, false)?;

        let id = ConnectionId(self.next_id());
        self.connections.insert(
            id,
            Connection {
                id,
                uuid: generate_uuid(),
                source,
                destination,
                flow,
                route_points: Vec::new(),
            },
        );
        let f = self.flow_mut(flow)?;
        f.add_edge(ElementId::Port(source), ElementId::Port(destination))?;
        f.connections.push(id);
        log::debug!("Connected {} -> {} in {}", source, destination, flow);

        let filename = self.port(source)?.filename.clone();
        self.assign_filename(destination, filename)?;

        self.emit(FlowEvent::ConnectionCreated { flow, connection: id });
        for ancestor in self.ancestors(flow) {
            self.emit(FlowEvent::RecursiveConnectionCreated {
                flow: ancestor,
                connection: id,
            });
        }

        self.input_connection_added(destination)?;
        self.revalidate_lambdas(flow)?;
        Ok(id)
    }

    pub fn remove_connection(&mut self, connection: ConnectionId) -> Result<()> {
        let (source, destination, flow) = {
            let c = self.connection(connection)?;
            (c.source, c.destination, c.flow)
        };

        self.emit(FlowEvent::ConnectionRemoved { flow, connection });
        for ancestor in self.ancestors(flow) {
            self.emit(FlowEvent::RecursiveConnectionRemoved {
                flow: ancestor,
                connection,
            });
        }
        let f = self.flow_mut(flow)?;
        f.remove_edge(ElementId::Port(source), ElementId::Port(destination))?;
        f.connections.retain(|c| *c != connection);
        self.connections.remove(&connection);
        log::debug!("Disconnected {} -> {} in {}", source, destination, flow);

        self.infer_connect(source, Some(destination), true, false)?;
        self.assign_filename(destination, String::new())?;
        self.input_connection_removed(destination)?;
        self.revalidate_lambdas(flow)
    }

    /// Remove every connection of a port.
    pub fn disconnect_port(&mut self, port: PortId) -> Result<()> {
        let connections = if self.port(port)?.is_input() {
            self.input_connection_to_port(port).into_iter().collect()
        } else {
            self.output_connections_from_port(port)
        };
        for connection in connections {
            self.remove_connection(connection)?;
        }
        Ok(())
    }

    /// Hand the filename of an output port to everything it feeds.
    pub(crate) fn propagate_filename(&mut self, output: PortId) -> Result<()> {
        let filename = self.port(output)?.filename.clone();
        let destinations: Vec<PortId> = self
            .output_connections_from_port(output)
            .into_iter()
            .filter_map(|c| self.connections.get(&c).map(|c| c.destination))
            .collect();
        for destination in destinations {
            self.assign_filename(destination, filename.clone())?;
        }
        Ok(())
    }

    /// Set the filename of an input port. Parent inputs of subflows pass it
    /// on through their flow input.
    fn assign_filename(&mut self, input: PortId, filename: String) -> Result<()> {
        let port = self.port_mut(input)?;
        port.filename = filename.clone();
        let forward = match port.owner {
            PortOwner::Flow(_) => port.mirror,
            _ => None,
        };
        if let Some(mirror) = forward {
            self.port_mut(mirror)?.filename = filename;
            self.propagate_filename(mirror)?;
        }
        Ok(())
    }

    /// Insert a route point at `index`, appending when past the end.
    pub fn add_route_point(&mut self, connection: ConnectionId, index: usize, x: f64, y: f64) -> Result<usize> {
        let c = self.connection_mut(connection)?;
        let index = index.min(c.route_points.len());
        c.route_points.insert(index, RoutePoint { x, y });
        self.emit(FlowEvent::RoutePointAdded { connection, index });
        Ok(index)
    }

    pub fn remove_route_point(&mut self, connection: ConnectionId, index: usize) -> Result<RoutePoint> {
        let c = self.connection_mut(connection)?;
        if index >= c.route_points.len() {
            return Err(FlowEngineError::unknown(format!("route point {} of {}", index, connection)));
        }
        let point = c.route_points.remove(index);
        self.emit(FlowEvent::RoutePointRemoved { connection, index });
        Ok(point)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::document::tests::document;
    use crate::document::Position;
    use crate::events::VecEventSink;
    use crate::ids::NodeId;

    fn pair(doc: &mut Document) -> (NodeId, NodeId, PortId, PortId) {
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let out = doc.node(a).unwrap().outputs[0];
        let inp = doc.node(b).unwrap().inputs[0];
        (a, b, out, inp)
    }

    #[test]
    fn test_create_connection_is_idempotent() {
        let mut doc = document();
        let root = doc.root();
        let (_, _, out, inp) = pair(&mut doc);

        let first = doc.create_connection(root, out, inp).unwrap();
        let second = doc.create_connection(root, out, inp).unwrap();
        assert_eq!(first, second);
        assert_eq!(doc.flow(root).unwrap().connections().len(), 1);
        assert_eq!(doc.connection_between(out, inp), Some(first));
    }

    #[test]
    fn test_connection_rules() {
        let mut doc = document();
        let root = doc.root();
        let (a, b, out, inp) = pair(&mut doc);
        let b_out = doc.node(b).unwrap().outputs[0];
        let other = doc.create_node(root, "test.source", Position::default()).unwrap();
        let other_out = doc.node(other).unwrap().outputs[0];

        assert!(!doc.connection_is_allowed(root, inp, out));
        assert!(!doc.connection_is_allowed(root, b_out, inp));
        assert!(doc.connection_is_allowed(root, out, inp));

        doc.create_connection(root, out, inp).unwrap();
        assert!(!doc.connection_is_allowed(root, other_out, inp));
        assert!(matches!(
            doc.create_connection(root, other_out, inp),
            Err(FlowEngineError::ConnectionNotAllowed { .. })
        ));
        assert!(doc.node(a).is_ok());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.table", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let (a_in, a_out) = (doc.node(a).unwrap().inputs[0], doc.node(a).unwrap().outputs[0]);
        let (b_in, b_out) = (doc.node(b).unwrap().inputs[0], doc.node(b).unwrap().outputs[0]);

        doc.create_connection(root, a_out, b_in).unwrap();
        assert!(matches!(
            doc.create_connection(root, b_out, a_in),
            Err(FlowEngineError::CycleDetected { .. })
        ));
        assert_eq!(doc.flow(root).unwrap().connections().len(), 1);
    }

    #[test]
    fn test_filenames_follow_connections() {
        let mut doc = document();
        let root = doc.root();
        let (_, _, out, inp) = pair(&mut doc);
        let filename = doc.port(out).unwrap().filename().to_string();
        assert!(!filename.is_empty());

        let connection = doc.create_connection(root, out, inp).unwrap();
        assert_eq!(doc.port(inp).unwrap().filename(), filename);

        doc.remove_connection(connection).unwrap();
        assert!(doc.port(inp).unwrap().filename().is_empty());
        assert!(!doc.is_connected(inp));
    }

    #[test]
    fn test_connection_events_reach_ancestors() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let a = doc.create_node(sub, "test.source", Position::default()).unwrap();
        let b = doc.create_node(sub, "test.table", Position::default()).unwrap();
        let out = doc.node(a).unwrap().outputs[0];
        let inp = doc.node(b).unwrap().inputs[0];

        let sink = Arc::new(VecEventSink::new());
        doc.context_mut().add_sink(sink.clone());
        let connection = doc.create_connection(sub, out, inp).unwrap();

        let events = sink.events();
        assert!(events.contains(&FlowEvent::ConnectionCreated { flow: sub, connection }));
        assert!(events.contains(&FlowEvent::RecursiveConnectionCreated { flow: root, connection }));
    }

    #[test]
    fn test_route_points() {
        let mut doc = document();
        let root = doc.root();
        let (_, _, out, inp) = pair(&mut doc);
        let connection = doc.create_connection(root, out, inp).unwrap();

        assert_eq!(doc.add_route_point(connection, 0, 1.0, 1.0).unwrap(), 0);
        assert_eq!(doc.add_route_point(connection, 9, 2.0, 2.0).unwrap(), 1);
        assert_eq!(doc.add_route_point(connection, 1, 3.0, 3.0).unwrap(), 1);
        let xs: Vec<f64> = doc.connection(connection).unwrap().route_points().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![1.0, 3.0, 2.0]);

        assert_eq!(doc.remove_route_point(connection, 0).unwrap().x, 1.0);
        assert!(doc.remove_route_point(connection, 5).is_err());
    }
}

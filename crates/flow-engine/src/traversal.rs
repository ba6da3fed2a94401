//! Dataflow traversal
//!
//! Walks the flow graphs to find where data comes from and goes to,
//! optionally crossing subflow boundaries through mirrored ports, and
//! derives execution order from the result.
//!
//! With `atom` set, atom flows (locked subflows and lambdas) are treated as
//! single executables instead of being entered.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::capabilities::HasPorts;
use crate::document::Document;
use crate::graph::{to_graph_mapping, CycleDetection, DocumentGraph, TopologicalSort, VertexId};
use crate::ids::{ConnectionId, ElementId, Executable, FlowId, PortId};
use crate::port::{PortKind, PortOwner};

impl Document {
    /// First predecessor of an element in its flow graph.
    pub(crate) fn source_element(&self, element: ElementId) -> Option<ElementId> {
        let flow = self.flows.get(&self.graph_flow(element)?)?;
        let vertex = flow.vertex(element)?;
        let source = flow.graph.first_predecessor(vertex)?;
        if flow.graph.is_sentinel(source) {
            return None;
        }
        flow.element(source)
    }

    fn successor_elements(&self, element: ElementId) -> Vec<ElementId> {
        let Some(flow) = self.graph_flow(element).and_then(|f| self.flows.get(&f)) else {
            return Vec::new();
        };
        let Some(vertex) = flow.vertex(element) else {
            return Vec::new();
        };
        flow.graph
            .graph()
            .successors(vertex)
            .filter(|v| !flow.graph.is_sentinel(*v))
            .filter_map(|v| flow.element(v))
            .collect()
    }

    fn port_owner(&self, port: PortId) -> Option<PortOwner> {
        self.ports.get(&port).map(|p| p.owner)
    }

    fn mirror(&self, port: PortId) -> Option<PortId> {
        self.ports.get(&port).and_then(|p| p.mirror)
    }

    /// Output port feeding `port`.
    pub fn source_port(&self, port: PortId, traverse_subflows: bool, atom: bool) -> Option<PortId> {
        if traverse_subflows {
            self.source_port_traverse(port, atom)
        } else {
            self.source_port_no_traverse(port)
        }
    }

    /// Source port crossing subflow boundaries: into subflows through
    /// their flow outputs and out of them through their flow inputs.
    pub fn source_port_traverse(&self, port: PortId, atom: bool) -> Option<PortId> {
        let mut element = ElementId::Port(port);
        let mut previous: Option<PortId> = None;
        // Each step moves along one edge or boundary; bounded by the
        // number of ports.
        for _ in 0..=self.ports.len() * 2 + 1 {
            match element {
                ElementId::Node(_) | ElementId::TextField(_) => return previous,
                ElementId::FlowIo(id) => match self.flow_ios.get(&id).and_then(|io| io.parent_port) {
                    Some(parent) => element = ElementId::Port(parent),
                    None => return previous,
                },
                ElementId::Flow(flow) => {
                    let prev = previous?;
                    let mirror = self.mirror(prev);
                    if self.is_atom(flow) && (atom || mirror.is_none()) {
                        return Some(prev);
                    }
                    element = ElementId::Port(mirror?);
                }
                ElementId::Port(p) => {
                    let next = self.source_element(ElementId::Port(p))?;
                    previous = Some(p);
                    element = next;
                }
            }
        }
        Document::consistency_guard(false, || format!("Source traversal from {} did not terminate", port));
        None
    }

    /// Source port within the port's own flow.
    pub fn source_port_no_traverse(&self, port: PortId) -> Option<PortId> {
        let mut previous = port;
        let mut element = self.source_element(ElementId::Port(port))?;
        while let ElementId::Port(p) = element {
            previous = p;
            element = self.source_element(element)?;
        }
        (previous != port).then_some(previous)
    }

    /// Input ports fed by `port`.
    ///
    /// With `both`, the intermediate boundary ports are included as well.
    pub fn destination_ports(&self, port: PortId, traverse_subflows: bool, both: bool, atom: bool) -> Vec<PortId> {
        let mut result = Vec::new();
        self.collect_destinations(port, traverse_subflows, both, atom, &mut result, &mut HashSet::new());
        result
    }

    fn collect_destinations(
        &self,
        port: PortId,
        traverse: bool,
        both: bool,
        atom: bool,
        result: &mut Vec<PortId>,
        visited: &mut HashSet<PortId>,
    ) {
        if !visited.insert(port) {
            return;
        }
        let Some(p) = self.ports.get(&port) else {
            return;
        };
        match (p.kind, p.owner) {
            (PortKind::Input, PortOwner::Node(_)) => result.push(port),
            (PortKind::Input, PortOwner::FlowIo(io)) => {
                let parent = self.flow_ios.get(&io).and_then(|io| io.parent_port);
                match (traverse, parent) {
                    (true, Some(parent)) => {
                        if both {
                            result.push(port);
                        }
                        self.collect_destinations(parent, traverse, both, atom, result, visited);
                    }
                    _ => result.push(port),
                }
            }
            (PortKind::Input, PortOwner::Flow(flow)) => {
                if atom && self.is_atom(flow) {
                    result.push(port);
                } else if let (true, Some(mirror)) = (traverse, p.mirror) {
                    if both {
                        result.push(port);
                    }
                    self.collect_destinations(mirror, traverse, both, atom, result, visited);
                } else {
                    result.push(port);
                }
            }
            (PortKind::Output, _) => {
                if both {
                    result.push(port);
                }
                for next in self.successor_elements(ElementId::Port(port)) {
                    if let ElementId::Port(next) = next {
                        self.collect_destinations(next, traverse, both, atom, result, visited);
                    }
                }
            }
        }
    }

    /// Whether the port takes part in a connection.
    pub fn is_connected(&self, port: PortId) -> bool {
        let Some(p) = self.ports.get(&port) else {
            return false;
        };
        match p.kind {
            PortKind::Input => matches!(
                self.source_element(ElementId::Port(port)),
                Some(ElementId::Port(source)) if self.ports.get(&source).is_some_and(|s| s.is_output())
            ),
            PortKind::Output => self.successor_elements(ElementId::Port(port)).into_iter().any(|e| {
                matches!(e, ElementId::Port(dst) if self.ports.get(&dst).is_some_and(|d| d.is_input()))
            }),
        }
    }

    pub fn input_connection_to_port(&self, port: PortId) -> Option<ConnectionId> {
        let flow = self.flows.get(&self.ports.get(&port)?.flow)?;
        flow.connections
            .iter()
            .copied()
            .find(|c| self.connections.get(c).is_some_and(|c| c.destination == port))
    }

    pub fn output_connections_from_port(&self, port: PortId) -> Vec<ConnectionId> {
        let Some(flow) = self.ports.get(&port).and_then(|p| self.flows.get(&p.flow)) else {
            return Vec::new();
        };
        flow.connections
            .iter()
            .copied()
            .filter(|c| self.connections.get(c).is_some_and(|c| c.source == port))
            .collect()
    }

    // ── Start and end nodes ─────────────────────────────────────────────

    /// Executables without upstream dependencies inside `flow`.
    pub fn start_nodes(&self, flow: FlowId, all_subflows_as_atom: bool) -> Vec<Executable> {
        let mut result = Vec::new();
        let Some(f) = self.flows.get(&flow) else {
            return result;
        };
        let graph = f.graph.graph();
        let mut visited: HashSet<VertexId> = HashSet::new();
        let mut stack: Vec<VertexId> = graph.successors(f.graph.entry()).collect();
        stack.reverse();

        while let Some(vertex) = stack.pop() {
            if f.graph.is_sentinel(vertex) || !visited.insert(vertex) {
                continue;
            }
            match f.element(vertex) {
                Some(ElementId::Node(node)) => result.push(Executable::Node(node)),
                Some(ElementId::Flow(sub)) => {
                    if all_subflows_as_atom || self.is_atom(sub) {
                        result.push(Executable::Flow(sub));
                    } else {
                        result.extend(self.start_nodes(sub, all_subflows_as_atom));
                    }
                }
                _ => {
                    let mut next: Vec<VertexId> = graph.successors(vertex).collect();
                    next.reverse();
                    stack.extend(next);
                }
            }
        }
        dedup(result)
    }

    /// Executables whose output leaves `flow` or is unused.
    pub fn end_nodes(&self, flow: FlowId) -> Vec<Executable> {
        let mut result = Vec::new();
        let Some(f) = self.flows.get(&flow) else {
            return result;
        };
        let graph = f.graph.graph();
        for source in graph.predecessors(f.graph.exit()) {
            let mut vertex = source;
            loop {
                if f.graph.is_sentinel(vertex) {
                    break;
                }
                match f.element(vertex) {
                    Some(ElementId::Node(node)) => {
                        result.push(Executable::Node(node));
                        break;
                    }
                    Some(ElementId::Flow(sub)) => {
                        if self.is_atom(sub) {
                            result.push(Executable::Flow(sub));
                        } else {
                            result.extend(self.end_nodes(sub));
                        }
                        break;
                    }
                    _ => match f.graph.first_predecessor(vertex) {
                        Some(previous) => vertex = previous,
                        None => break,
                    },
                }
            }
        }
        dedup(result)
    }

    // ── Execution order ─────────────────────────────────────────────────

    fn input_ports_of(&self, owner: PortOwner) -> Vec<PortId> {
        match owner {
            PortOwner::Node(id) => self.nodes.get(&id).map(|n| n.inputs.clone()).unwrap_or_default(),
            PortOwner::Flow(id) => self.flows.get(&id).map(|f| f.inputs.clone()).unwrap_or_default(),
            PortOwner::FlowIo(_) => Vec::new(),
        }
    }

    fn collect_node_graph(
        &self,
        until: PortOwner,
        traversed: &mut HashSet<PortOwner>,
        atom: bool,
        edges: &mut Vec<(PortOwner, PortOwner)>,
    ) {
        if !traversed.insert(until) {
            return;
        }
        let sources: Vec<PortOwner> = self
            .input_ports_of(until)
            .into_iter()
            .filter_map(|p| self.source_port(p, true, atom))
            .filter_map(|p| self.port_owner(p))
            .collect();
        if sources.is_empty() {
            edges.push((until, until));
        }
        for source in sources {
            edges.push((source, until));
            self.collect_node_graph(source, traversed, atom, edges);
        }
    }

    /// Dependency graph of the executables needed for `until`, or for the
    /// end nodes of `flow`.
    pub(crate) fn node_graph(
        &self,
        flow: FlowId,
        until: Option<Executable>,
        atom: bool,
    ) -> (DocumentGraph, HashMap<Executable, VertexId>) {
        let targets = match until {
            Some(executable) => vec![executable],
            None => self.end_nodes(flow),
        };
        let mut traversed = HashSet::new();
        let mut edges = Vec::new();
        for target in &targets {
            self.collect_node_graph(owner_of(*target), &mut traversed, atom, &mut edges);
        }

        let edges: Vec<(Executable, Executable)> = edges
            .into_iter()
            .filter_map(|(s, d)| Some((s.executable()?, d.executable()?)))
            .collect();
        let mut items: Vec<Executable> = Vec::new();
        for (s, d) in &edges {
            for e in [*s, *d] {
                if !items.contains(&e) {
                    items.push(e);
                }
            }
        }
        if items.is_empty() {
            if let Some(executable) = until {
                items.push(executable);
            }
        }
        to_graph_mapping(&items, &edges)
    }

    /// Executables grouped by dependency depth.
    pub fn all_nodes_as_groups(
        &self,
        flow: FlowId,
        until: Option<Executable>,
        remove_invalid: bool,
        atom: bool,
    ) -> Vec<Vec<Executable>> {
        let (graph, mapping) = self.node_graph(flow, until, atom);
        let reverse: HashMap<VertexId, Executable> = mapping.into_iter().map(|(e, v)| (v, e)).collect();

        TopologicalSort::levels(graph.graph(), graph.entry())
            .into_iter()
            .map(|level| {
                level
                    .into_iter()
                    .filter_map(|v| reverse.get(&v).copied())
                    .filter(|e| !remove_invalid || self.check(*e, |s| s.is_armed()))
                    .collect::<Vec<_>>()
            })
            .filter(|level| !level.is_empty())
            .collect()
    }

    /// Flattened, deduplicated execution order.
    pub fn node_set_list(
        &self,
        flow: FlowId,
        until: Option<Executable>,
        remove_invalid: bool,
        atom: bool,
    ) -> Vec<Executable> {
        dedup(
            self.all_nodes_as_groups(flow, until, remove_invalid, atom)
                .into_iter()
                .flatten()
                .collect(),
        )
    }

    /// Every executable below `flow`, atom flows as one unit when `atom`.
    pub fn all_nodes(&self, flow: FlowId, remove_invalid: bool, atom: bool) -> Vec<Executable> {
        let Some(f) = self.flows.get(&flow) else {
            return Vec::new();
        };
        let mut result: Vec<Executable> = f.nodes.iter().map(|n| Executable::Node(*n)).collect();
        for sub in &f.subflows {
            if atom && self.is_atom(*sub) {
                result.push(Executable::Flow(*sub));
            } else {
                result.extend(self.all_nodes(*sub, false, atom));
            }
        }
        if remove_invalid {
            result.retain(|e| self.check(*e, |s| s.is_armed()));
        }
        result
    }

    /// Nodes executed when an atom flow runs, in execution order.
    pub(crate) fn atom_nodes(&self, flow: FlowId) -> Vec<Executable> {
        if !self.is_atom(flow) {
            return Vec::new();
        }
        let contained: HashSet<Executable> = self.all_nodes(flow, false, true).into_iter().collect();
        self.node_set_list(flow, None, false, true)
            .into_iter()
            .filter(|e| contained.contains(e))
            .collect()
    }

    /// Nodes feeding the parent outputs of `flow`.
    pub fn output_nodes(&self, flow: FlowId) -> Vec<Executable> {
        let mut result = Vec::new();
        let Some(f) = self.flows.get(&flow) else {
            return result;
        };
        for output in &f.outputs {
            match self.source_port(*output, true, false).and_then(|p| self.port_owner(p)) {
                Some(PortOwner::Node(node)) => result.push(Executable::Node(node)),
                Some(PortOwner::Flow(sub)) if sub != flow => result.extend(self.output_nodes(sub)),
                _ => {}
            }
        }
        dedup(result)
    }

    /// Nodes reading the parent inputs of `flow`.
    pub fn input_nodes(&self, flow: FlowId) -> Vec<Executable> {
        let mut result = Vec::new();
        let Some(f) = self.flows.get(&flow) else {
            return result;
        };
        for input in &f.inputs {
            for port in self
                .mirror(*input)
                .map(|m| self.destination_ports(m, true, false, false))
                .unwrap_or_default()
            {
                if let Some(PortOwner::Node(node)) = self.port_owner(port) {
                    result.push(Executable::Node(node));
                }
            }
        }
        dedup(result)
    }

    /// Pairs of (flow input port, flow output port) connected directly or
    /// through subflows, without a node in between.
    pub fn bypass_ports(&self, flow: FlowId) -> Vec<(PortId, PortId)> {
        let Some(f) = self.flows.get(&flow) else {
            return Vec::new();
        };
        let in_ports: HashSet<PortId> = f
            .flow_inputs
            .iter()
            .filter_map(|id| self.flow_ios.get(id).map(|io| io.port))
            .collect();

        let mut result = Vec::new();
        for id in &f.flow_outputs {
            let Some(out) = self.flow_ios.get(id).map(|io| io.port) else {
                continue;
            };
            let mut current = Some(out);
            let mut steps = 0;
            while let Some(port) = current {
                if in_ports.contains(&port) || steps > self.ports.len() {
                    break;
                }
                current = self.source_element_cross(port);
                steps += 1;
            }
            if let Some(port) = current.filter(|p| in_ports.contains(p)) {
                result.push((port, out));
            }
        }
        result
    }

    /// Previous port on a dataflow path, crossing into subflows but never
    /// through nodes.
    fn source_element_cross(&self, port: PortId) -> Option<PortId> {
        let p = self.ports.get(&port)?;
        match (p.kind, p.owner) {
            (PortKind::Input, _) => match self.source_element(ElementId::Port(port))? {
                ElementId::Port(source) => Some(source),
                _ => None,
            },
            (PortKind::Output, PortOwner::Node(_)) => None,
            (PortKind::Output, PortOwner::Flow(_)) => p.mirror,
            (PortKind::Output, PortOwner::FlowIo(io)) => self.flow_ios.get(&io)?.parent_port,
        }
    }

    // ── Cycles ──────────────────────────────────────────────────────────

    /// Whether connecting `source` to `destination` closes a dataflow
    /// cycle, following data through subflows and flow inputs/outputs.
    pub fn would_create_cycle(&self, source: PortId, destination: PortId) -> bool {
        let Some(upstream) = self.source_port(source, true, false).and_then(|p| self.port_owner(p)) else {
            return false;
        };
        let downstream: Vec<PortOwner> = self
            .destination_ports(destination, true, false, false)
            .into_iter()
            .filter_map(|p| self.port_owner(p))
            .collect();
        if downstream.is_empty() || matches!(upstream, PortOwner::FlowIo(_)) {
            return false;
        }

        let mut edges = Vec::new();
        let consumers = self
            .nodes
            .values()
            .map(|n| (PortOwner::Node(n.id), n.input_ports().to_vec()))
            .chain(self.flows.values().map(|f| {
                let atomic: Vec<PortId> = f.inputs.iter().copied().filter(|p| self.mirror(*p).is_none()).collect();
                (PortOwner::Flow(f.id), atomic)
            }));
        for (owner, inputs) in consumers {
            for input in inputs {
                if let Some(src) = self.source_port(input, true, false).and_then(|p| self.port_owner(p)) {
                    edges.push((src, owner));
                }
            }
        }
        let mut items = vec![upstream];
        items.extend(downstream.iter().copied());
        let (graph, mapping) = to_graph_mapping(&items, &edges);

        downstream.iter().any(|d| match (mapping.get(&upstream), mapping.get(d)) {
            (Some(u), Some(d)) => CycleDetection::creates_cycle(graph.graph(), *u, *d),
            _ => false,
        })
    }
}

fn owner_of(executable: Executable) -> PortOwner {
    match executable {
        Executable::Node(id) => PortOwner::Node(id),
        Executable::Flow(id) => PortOwner::Flow(id),
    }
}

fn dedup(items: Vec<Executable>) -> Vec<Executable> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|e| seen.insert(*e)).collect()
}

/// Breadth-first walk over elements, used by flow abort.
pub(crate) fn breadth_first<F>(start: Vec<ElementId>, mut visit: F)
where
    F: FnMut(ElementId) -> Vec<ElementId>,
{
    let mut visited: HashSet<ElementId> = HashSet::new();
    let mut queue: VecDeque<ElementId> = start.into();
    while let Some(element) = queue.pop_front() {
        if visited.insert(element) {
            queue.extend(visit(element));
        }
    }
}

impl Document {
    /// Real elements directly after the entry of `flow`.
    pub(crate) fn entry_elements(&self, flow: FlowId) -> Vec<ElementId> {
        let Some(f) = self.flows.get(&flow) else {
            return Vec::new();
        };
        f.graph
            .graph()
            .successors(f.graph.entry())
            .filter(|v| !f.graph.is_sentinel(*v))
            .filter_map(|v| f.element(v))
            .collect()
    }

    /// Real elements directly after `element` in its flow graph.
    pub(crate) fn next_elements(&self, element: ElementId) -> Vec<ElementId> {
        self.successor_elements(element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::document;
    use crate::document::Position;
    use crate::error::FlowEngineError;
    use crate::graph::TopologicalSort;
    use crate::ids::NodeId;

    /// source -> table -> table, plus a detached source.
    fn chain(doc: &mut Document) -> (NodeId, NodeId, NodeId, NodeId) {
        let root = doc.root();
        let a = doc.create_node(root, "test.source", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let c = doc.create_node(root, "test.table", Position::default()).unwrap();
        let d = doc.create_node(root, "test.source", Position::default()).unwrap();
        let a_out = doc.node(a).unwrap().outputs[0];
        let b_in = doc.node(b).unwrap().inputs[0];
        let b_out = doc.node(b).unwrap().outputs[0];
        let c_in = doc.node(c).unwrap().inputs[0];
        doc.create_connection(root, a_out, b_in).unwrap();
        doc.create_connection(root, b_out, c_in).unwrap();
        (a, b, c, d)
    }

    #[test]
    fn test_source_and_destination_ports() {
        let mut doc = document();
        let (a, b, c, _) = chain(&mut doc);
        let a_out = doc.node(a).unwrap().outputs[0];
        let b_in = doc.node(b).unwrap().inputs[0];
        let c_in = doc.node(c).unwrap().inputs[0];

        assert_eq!(doc.source_port(b_in, false, false), Some(a_out));
        assert_eq!(doc.source_port(b_in, true, true), Some(a_out));
        assert_eq!(doc.destination_ports(a_out, true, false, true), vec![b_in]);
        assert!(doc.is_connected(c_in));
        assert!(doc.is_connected(a_out));
        assert!(doc.input_connection_to_port(b_in).is_some());
        assert_eq!(doc.output_connections_from_port(a_out).len(), 1);
    }

    #[test]
    fn test_start_and_end_nodes() {
        let mut doc = document();
        let (a, _, c, d) = chain(&mut doc);
        let root = doc.root();

        let starts = doc.start_nodes(root, true);
        assert!(starts.contains(&Executable::Node(a)));
        assert!(starts.contains(&Executable::Node(d)));
        assert_eq!(starts.len(), 2);

        let ends = doc.end_nodes(root);
        assert!(ends.contains(&Executable::Node(c)));
        assert!(ends.contains(&Executable::Node(d)));
        assert_eq!(ends.len(), 2);
    }

    #[test]
    fn test_node_set_list_orders_by_dependency() {
        let mut doc = document();
        let (a, b, c, d) = chain(&mut doc);
        let root = doc.root();

        let order = doc.node_set_list(root, None, false, true);
        let position = |n: NodeId| order.iter().position(|e| *e == Executable::Node(n)).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(a) < position(b));
        assert!(position(b) < position(c));
        assert!(order.contains(&Executable::Node(d)));

        let until_b = doc.node_set_list(root, Some(Executable::Node(b)), false, true);
        assert_eq!(until_b, vec![Executable::Node(a), Executable::Node(b)]);
    }

    #[test]
    fn test_dependency_depths_increase_along_edges() {
        let mut doc = document();
        chain(&mut doc);
        let root = doc.root();
        let (graph, _) = doc.node_graph(root, None, true);

        let depths = TopologicalSort::dependency_depths(graph.graph(), graph.entry());
        for (_, edge) in graph.graph().edges() {
            assert!(depths[&edge.src] < depths[&edge.dst]);
        }
    }

    #[test]
    fn test_every_real_vertex_is_anchored() {
        let mut doc = document();
        let (a, _, _, _) = chain(&mut doc);
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        doc.create_flow_input(sub, None, None).unwrap();
        doc.remove_node(a).unwrap();

        for flow in doc.flows() {
            let g = flow.graph();
            for vertex in g.real_vertices() {
                assert!(!g.inputs(vertex).is_empty(), "{:?} has no inputs", flow.element(vertex));
                assert!(!g.outputs(vertex).is_empty(), "{:?} has no outputs", flow.element(vertex));
            }
        }
    }

    #[test]
    fn test_traversal_crosses_subflow_boundaries() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let inner = doc.create_node(sub, "test.table", Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();
        let fo = doc.create_flow_output(sub, None, None).unwrap();
        let sink = doc.create_node(root, "test.table", Position::default()).unwrap();

        let source_out = doc.node(source).unwrap().outputs[0];
        let inner_in = doc.node(inner).unwrap().inputs[0];
        let inner_out = doc.node(inner).unwrap().outputs[0];
        let sink_in = doc.node(sink).unwrap().inputs[0];
        let fi_port = doc.flow_io(fi).unwrap().port();
        let fo_port = doc.flow_io(fo).unwrap().port();
        let parent_in = doc.flow_io(fi).unwrap().parent_port().unwrap();
        let parent_out = doc.flow_io(fo).unwrap().parent_port().unwrap();

        doc.create_connection(root, source_out, parent_in).unwrap();
        doc.create_connection(sub, fi_port, inner_in).unwrap();
        doc.create_connection(sub, inner_out, fo_port).unwrap();
        doc.create_connection(root, parent_out, sink_in).unwrap();

        assert_eq!(doc.source_port(inner_in, true, false), Some(source_out));
        assert_eq!(doc.source_port(sink_in, true, false), Some(inner_out));
        assert_eq!(doc.source_port(sink_in, false, false), Some(parent_out));
        assert_eq!(doc.destination_ports(source_out, true, false, false), vec![inner_in]);
        assert_eq!(doc.input_nodes(sub), vec![Executable::Node(inner)]);
        assert_eq!(doc.output_nodes(sub), vec![Executable::Node(inner)]);
        assert!(doc.bypass_ports(sub).is_empty());

        let order = doc.node_set_list(root, None, false, false);
        assert_eq!(
            order,
            vec![Executable::Node(source), Executable::Node(inner), Executable::Node(sink)]
        );

        doc.set_locked(sub, true).unwrap();
        assert_eq!(doc.source_port(sink_in, true, true), Some(parent_out));
        let order = doc.node_set_list(root, None, false, true);
        assert_eq!(
            order,
            vec![Executable::Node(source), Executable::Flow(sub), Executable::Node(sink)]
        );
    }

    #[test]
    fn test_bypass_ports_pair_flow_io() {
        let mut doc = document();
        let root = doc.root();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();
        let fo = doc.create_flow_output(sub, None, None).unwrap();
        let fi_port = doc.flow_io(fi).unwrap().port();
        let fo_port = doc.flow_io(fo).unwrap().port();
        doc.create_connection(sub, fi_port, fo_port).unwrap();

        assert_eq!(doc.bypass_ports(sub), vec![(fi_port, fo_port)]);
    }

    #[test]
    fn test_cycles_are_detected_between_root_nodes() {
        let mut doc = document();
        let root = doc.root();
        let a = doc.create_node(root, "test.table", Position::default()).unwrap();
        let b = doc.create_node(root, "test.table", Position::default()).unwrap();
        let a_in = doc.node(a).unwrap().inputs[0];
        let a_out = doc.node(a).unwrap().outputs[0];
        let b_in = doc.node(b).unwrap().inputs[0];
        let b_out = doc.node(b).unwrap().outputs[0];

        doc.create_connection(root, a_out, b_in).unwrap();
        assert!(doc.would_create_cycle(b_out, a_in));
        assert!(!doc.would_create_cycle(a_out, b_in));
    }

    #[test]
    fn test_cycles_are_detected_across_subflows() {
        let mut doc = document();
        let root = doc.root();
        assert!(doc.context().config().reject_cycles);
        let outer = doc.create_node(root, "test.table", Position::default()).unwrap();
        let sub = doc.create_subflow(root, Position::default()).unwrap();
        let inner = doc.create_node(sub, "test.table", Position::default()).unwrap();
        let fi = doc.create_flow_input(sub, None, None).unwrap();
        let fo = doc.create_flow_output(sub, None, None).unwrap();

        let outer_in = doc.node(outer).unwrap().inputs[0];
        let outer_out = doc.node(outer).unwrap().outputs[0];
        let inner_in = doc.node(inner).unwrap().inputs[0];
        let inner_out = doc.node(inner).unwrap().outputs[0];
        let fi_port = doc.flow_io(fi).unwrap().port();
        let fo_port = doc.flow_io(fo).unwrap().port();
        let parent_in = doc.flow_io(fi).unwrap().parent_port().unwrap();
        let parent_out = doc.flow_io(fo).unwrap().parent_port().unwrap();

        doc.create_connection(sub, fi_port, inner_in).unwrap();
        doc.create_connection(sub, inner_out, fo_port).unwrap();
        doc.create_connection(root, outer_out, parent_in).unwrap();

        assert!(doc.would_create_cycle(parent_out, outer_in));
        assert!(matches!(
            doc.create_connection(root, parent_out, outer_in),
            Err(FlowEngineError::CycleDetected { .. })
        ));
        assert!(!doc.is_connected(outer_in));
        assert_eq!(doc.flow(root).unwrap().connections().len(), 1);
    }
}

//! Type inference over a document
//!
//! Every pass collects the constraints of the whole document, unifies them
//! into one [`TypeMapping`] and instantiates each port's declared type with
//! it. Constraints are:
//!
//! - one pair per connection (source, destination)
//! - flow input/output inner ports against their parent ports
//! - lambda ports against a fresh curried function type
//!
//! Inside [`Document::delayed_inference`] connection edits are recorded
//! instead of checked. When the transaction ends, recorded connections that
//! no longer unify are removed.

use std::collections::{HashMap, HashSet};

use crate::datatype::{unify, TypeMapping, TypeTerm};
use crate::document::Document;
use crate::error::Result;
use crate::events::FlowEvent;
use crate::ids::{FlowId, FlowIoId, PortId};

/// Changes to evaluate without committing them.
#[derive(Debug, Clone, Default)]
pub(crate) struct InferProbe {
    /// Declared types to use instead of the ports' own
    pub(crate) replace: HashMap<PortId, TypeTerm>,
    pub(crate) lambda: Option<LambdaProbe>,
}

/// Flow input changes of a lambda under evaluation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LambdaProbe {
    pub(crate) lambda: FlowId,
    /// Pretend an additional input exists
    pub(crate) extra_input: bool,
    /// Pretend this input does not exist
    pub(crate) exclude_input: Option<FlowIoId>,
}

type Constraint = (TypeTerm, TypeTerm);

impl Document {
    fn probe_base(&self, port: PortId, probe: &InferProbe) -> Result<TypeTerm> {
        if let Some(datatype) = probe.replace.get(&port) {
            return Ok(datatype.clone());
        }
        Ok(self.port(port)?.datatype_base.clone())
    }

    /// Boundary constraints of one flow.
    fn flow_constraints(&mut self, flow: FlowId, probe: &InferProbe) -> Result<Vec<Constraint>> {
        let f = self.flow(flow)?;
        let flow_inputs = f.flow_inputs.clone();
        let flow_outputs = f.flow_outputs.clone();
        let lambda = f.lambda().map(|parts| (parts.function_port, parts.flow_output));

        let mut constraints = Vec::new();
        let Some((function_port, flow_output)) = lambda else {
            for id in &flow_inputs {
                let io = self.flow_io(*id)?;
                if let Some(parent) = io.parent_port {
                    constraints.push((self.probe_base(parent, probe)?, self.probe_base(io.port, probe)?));
                }
            }
            for id in &flow_outputs {
                let io = self.flow_io(*id)?;
                if let Some(parent) = io.parent_port {
                    constraints.push((self.probe_base(io.port, probe)?, self.probe_base(parent, probe)?));
                }
            }
            return Ok(constraints);
        };

        let lambda_probe = probe.lambda.filter(|p| p.lambda == flow);
        let exclude = lambda_probe.and_then(|p| p.exclude_input);
        let extra = lambda_probe.is_some_and(|p| p.extra_input);

        let mut arguments = Vec::new();
        for id in &flow_inputs {
            let io = self.flow_io(*id)?;
            if let Some(parent) = io.parent_port {
                constraints.push((self.probe_base(io.port, probe)?, self.probe_base(parent, probe)?));
            }
            if Some(*id) != exclude {
                arguments.push(io.port);
            }
        }

        let arity = arguments.len() + if extra { 2 } else { 1 };
        let function = TypeTerm::curried("t", arity).identify(&mut HashMap::new(), &mut self.context.generic_ids);

        let mut result = function.clone();
        for port in arguments {
            if let TypeTerm::Function(arg, rest) = result {
                constraints.push((self.probe_base(port, probe)?, *arg));
                result = *rest;
            }
        }
        if extra {
            if let TypeTerm::Function(_, rest) = result {
                result = *rest;
            }
        }
        if let Some(flow_output) = flow_output {
            let port = self.flow_io(flow_output)?.port;
            constraints.push((self.probe_base(port, probe)?, result));
        }
        if let Some(function_port) = function_port {
            constraints.push((self.probe_base(function_port, probe)?, function));
        }
        Ok(constraints)
    }

    /// Constraints of the whole document, skipping the listed connections.
    fn collect_constraints(
        &mut self,
        probe: &InferProbe,
        skip: &HashSet<(PortId, PortId)>,
    ) -> Result<Vec<Constraint>> {
        let mut constraints = Vec::new();
        let pairs: Vec<(PortId, PortId)> = self
            .connections
            .values()
            .map(|c| (c.source, c.destination))
            .filter(|pair| !skip.contains(pair))
            .collect();
        for (source, destination) in pairs {
            constraints.push((self.probe_base(source, probe)?, self.probe_base(destination, probe)?));
        }

        let flows: Vec<FlowId> = self.flows.keys().copied().collect();
        for flow in flows {
            constraints.extend(self.flow_constraints(flow, probe)?);
        }
        Ok(constraints)
    }

    fn solve(&mut self, extra: Option<(PortId, PortId)>, probe: &InferProbe) -> Result<TypeMapping> {
        let mut constraints = self.collect_constraints(probe, &HashSet::new())?;
        if let Some((source, destination)) = extra {
            constraints.push((self.probe_base(source, probe)?, self.probe_base(destination, probe)?));
        }

        let mut mapping = TypeMapping::new();
        for (a, b) in &constraints {
            unify(a, b, &mut mapping)?;
        }
        Ok(mapping)
    }

    /// Instantiate every port type with `mapping`.
    fn apply_mapping(&mut self, mapping: &TypeMapping) {
        let mut changed = Vec::new();
        for port in self.ports.values_mut() {
            let datatype = port.datatype_base.instantiate(mapping);
            if datatype != port.datatype {
                changed.push((port.id, datatype.to_string()));
                port.datatype = datatype;
            }
        }
        for (port, datatype) in changed {
            self.emit(FlowEvent::DatatypeChanged { port, datatype });
        }
    }

    /// Re-infer after connecting (or disconnecting) `port0` to `port1`.
    ///
    /// In check mode nothing is committed. Outside check mode, inside a
    /// delayed transaction, the edge is recorded and checked when the
    /// transaction ends.
    pub(crate) fn infer_connect(
        &mut self,
        port0: PortId,
        port1: Option<PortId>,
        disconnect: bool,
        check: bool,
    ) -> Result<()> {
        if !check {
            if let Some(recorded) = self.context.delayed.as_mut() {
                if !disconnect {
                    recorded.push((port0, port1));
                }
                return Ok(());
            }
        }

        let extra = match port1 {
            Some(port1) if !disconnect => Some((port0, port1)),
            _ => None,
        };
        let mapping = self.solve(extra, &InferProbe::default())?;
        if !check {
            self.apply_mapping(&mapping);
        }
        Ok(())
    }

    /// Re-infer the whole document. Deferred inside a delayed transaction.
    pub(crate) fn infer_all(&mut self) -> Result<()> {
        if self.context.in_delayed_inference() {
            return Ok(());
        }
        log::debug!("Inferring port types");
        let mapping = self.solve(None, &InferProbe::default())?;
        self.apply_mapping(&mapping);
        Ok(())
    }

    /// Evaluate a probe. Always runs immediately, also inside a delayed
    /// transaction.
    pub(crate) fn check_inference(&mut self, probe: &InferProbe) -> Result<()> {
        self.solve(None, probe).map(|_| ())
    }

    /// Whether connecting the two ports keeps the document well typed.
    pub fn can_connect_types(&mut self, source: PortId, destination: PortId) -> bool {
        self.infer_connect(source, Some(destination), false, true).is_ok()
    }

    /// Run `edit` as one inference transaction.
    ///
    /// Connections created inside are not type checked one by one. When
    /// `edit` returns, connections that do not unify with the rest of the
    /// document are removed, in creation order, and types are propagated.
    /// Nested calls join the outer transaction.
    pub fn delayed_inference<T>(&mut self, edit: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.context.in_delayed_inference() {
            return edit(self);
        }

        self.context.delayed = Some(Vec::new());
        let result = edit(self);
        let recorded = self
            .context
            .delayed
            .as_mut()
            .map(std::mem::take)
            .unwrap_or_default();

        let healed = self.heal(recorded);
        self.context.delayed = None;
        let mapping = healed?;
        self.apply_mapping(&mapping);
        result
    }

    /// Unify the document, dropping recorded connections that fail.
    fn heal(&mut self, recorded: Vec<(PortId, Option<PortId>)>) -> Result<TypeMapping> {
        let edges: Vec<(PortId, PortId)> = recorded
            .into_iter()
            .filter_map(|(source, destination)| destination.map(|d| (source, d)))
            .collect();
        let skip: HashSet<(PortId, PortId)> = edges.iter().copied().collect();
        let probe = InferProbe::default();

        let mut mapping = TypeMapping::new();
        for (a, b) in self.collect_constraints(&probe, &skip)? {
            let mut trial = mapping.clone();
            match unify(&a, &b, &mut trial) {
                Ok(()) => mapping = trial,
                Err(e) => log::warn!("Ignoring inconsistent constraint: {}", e),
            }
        }

        for (source, destination) in edges {
            let Some(connection) = self.connection_between(source, destination) else {
                continue;
            };
            let mut trial = mapping.clone();
            let (a, b) = (self.probe_base(source, &probe)?, self.probe_base(destination, &probe)?);
            match unify(&a, &b, &mut trial) {
                Ok(()) => mapping = trial,
                Err(e) => {
                    log::debug!("Removing {} after type mismatch: {}", connection, e);
                    self.remove_connection(connection)?;
                }
            }
        }
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::document;
    use crate::document::Position;
    use crate::port::PortDefinition;
    use crate::registry::NodeDefinition;

    fn ports(doc: &Document, node: crate::ids::NodeId) -> (Vec<PortId>, Vec<PortId>) {
        let n = doc.node(node).unwrap();
        (n.inputs.clone(), n.outputs.clone())
    }

    #[test]
    fn test_generic_output_binds_to_destination() {
        let mut doc = document();
        let root = doc.root();
        let n1 = doc.create_node(root, "test.generic_source", Position::default()).unwrap();
        let n2 = doc.create_node(root, "test.int_sink", Position::default()).unwrap();
        let out = ports(&doc, n1).1[0];
        let inp = ports(&doc, n2).0[0];

        doc.create_connection(root, out, inp).unwrap();
        assert_eq!(doc.port(out).unwrap().datatype().to_string(), "int");
    }

    #[test]
    fn test_function_type_instantiates_through_list() {
        let mut doc = document();
        let root = doc.root();
        doc.registry_mut().register(
            NodeDefinition::library("test.function_source", "Function source")
                .with_output(PortDefinition::new("out", "<a> -> <a>")),
        );
        doc.registry_mut().register(
            NodeDefinition::library("test.function_sink", "Function sink")
                .with_input(PortDefinition::new("in", "[int] -> <b>")),
        );
        let source = doc.create_node(root, "test.function_source", Position::default()).unwrap();
        let sink = doc.create_node(root, "test.function_sink", Position::default()).unwrap();
        let out = ports(&doc, source).1[0];
        let inp = ports(&doc, sink).0[0];

        doc.create_connection(root, out, inp).unwrap();
        assert_eq!(doc.port(out).unwrap().datatype().to_string(), "[int] -> [int]");
        assert_eq!(doc.port(inp).unwrap().datatype().to_string(), "[int] -> [int]");
    }

    #[test]
    fn test_mismatch_fails_immediately() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let sink = doc.create_node(root, "test.text_sink", Position::default()).unwrap();
        let out = ports(&doc, source).1[0];
        let inp = ports(&doc, sink).0[0];

        assert!(!doc.can_connect_types(out, inp));
        assert!(doc.create_connection(root, out, inp).is_err());
        assert!(doc.flow(root).unwrap().connections().is_empty());
    }

    #[test]
    fn test_delayed_inference_prunes_failing_connections() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let identity = doc.create_node(root, "test.identity", Position::default()).unwrap();
        let sink = doc.create_node(root, "test.int_sink", Position::default()).unwrap();
        let (id_in, id_out) = ports(&doc, identity);
        let source_out = ports(&doc, source).1[0];
        let sink_in = ports(&doc, sink).0[0];

        let (a, b) = doc
            .delayed_inference(|doc| {
                let a = doc.create_connection(root, source_out, id_in[0])?;
                let b = doc.create_connection(root, id_out[0], sink_in)?;
                Ok((a, b))
            })
            .unwrap();

        assert!(doc.connection(a).is_ok());
        assert!(doc.connection(b).is_err());
        assert_eq!(doc.flow(root).unwrap().connections(), &[a]);
        assert_eq!(doc.port(id_out[0]).unwrap().datatype().to_string(), "sytable");
        assert!(!doc.context().in_delayed_inference());
    }

    #[test]
    fn test_delayed_inference_prunes_direct_mismatch() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let table = doc.create_node(root, "test.table", Position::default()).unwrap();
        let text = doc.create_node(root, "test.text_sink", Position::default()).unwrap();
        let source_out = ports(&doc, source).1[0];
        let table_in = ports(&doc, table).0[0];
        let text_in = ports(&doc, text).0[0];
        assert!(!doc.connection_is_allowed(root, source_out, text_in));

        let (a, b) = doc
            .delayed_inference(|doc| {
                let a = doc.create_connection(root, source_out, table_in)?;
                let b = doc.create_connection(root, source_out, text_in)?;
                Ok((a, b))
            })
            .unwrap();

        assert!(doc.connection(a).is_ok());
        assert!(doc.connection(b).is_err());
        assert_eq!(doc.flow(root).unwrap().connections(), &[a]);
        assert!(!doc.is_connected(text_in));
        assert!(doc.port(text_in).unwrap().filename().is_empty());
        assert!(!doc.connection_is_allowed(root, source_out, text_in));
    }

    #[test]
    fn test_nested_delayed_inference_joins_outer() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let identity = doc.create_node(root, "test.identity", Position::default()).unwrap();
        let sink = doc.create_node(root, "test.int_sink", Position::default()).unwrap();
        let (id_in, id_out) = ports(&doc, identity);
        let source_out = ports(&doc, source).1[0];
        let sink_in = ports(&doc, sink).0[0];

        doc.delayed_inference(|doc| {
            doc.delayed_inference(|doc| {
                doc.create_connection(root, source_out, id_in[0])?;
                doc.create_connection(root, id_out[0], sink_in)
            })?;
            assert!(doc.context().in_delayed_inference());
            assert_eq!(doc.flow(root).unwrap().connections().len(), 2);
            Ok(())
        })
        .unwrap();
        assert_eq!(doc.flow(root).unwrap().connections().len(), 1);
    }
}

//! Structural validation of flows
//!
//! Reports floating inputs, fan-in, dataflow cycles and connections whose
//! port types no longer unify.

use std::collections::HashMap;

use crate::document::Document;
use crate::graph::CycleDetection;
use crate::ids::{ConnectionId, Executable, FlowId, PortId};
use crate::port::PortOwner;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// An input has no source reaching an output
    FloatingInput { executable: Executable, port: String },
    /// An input port has more than one incoming connection
    FanIn { port: PortId, connections: usize },
    /// The flow graph contains a cycle
    CycleDetected { flow: FlowId },
    /// A connection joins ports whose types do not unify
    TypeMismatch {
        connection: ConnectionId,
        source_type: String,
        destination_type: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FloatingInput { executable, port } => {
                write!(f, "Input '{}' of {:?} is not connected to any output", port, executable)
            }
            Self::FanIn { port, connections } => {
                write!(f, "Input {} has {} incoming connections", port, connections)
            }
            Self::CycleDetected { flow } => write!(f, "Cycle detected in {}", flow),
            Self::TypeMismatch {
                connection,
                source_type,
                destination_type,
            } => {
                write!(
                    f,
                    "{} connects incompatible types: {} -> {}",
                    connection, source_type, destination_type
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate `flow` and every subflow below it except lambda contents.
pub fn validate_flow(doc: &Document, flow: FlowId) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut pending = vec![flow];
    while let Some(current) = pending.pop() {
        let Ok(f) = doc.flow(current) else {
            continue;
        };
        check_floating_inputs(doc, current, &mut errors);
        check_fan_in(doc, current, &mut errors);
        if CycleDetection::has_cycle(f.graph().graph()) {
            errors.push(ValidationError::CycleDetected { flow: current });
        }
        check_types(doc, current, &mut errors);
        pending.extend(f.subflows().iter().copied().filter(|s| !doc.is_lambda(*s)));
    }
    errors
}

fn has_source(doc: &Document, input: PortId) -> bool {
    let Some(source) = doc.source_port(input, true, false) else {
        return false;
    };
    match doc.port(source).map(|p| p.owner()) {
        // An unmirrored flow input only supplies data inside a lambda.
        Ok(PortOwner::FlowIo(io)) => doc.flow_io(io).map(|io| doc.is_lambda(io.flow())).unwrap_or(false),
        Ok(_) => true,
        Err(_) => false,
    }
}

fn check_floating_inputs(doc: &Document, flow: FlowId, errors: &mut Vec<ValidationError>) {
    let Ok(f) = doc.flow(flow) else {
        return;
    };
    for node in f.nodes() {
        let Ok(n) = doc.node(*node) else {
            continue;
        };
        for input in &n.inputs {
            if !has_source(doc, *input) {
                errors.push(ValidationError::FloatingInput {
                    executable: Executable::Node(*node),
                    port: port_name(doc, *input),
                });
            }
        }
    }
    for subflow in f.subflows() {
        if !doc.is_atom(*subflow) {
            continue;
        }
        let Ok(s) = doc.flow(*subflow) else {
            continue;
        };
        for input in &s.inputs {
            if !has_source(doc, *input) {
                errors.push(ValidationError::FloatingInput {
                    executable: Executable::Flow(*subflow),
                    port: port_name(doc, *input),
                });
            }
        }
    }
}

fn port_name(doc: &Document, port: PortId) -> String {
    doc.port(port).map(|p| p.name().to_string()).unwrap_or_default()
}

fn check_fan_in(doc: &Document, flow: FlowId, errors: &mut Vec<ValidationError>) {
    let Ok(f) = doc.flow(flow) else {
        return;
    };
    let mut incoming: HashMap<PortId, usize> = HashMap::new();
    for connection in f.connections() {
        if let Ok(c) = doc.connection(*connection) {
            *incoming.entry(c.destination()).or_insert(0) += 1;
        }
    }
    let mut fanned: Vec<(PortId, usize)> = incoming.into_iter().filter(|(_, n)| *n > 1).collect();
    fanned.sort();
    for (port, connections) in fanned {
        errors.push(ValidationError::FanIn { port, connections });
    }
}

fn check_types(doc: &Document, flow: FlowId, errors: &mut Vec<ValidationError>) {
    let Ok(f) = doc.flow(flow) else {
        return;
    };
    for connection in f.connections() {
        let Ok(c) = doc.connection(*connection) else {
            continue;
        };
        let (Ok(src), Ok(dst)) = (doc.port(c.source()), doc.port(c.destination())) else {
            continue;
        };
        if !src.datatype().matches(dst.datatype()) {
            errors.push(ValidationError::TypeMismatch {
                connection: *connection,
                source_type: src.datatype().to_string(),
                destination_type: dst.datatype().to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::document;
    use crate::document::Position;

    #[test]
    fn test_connected_flow_is_valid() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let table = doc.create_node(root, "test.table", Position::default()).unwrap();
        let out = doc.node(source).unwrap().outputs[0];
        let input = doc.node(table).unwrap().inputs[0];
        doc.create_connection(root, out, input).unwrap();

        assert!(validate_flow(&doc, root).is_empty());
    }

    #[test]
    fn test_floating_node_input() {
        let mut doc = document();
        let root = doc.root();
        let table = doc.create_node(root, "test.table", Position::default()).unwrap();

        let errors = validate_flow(&doc, root);
        assert_eq!(
            errors,
            vec![ValidationError::FloatingInput {
                executable: Executable::Node(table),
                port: doc.port(doc.node(table).unwrap().inputs[0]).unwrap().name().to_string(),
            }]
        );
        assert!(errors[0].to_string().contains("not connected"));
    }

    #[test]
    fn test_input_fed_by_unconnected_subflow_input_floats() {
        let mut doc = document();
        let root = doc.root();
        let subflow = doc.create_subflow(root, Position::default()).unwrap();
        let fi = doc.create_flow_input(subflow, None, None).unwrap();
        let table = doc.create_node(subflow, "test.table", Position::default()).unwrap();
        let inner = doc.flow_io(fi).unwrap().port();
        let table_in = doc.node(table).unwrap().inputs[0];
        doc.create_connection(subflow, inner, table_in).unwrap();

        let errors = validate_flow(&doc, root);
        assert!(errors.iter().any(|e| matches!(
            e,
            ValidationError::FloatingInput { executable: Executable::Node(n), .. } if *n == table
        )));

        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let out = doc.node(source).unwrap().outputs[0];
        let parent = doc.flow_io(fi).unwrap().parent_port().unwrap();
        doc.create_connection(root, out, parent).unwrap();
        assert!(validate_flow(&doc, root).is_empty());
    }

    #[test]
    fn test_lambda_contents_are_skipped() {
        let mut doc = document();
        let root = doc.root();
        let lambda = doc.create_lambda(root, Position::default()).unwrap();
        doc.create_node(lambda, "test.table", Position::default()).unwrap();

        assert!(validate_flow(&doc, root).is_empty());
        assert!(!validate_flow(&doc, lambda).is_empty());
    }
}

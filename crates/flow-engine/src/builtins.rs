//! Builtin node kinds
//!
//! Function application and the two parameterized sources. Each definition
//! is submitted to the registry at link time.

use crate::constants::builtin;
use crate::port::PortDefinition;
use crate::registry::{NodeDefinition, NodeDefinitionFn, NodeKind};

/// Applies a function to one argument.
pub struct Apply;

impl Apply {
    pub const PORT_FUNCTION: &'static str = "Function";
    pub const PORT_ARGUMENT: &'static str = "Argument";
    pub const PORT_OUTPUT: &'static str = "Output";

    pub fn definition() -> NodeDefinition {
        NodeDefinition::new(builtin::APPLY, "Apply", NodeKind::Apply)
            .with_description("Apply function to argument")
            .with_input(PortDefinition::new(Self::PORT_FUNCTION, "<a> -> <b>").with_description("Function"))
            .with_input(PortDefinition::new(Self::PORT_ARGUMENT, "<a>").with_description("Argument"))
            .with_output(PortDefinition::new(Self::PORT_OUTPUT, "<b>").with_description("Result"))
    }
}

inventory::submit!(NodeDefinitionFn(Apply::definition));

/// Applies a function to every element of a list.
pub struct Map;

impl Map {
    pub const PORT_FUNCTION: &'static str = "Function";
    pub const PORT_LIST: &'static str = "List";
    pub const PORT_OUTPUT: &'static str = "Output";

    pub fn definition() -> NodeDefinition {
        NodeDefinition::new(builtin::MAP, "Map", NodeKind::Map)
            .with_description("Map function over each element of list")
            .with_input(PortDefinition::new(Self::PORT_FUNCTION, "<a> -> <b>").with_description("Function"))
            .with_input(PortDefinition::new(Self::PORT_LIST, "[<a>]").with_description("Argument list"))
            .with_output(PortDefinition::new(Self::PORT_OUTPUT, "[<b>]").with_description("Result list"))
    }
}

inventory::submit!(NodeDefinitionFn(Map::definition));

/// Source producing an empty value of a user-chosen type.
pub struct Empty;

impl Empty {
    pub const PORT_OUTPUT: &'static str = "Output";

    pub fn definition() -> NodeDefinition {
        NodeDefinition::new(builtin::EMPTY, "Empty", NodeKind::Empty)
            .with_description("Empty data of the selected type")
            .with_output(PortDefinition::new(Self::PORT_OUTPUT, "<a>"))
    }
}

inventory::submit!(NodeDefinitionFn(Empty::definition));

/// Source listing the lambdas found in a set of documents.
pub struct ExtractLambdas;

impl ExtractLambdas {
    pub const PORT_OUTPUT: &'static str = "Output";

    pub fn definition() -> NodeDefinition {
        NodeDefinition::new(builtin::EXTRACT_LAMBDAS, "Extract Lambdas", NodeKind::ExtractLambdas)
            .with_description("Extract lambda functions from flows")
            .with_output(PortDefinition::new(Self::PORT_OUTPUT, "[<a> -> <b>]"))
            .with_parameters(serde_json::json!({ "flowpaths": [] }))
    }
}

inventory::submit!(NodeDefinitionFn(ExtractLambdas::definition));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::document;
    use crate::document::Position;
    use crate::port::PortKind;

    #[test]
    fn test_apply_binds_result_to_argument() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.identity", Position::default()).unwrap();
        let apply = doc.create_node(root, builtin::APPLY, Position::default()).unwrap();
        let sink = doc.create_node(root, "test.int_sink", Position::default()).unwrap();
        let apply_out = doc.node(apply).unwrap().outputs[0];
        let function_in = doc.node(apply).unwrap().inputs[0];
        let sink_in = doc.node(sink).unwrap().inputs[0];
        let source_out = doc.node(source).unwrap().outputs[0];

        doc.create_connection(root, apply_out, sink_in).unwrap();
        assert!(doc.port(function_in).unwrap().datatype().to_string().ends_with("-> int"));

        doc.create_connection(root, source_out, function_in).unwrap();
        let source_type = doc.port(source_out).unwrap().datatype().to_string();
        assert!(source_type.ends_with("-> int"), "{}", source_type);
    }

    #[test]
    fn test_map_lifts_over_lists() {
        let mut doc = document();
        let root = doc.root();
        let map = doc.create_node(root, builtin::MAP, Position::default()).unwrap();
        let empty = doc.create_node(root, builtin::EMPTY, Position::default()).unwrap();
        doc.set_datatype_parameter(empty, "[sytable]").unwrap();

        let list_in = doc.node(map).unwrap().inputs[1];
        let empty_out = doc.node(empty).unwrap().outputs[0];
        doc.create_connection(root, empty_out, list_in).unwrap();

        let function_in = doc.node(map).unwrap().inputs[0];
        let function_type = doc.port(function_in).unwrap().datatype().to_string();
        assert!(function_type.starts_with("sytable ->"), "{}", function_type);
    }

    #[test]
    fn test_definitions_are_well_formed() {
        for definition in [
            Apply::definition(),
            Map::definition(),
            Empty::definition(),
            ExtractLambdas::definition(),
        ] {
            assert!(!definition.outputs.is_empty(), "{}", definition.identifier);
            let mut doc = document();
            let root = doc.root();
            let node = doc.create_node(root, &definition.identifier, Position::default()).unwrap();
            let n = doc.node(node).unwrap();
            assert_eq!(n.kind(), definition.kind);
            assert_eq!(doc.port(n.outputs[0]).unwrap().kind(), PortKind::Output);
        }
    }
}

//! Graphviz rendering of a flow graph, for debugging

use std::collections::HashMap;
use std::fmt::Write;

use crate::document::Document;
use crate::error::Result;
use crate::flowio::FlowIoKind;
use crate::graph::VertexId;
use crate::ids::{ElementId, FlowId};
use crate::port::{PortKind, PortOwner};

impl Document {
    /// Render the graph of `flow` in dot format. Sentinel edges are left out.
    pub fn to_dot(&self, flow: FlowId) -> Result<String> {
        let f = self.flow(flow)?;
        let graph = f.graph();
        let mut names: HashMap<VertexId, String> = HashMap::new();
        let mut output = String::from("digraph flow {\n  rankdir=\"LR\";\n");

        for (_, edge) in graph.graph().edges() {
            if graph.is_sentinel(edge.src) || graph.is_sentinel(edge.dst) {
                continue;
            }
            let (Some(src), Some(dst)) = (f.element(edge.src), f.element(edge.dst)) else {
                continue;
            };
            let src_name = names
                .entry(edge.src)
                .or_insert_with(|| self.dot_name(src))
                .clone();
            let dst_name = names.entry(edge.dst).or_insert_with(|| self.dot_name(dst)).clone();
            let _ = writeln!(
                output,
                "  \"{} ({})\"->\"{} ({})\";",
                src_name,
                edge.src.index(),
                dst_name,
                edge.dst.index()
            );
        }
        output.push('}');
        Ok(output)
    }

    fn owner_name(&self, owner: PortOwner) -> String {
        match owner {
            PortOwner::Node(id) => self.node(id).map(|n| n.name().to_string()),
            PortOwner::Flow(id) => self.flow(id).map(|f| f.name().to_string()),
            PortOwner::FlowIo(id) => self.flow_io(id).map(|io| self.flow_io_name(io.kind())),
        }
        .unwrap_or_default()
    }

    fn flow_io_name(&self, kind: FlowIoKind) -> String {
        match kind {
            FlowIoKind::Input => "Flow input",
            FlowIoKind::Output => "Flow output",
        }
        .to_string()
    }

    fn dot_name(&self, element: ElementId) -> String {
        let name = match element {
            ElementId::Node(id) => self.node(id).map(|n| n.name().to_string()).unwrap_or_default(),
            ElementId::Flow(id) => self.flow(id).map(|f| f.name().to_string()).unwrap_or_default(),
            ElementId::FlowIo(id) => self
                .flow_io(id)
                .map(|io| self.flow_io_name(io.kind()))
                .unwrap_or_default(),
            ElementId::TextField(_) => String::from("Text"),
            ElementId::Port(id) => match self.port(id) {
                Ok(p) if p.kind() == PortKind::Input => format!("{}<{}", p.name(), self.owner_name(p.owner())),
                Ok(p) => format!("{}>{}", self.owner_name(p.owner()), p.name()),
                Err(_) => String::new(),
            },
        };
        name.replace('"', "_")
    }
}

#[cfg(test)]
mod tests {
    use crate::document::tests::document;
    use crate::document::Position;

    #[test]
    fn test_to_dot_lists_real_edges() {
        let mut doc = document();
        let root = doc.root();
        let source = doc.create_node(root, "test.source", Position::default()).unwrap();
        let table = doc.create_node(root, "test.table", Position::default()).unwrap();
        let out = doc.node(source).unwrap().outputs[0];
        let input = doc.node(table).unwrap().inputs[0];
        doc.create_connection(root, out, input).unwrap();

        let dot = doc.to_dot(root).unwrap();
        assert!(dot.starts_with("digraph flow {\n  rankdir=\"LR\";"));
        assert!(dot.ends_with('}'));

        let source_name = doc.node(source).unwrap().name().to_string();
        let out_name = doc.port(out).unwrap().name().to_string();
        assert!(dot.contains(&format!("\"{} (", source_name)));
        assert!(dot.contains(&format!("{}>{}", source_name, out_name)));
        // source -> out -> in -> table -> table output
        assert_eq!(dot.matches("->").count(), 4);
    }

    #[test]
    fn test_empty_flow_dot() {
        let doc = document();
        assert_eq!(doc.to_dot(doc.root()).unwrap(), "digraph flow {\n  rankdir=\"LR\";\n}");
    }
}

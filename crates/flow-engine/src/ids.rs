//! Typed handles for document elements

use serde::{Deserialize, Serialize};

macro_rules! element_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

element_id!(
    /// A flow: the root document, a subflow or a lambda
    FlowId
);
element_id!(NodeId);
element_id!(PortId);
element_id!(ConnectionId);
element_id!(
    /// A flow input or flow output boundary element
    FlowIoId
);
element_id!(TextFieldId);

/// A child with execution state: a node or a (sub)flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Executable {
    Node(NodeId),
    Flow(FlowId),
}

/// Anything that owns a vertex in a flow's graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementId {
    Flow(FlowId),
    Node(NodeId),
    Port(PortId),
    FlowIo(FlowIoId),
    TextField(TextFieldId),
}

impl From<Executable> for ElementId {
    fn from(value: Executable) -> Self {
        match value {
            Executable::Node(id) => ElementId::Node(id),
            Executable::Flow(id) => ElementId::Flow(id),
        }
    }
}

impl From<NodeId> for Executable {
    fn from(value: NodeId) -> Self {
        Executable::Node(value)
    }
}

impl From<FlowId> for Executable {
    fn from(value: FlowId) -> Self {
        Executable::Flow(value)
    }
}

impl ElementId {
    pub fn executable(self) -> Option<Executable> {
        match self {
            ElementId::Node(id) => Some(Executable::Node(id)),
            ElementId::Flow(id) => Some(Executable::Flow(id)),
            _ => None,
        }
    }
}

/// Braced random uuid, the format used for every element.
pub fn generate_uuid() -> String {
    format!("{{{}}}", uuid::Uuid::new_v4())
}

/// Prefix `uuid` with a namespace.
pub fn join_uuid(namespace: &str, uuid: &str) -> String {
    format!("{}{}", namespace, uuid)
}

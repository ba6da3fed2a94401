//! Flow Engine - dataflow document model for node-based workflows
//!
//! This crate holds the in-memory model of a workflow document and the
//! rules that keep it consistent. It supports:
//!
//! - Nested subflows, locked subflows and lambdas (function-valued subflows)
//! - Hindley-Milner style type inference across connections
//! - A per-node execution state machine with pending host requests
//! - Dependency-ordered execution, abort and completion roll-up
//!
//! # Architecture
//!
//! A [`Document`] owns every element in id-keyed tables. Each flow keeps a
//! [`graph::DocumentGraph`] whose vertices are its nodes, subflows, ports
//! and flow inputs/outputs. All mutation is synchronous; work that leaves
//! the process (validation, execution, abort) is queued as a
//! [`HostRequest`] and its result is fed back through
//! [`Document::validate_done`], [`Document::set_done`] and
//! [`Document::abort_done`]. Observers receive [`FlowEvent`]s through
//! [`EventSink`]s registered on the [`DocumentContext`].
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{Document, EngineConfig, Executable, Position};
//!
//! let mut doc = Document::new(EngineConfig::default());
//! let root = doc.root();
//! let node = doc.create_node(root, "org.sysess.builtin.empty", Position::default())?;
//! doc.execute(Executable::Node(node))?;
//! for request in doc.take_requests() {
//!     // hand the request to the executor
//! }
//! ```

pub mod builtins;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod constants;
pub mod context;
pub mod datatype;
pub mod document;
pub mod dot;
pub mod error;
pub mod events;
pub mod execution;
pub mod filenames;
pub mod flow;
pub mod flowio;
pub mod graph;
pub mod ids;
pub mod infer;
pub mod lambda;
pub mod node;
pub mod port;
pub mod registry;
pub mod serialize;
pub mod state_machine;
pub mod textfield;
pub mod traversal;
pub mod validation;

// Re-export key types
pub use capabilities::{GraphElement, HasExecutionState, HasPorts};
pub use config::EngineConfig;
pub use connection::{Connection, RoutePoint};
pub use context::{DocumentContext, HostRequest};
pub use datatype::{TypeAliases, TypeTerm};
pub use document::{Document, Position, Rect};
pub use error::{FlowEngineError, Result};
pub use events::{EventSink, FlowEvent, NullEventSink, VecEventSink};
pub use filenames::{FilenameAllocator, SessionFilenames};
pub use flow::{Flow, FlowState};
pub use flowio::{FlowIo, FlowIoKind};
pub use ids::{ConnectionId, ElementId, Executable, FlowId, FlowIoId, NodeId, PortId, TextFieldId};
pub use node::Node;
pub use port::{Port, PortDefinition, PortKind, PortOwner};
pub use registry::{NodeDefinition, NodeKind, NodeRegistry};
pub use serialize::FlowDict;
pub use state_machine::{NodeState, NodeStateMachine};
pub use textfield::{TextField, TextFieldOrder};
pub use validation::{validate_flow, ValidationError};

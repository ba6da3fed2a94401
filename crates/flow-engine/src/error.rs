//! Error types for the flow engine

use thiserror::Error;

use crate::datatype::{InferTypeError, TypeParseError};
use crate::graph::GraphError;

/// Result type for flow engine operations
pub type Result<T> = std::result::Result<T, FlowEngineError>;

/// Errors that can occur while editing or inspecting a document
#[derive(Debug, Error)]
pub enum FlowEngineError {
    /// Port types could not be unified
    #[error("Type inference failed: {0}")]
    InferType(#[from] InferTypeError),

    /// A port type string could not be parsed
    #[error(transparent)]
    TypeParse(#[from] TypeParseError),

    /// A graph contract was violated
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// The two ports cannot be connected
    #[error("Connection from '{output}' to '{input}' not allowed: {reason}")]
    ConnectionNotAllowed {
        output: String,
        input: String,
        reason: String,
    },

    /// The connection would close a dataflow cycle
    #[error("Connection from '{output}' to '{input}' would create a cycle")]
    CycleDetected { output: String, input: String },

    /// Adding or removing a port would break its count limits
    #[error("Port limit reached for '{name}'")]
    PortLimit { name: String },

    /// No port definition with this name
    #[error("Unknown port name: {0}")]
    UnknownPortName(String),

    /// Node type not present in the registry
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// Element handle no longer refers to a live element
    #[error("Unknown element: {0}")]
    UnknownElement(String),

    /// A node required for execution has an unconnected input
    #[error("Floating input on '{0}'")]
    FloatingInput(String),

    /// A filename was handed out twice
    #[error("Filename already allocated: {0}")]
    FilenameCollision(String),

    /// The operation does not apply to this element
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowEngineError {
    pub fn unknown(element: impl std::fmt::Display) -> Self {
        Self::UnknownElement(element.to_string())
    }

    pub fn not_allowed(
        output: impl Into<String>,
        input: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConnectionNotAllowed {
            output: output.into(),
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }
}

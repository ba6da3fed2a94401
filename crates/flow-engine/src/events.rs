//! Document change notifications
//!
//! Every structural edit, state transition and type change is reported to
//! the registered [`EventSink`]s synchronously and in order, before the
//! mutating call returns.

use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, Executable, FlowId, FlowIoId, NodeId, PortId, TextFieldId};

/// Receiver of document events
///
/// Abstracts over the consumer (UI bridge, scheduler, test recorder).
pub trait EventSink: Send + Sync {
    /// Deliver an event
    ///
    /// Returns an error if the event could not be delivered (e.g., receiver gone)
    fn send(&self, event: FlowEvent) -> Result<(), EventError>;
}

/// Error when delivering events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted by a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FlowEvent {
    /// A node or flow entered a new execution state
    #[serde(rename_all = "camelCase")]
    StateChanged { element: Executable, state: String },

    /// Execution progress of a node or flow, in percent
    #[serde(rename_all = "camelCase")]
    ProgressChanged { element: Executable, progress: i32 },

    /// The instantiated type of a port changed
    #[serde(rename_all = "camelCase")]
    DatatypeChanged { port: PortId, datatype: String },

    #[serde(rename_all = "camelCase")]
    NodeCreated { flow: FlowId, node: NodeId },

    #[serde(rename_all = "camelCase")]
    NodeRemoved { flow: FlowId, node: NodeId },

    #[serde(rename_all = "camelCase")]
    SubflowCreated { flow: FlowId, subflow: FlowId },

    #[serde(rename_all = "camelCase")]
    SubflowRemoved { flow: FlowId, subflow: FlowId },

    #[serde(rename_all = "camelCase")]
    ConnectionCreated { flow: FlowId, connection: ConnectionId },

    #[serde(rename_all = "camelCase")]
    ConnectionRemoved { flow: FlowId, connection: ConnectionId },

    /// Re-emitted by every ancestor of the flow owning the connection
    #[serde(rename_all = "camelCase")]
    RecursiveConnectionCreated { flow: FlowId, connection: ConnectionId },

    /// Re-emitted by every ancestor of the flow owning the connection
    #[serde(rename_all = "camelCase")]
    RecursiveConnectionRemoved { flow: FlowId, connection: ConnectionId },

    #[serde(rename_all = "camelCase")]
    FlowInputCreated { flow: FlowId, flow_io: FlowIoId },

    #[serde(rename_all = "camelCase")]
    FlowInputRemoved { flow: FlowId, flow_io: FlowIoId },

    #[serde(rename_all = "camelCase")]
    FlowOutputCreated { flow: FlowId, flow_io: FlowIoId },

    #[serde(rename_all = "camelCase")]
    FlowOutputRemoved { flow: FlowId, flow_io: FlowIoId },

    #[serde(rename_all = "camelCase")]
    InputPortCreated { port: PortId },

    #[serde(rename_all = "camelCase")]
    InputPortRemoved { port: PortId },

    #[serde(rename_all = "camelCase")]
    OutputPortCreated { port: PortId },

    #[serde(rename_all = "camelCase")]
    OutputPortRemoved { port: PortId },

    #[serde(rename_all = "camelCase")]
    RoutePointAdded { connection: ConnectionId, index: usize },

    #[serde(rename_all = "camelCase")]
    RoutePointRemoved { connection: ConnectionId, index: usize },

    #[serde(rename_all = "camelCase")]
    TextFieldCreated { flow: FlowId, text_field: TextFieldId },

    #[serde(rename_all = "camelCase")]
    TextFieldRemoved { flow: FlowId, text_field: TextFieldId },
}

impl FlowEvent {
    /// Create a state change event
    pub fn state_changed(element: Executable, state: impl std::fmt::Display) -> Self {
        Self::StateChanged {
            element,
            state: state.to_string(),
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: FlowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: std::sync::Mutex<Vec<FlowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Clear all collected events
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: FlowEvent) -> Result<(), EventError> {
        let mut events = self.events.lock().map_err(|_| EventError {
            message: "Event buffer poisoned".to_string(),
        })?;
        events.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_event_sink() {
        let sink = VecEventSink::new();

        sink.send(FlowEvent::state_changed(Executable::Node(NodeId(1)), "Armed"))
            .unwrap();

        let events = sink.events();
        assert_eq!(events.len(), 1);

        match &events[0] {
            FlowEvent::StateChanged { element, state } => {
                assert_eq!(*element, Executable::Node(NodeId(1)));
                assert_eq!(state, "Armed");
            }
            _ => panic!("Expected StateChanged event"),
        }

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_null_event_sink() {
        let sink = NullEventSink;
        sink.send(FlowEvent::InputPortCreated { port: PortId(0) })
            .unwrap();
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = FlowEvent::FlowInputCreated {
            flow: FlowId(2),
            flow_io: FlowIoId(5),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "flowInputCreated");
        assert_eq!(json["flowIo"], 5);
    }
}

//! Capabilities shared by document elements
//!
//! Nodes and flows do not share a base type. What they have in common is
//! expressed by these small traits, implemented separately per element.

use crate::ids::{FlowId, PortId};

/// Anything placed in a flow
pub trait GraphElement {
    fn uuid(&self) -> &str;

    /// Containing flow; `None` for the root flow.
    fn owner_flow(&self) -> Option<FlowId>;
}

/// Elements with ordered ports
pub trait HasPorts {
    fn input_ports(&self) -> &[PortId];

    fn output_ports(&self) -> &[PortId];

    fn port_ids(&self) -> Vec<PortId> {
        self.input_ports()
            .iter()
            .chain(self.output_ports())
            .copied()
            .collect()
    }
}

/// Execution state predicates of a node or flow
pub trait HasExecutionState {
    fn is_armed(&self) -> bool;
    fn is_queued(&self) -> bool;
    fn is_executing(&self) -> bool;
    fn is_done(&self) -> bool;
    fn is_done_locked(&self) -> bool;
    fn in_error_state(&self) -> bool;
    fn is_valid(&self) -> bool;
    fn is_configuration_valid(&self) -> bool;

    /// Whether downstream nodes may arm on top of this one.
    fn is_dependent_armable(&self) -> bool;
    fn is_queueable(&self) -> bool;
    fn is_abortable(&self) -> bool;
    fn is_reloadable(&self) -> bool;
    fn is_configurable(&self) -> bool;
    fn is_executable(&self) -> bool;
    fn is_state_deletable(&self) -> bool;

    /// Whether this element's own request is outstanding.
    fn has_pending_request(&self) -> bool;

    fn state_string(&self) -> String;
}

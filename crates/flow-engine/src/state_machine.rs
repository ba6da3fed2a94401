//! Execution state machine of nodes and lambdas
//!
//! Two orthogonal axes: the node state (validation and execution progress)
//! and the pending state (whether a request to the executor is outstanding).
//! Transitions are driven by [`StateEvent`]s; pairs missing from the table
//! leave the machine untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Node axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Initializing,
    Validating,
    Invalid,
    Valid,
    Armed,
    Queued,
    Executing,
    Aborting,
    /// Aborting, returning to `Valid` afterwards
    AbortingValid,
    Done,
    /// Done without materialized output, inside a locked flow
    DoneLocked,
    Error,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeState::Initializing => "Initializing",
            NodeState::Validating => "Validating",
            NodeState::Invalid => "Invalid",
            NodeState::Valid => "Valid",
            NodeState::Armed => "Armed",
            NodeState::Queued => "Queued",
            NodeState::Executing => "Executing",
            NodeState::Aborting | NodeState::AbortingValid => "Aborting",
            NodeState::Done => "Done",
            NodeState::DoneLocked => "Done-Locked",
            NodeState::Error => "Error",
        };
        write!(f, "{}", label)
    }
}

/// Pending axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingState {
    Idle,
    Pending,
}

impl fmt::Display for PendingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingState::Idle => write!(f, "Idle"),
            PendingState::Pending => write!(f, "Pending"),
        }
    }
}

/// Inputs of the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    BeingValidated,
    ParametersValid,
    ParametersInvalid,
    Armed,
    Disarmed,
    Queued,
    Executing,
    Aborting,
    HasAborted,
    ExecutionFinished,
    LockedExecutionFinished,
    ErrorOccurred,
    PendingSent,
    PendingReturned,
}

/// State entered by a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entered {
    Node(NodeState),
    Pending(PendingState),
}

/// Per node (or lambda) state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateMachine {
    state: NodeState,
    pending: PendingState,
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStateMachine {
    pub fn new() -> Self {
        Self {
            state: NodeState::Initializing,
            pending: PendingState::Idle,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn pending(&self) -> PendingState {
        self.pending
    }

    /// Apply one event. Returns the entered state, if any.
    pub fn fire(&mut self, event: StateEvent) -> Option<Entered> {
        use NodeState as S;
        use StateEvent as E;

        match event {
            E::PendingSent => {
                return (self.pending == PendingState::Idle).then(|| {
                    self.pending = PendingState::Pending;
                    Entered::Pending(PendingState::Pending)
                });
            }
            E::PendingReturned => {
                return (self.pending == PendingState::Pending).then(|| {
                    self.pending = PendingState::Idle;
                    Entered::Pending(PendingState::Idle)
                });
            }
            _ => {}
        }

        let next = match (self.state, event) {
            (
                S::Initializing | S::Invalid | S::Valid | S::Armed | S::Done | S::DoneLocked | S::Error,
                E::BeingValidated,
            ) => S::Validating,

            (S::Validating, E::ParametersInvalid) => S::Invalid,
            (S::Validating, E::ParametersValid) => S::Valid,

            (S::Valid, E::Armed) => S::Armed,

            (S::Armed, E::Queued) => S::Queued,
            (S::Armed, E::Executing) => S::Executing,
            (S::Armed, E::Disarmed) => S::Valid,

            (S::Queued, E::Aborting) => S::Aborting,
            (S::Queued, E::Executing) => S::Executing,
            (S::Queued, E::Armed) => S::Aborting,
            (S::Queued, E::Disarmed) => S::AbortingValid,

            (S::Executing, E::Aborting) => S::Aborting,
            (S::Executing, E::Armed) => S::Aborting,
            (S::Executing, E::Disarmed) => S::AbortingValid,
            (S::Executing, E::ExecutionFinished) => S::Done,
            (S::Executing, E::LockedExecutionFinished) => S::DoneLocked,
            (S::Executing, E::ErrorOccurred) => S::Error,

            (S::Done | S::DoneLocked, E::Queued) => S::Queued,
            (S::Done | S::DoneLocked, E::Executing) => S::Executing,
            (S::Done | S::DoneLocked, E::Armed) => S::Armed,
            (S::Done | S::DoneLocked, E::Disarmed) => S::Valid,
            (S::DoneLocked, E::ExecutionFinished) => S::Done,

            (S::Aborting, E::HasAborted) => S::Armed,
            (S::AbortingValid, E::HasAborted) => S::Valid,

            (S::Error, E::Armed) => S::Armed,
            (S::Error, E::Disarmed) => S::Valid,

            _ => return None,
        };
        self.state = next;
        Some(Entered::Node(next))
    }

    fn fire_all(&mut self, events: &[StateEvent]) -> Vec<Entered> {
        events.iter().filter_map(|event| self.fire(*event)).collect()
    }

    pub fn validate(&mut self) -> Vec<Entered> {
        self.fire_all(&[StateEvent::PendingSent, StateEvent::BeingValidated])
    }

    pub fn validate_done(&mut self, ok: bool) -> Vec<Entered> {
        let result = if ok {
            StateEvent::ParametersValid
        } else {
            StateEvent::ParametersInvalid
        };
        self.fire_all(&[StateEvent::PendingReturned, result])
    }

    pub fn execute(&mut self) -> Vec<Entered> {
        self.fire_all(&[StateEvent::PendingSent, StateEvent::Executing])
    }

    pub fn execute_done(&mut self, ok: bool, locked: bool) -> Vec<Entered> {
        let result = match (ok, locked) {
            (true, true) => StateEvent::LockedExecutionFinished,
            (true, false) => StateEvent::ExecutionFinished,
            (false, _) => StateEvent::ErrorOccurred,
        };
        self.fire_all(&[StateEvent::PendingReturned, result])
    }

    pub fn abort(&mut self) -> Vec<Entered> {
        self.fire_all(&[StateEvent::PendingSent, StateEvent::Aborting])
    }

    pub fn abort_done(&mut self) -> Vec<Entered> {
        self.fire_all(&[StateEvent::PendingReturned, StateEvent::HasAborted])
    }

    fn is_idle(&self) -> bool {
        self.pending == PendingState::Idle
    }

    pub fn is_initialized(&self) -> bool {
        self.state != NodeState::Initializing
    }

    pub fn is_armed(&self) -> bool {
        self.state == NodeState::Armed
    }

    pub fn is_queued(&self) -> bool {
        self.state == NodeState::Queued
    }

    pub fn is_executing(&self) -> bool {
        self.state == NodeState::Executing
    }

    pub fn is_valid(&self) -> bool {
        self.state == NodeState::Valid
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, NodeState::Done | NodeState::DoneLocked)
    }

    pub fn is_done_locked(&self) -> bool {
        self.state == NodeState::DoneLocked
    }

    pub fn in_error_state(&self) -> bool {
        self.state == NodeState::Error
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending == PendingState::Pending
    }

    /// Whether downstream nodes may arm on top of this one.
    pub fn is_dependent_armable(&self) -> bool {
        matches!(
            self.state,
            NodeState::Armed
                | NodeState::Done
                | NodeState::DoneLocked
                | NodeState::Executing
                | NodeState::Queued
        )
    }

    pub fn is_configurable(&self) -> bool {
        self.is_idle()
            && (matches!(
                self.state,
                NodeState::Error | NodeState::Valid | NodeState::Invalid | NodeState::Armed
            ) || self.is_done())
    }

    pub fn is_executable(&self) -> bool {
        self.is_idle() && self.is_armed()
    }

    pub fn is_abortable(&self) -> bool {
        self.is_idle() && (self.is_queued() || self.is_executing())
    }

    pub fn is_reloadable(&self) -> bool {
        self.is_idle()
            && matches!(
                self.state,
                NodeState::Error
                    | NodeState::Valid
                    | NodeState::Invalid
                    | NodeState::Armed
                    | NodeState::DoneLocked
                    | NodeState::Done
            )
    }

    pub fn is_armable(&self) -> bool {
        self.is_idle()
            && matches!(
                self.state,
                NodeState::Done | NodeState::DoneLocked | NodeState::Valid | NodeState::Error
            )
    }

    pub fn is_disarmable(&self) -> bool {
        self.is_idle()
            && matches!(
                self.state,
                NodeState::Done | NodeState::DoneLocked | NodeState::Armed | NodeState::Error
            )
    }

    pub fn is_queueable(&self) -> bool {
        self.is_idle() && (self.is_armed() || self.is_done())
    }

    pub fn is_state_deletable(&self) -> bool {
        !(self.is_executing() || self.is_queued())
    }

    pub fn is_configuration_valid(&self) -> bool {
        self.is_initialized()
            && !matches!(self.state, NodeState::Invalid | NodeState::Validating)
    }

    pub fn state_string(&self) -> String {
        format!("{}, {}", self.state, self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn armed() -> NodeStateMachine {
        let mut machine = NodeStateMachine::new();
        machine.validate();
        machine.validate_done(true);
        machine.fire(StateEvent::Armed);
        machine
    }

    #[test]
    fn test_validation_cycle() {
        let mut machine = NodeStateMachine::new();
        assert!(!machine.is_initialized());

        let entered = machine.validate();
        assert_eq!(
            entered,
            vec![
                Entered::Pending(PendingState::Pending),
                Entered::Node(NodeState::Validating)
            ]
        );
        assert!(machine.has_pending_request());
        assert!(!machine.is_configuration_valid());

        machine.validate_done(false);
        assert_eq!(machine.state(), NodeState::Invalid);
        assert!(!machine.has_pending_request());

        machine.validate();
        machine.validate_done(true);
        assert_eq!(machine.state(), NodeState::Valid);
        assert!(machine.is_configuration_valid());
        assert!(machine.is_armable());
    }

    #[test]
    fn test_execution_cycle() {
        let mut machine = armed();
        assert!(machine.is_executable());
        assert!(machine.is_dependent_armable());

        machine.fire(StateEvent::Queued);
        assert!(machine.is_abortable());
        machine.fire(StateEvent::Executing);
        machine.execute_done(true, true);
        assert_eq!(machine.state(), NodeState::DoneLocked);

        machine.fire(StateEvent::ExecutionFinished);
        assert_eq!(machine.state(), NodeState::Done);

        machine.fire(StateEvent::Disarmed);
        assert_eq!(machine.state(), NodeState::Valid);
    }

    #[test]
    fn test_rearm_while_executing_aborts() {
        let mut machine = armed();
        machine.fire(StateEvent::Executing);
        assert_eq!(
            machine.fire(StateEvent::Armed),
            Some(Entered::Node(NodeState::Aborting))
        );
        machine.fire(StateEvent::HasAborted);
        assert_eq!(machine.state(), NodeState::Armed);

        machine.fire(StateEvent::Queued);
        machine.fire(StateEvent::Disarmed);
        assert_eq!(machine.state(), NodeState::AbortingValid);
        machine.abort_done();
        assert_eq!(machine.state(), NodeState::Valid);
    }

    #[test]
    fn test_error_recovery() {
        let mut machine = armed();
        machine.fire(StateEvent::Executing);
        machine.execute_done(false, false);
        assert!(machine.in_error_state());
        assert!(!machine.is_dependent_armable());

        machine.fire(StateEvent::Armed);
        assert!(machine.is_armed());
    }

    #[test]
    fn test_unknown_pairs_are_ignored() {
        let mut machine = NodeStateMachine::new();
        assert_eq!(machine.fire(StateEvent::Armed), None);
        assert_eq!(machine.fire(StateEvent::PendingReturned), None);
        assert_eq!(machine.state(), NodeState::Initializing);

        let mut machine = armed();
        assert_eq!(machine.fire(StateEvent::HasAborted), None);
        assert_eq!(machine.fire(StateEvent::ExecutionFinished), None);
    }

    #[test]
    fn test_pending_blocks_configuration() {
        let mut machine = armed();
        machine.abort();
        assert!(machine.has_pending_request());
        assert!(!machine.is_configurable());
        assert!(!machine.is_reloadable());
        assert_eq!(machine.state_string(), "Armed, Pending");
    }
}

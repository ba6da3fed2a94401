//! Lambdas
//!
//! A lambda is a subflow whose value is a function. Its contents never
//! execute on their own: the parent flow sees one "Function" output typed
//! by the lambda's flow inputs and its first flow output. Lambdas carry
//! their own state machine and validate synchronously whenever their
//! contents change.

use crate::constants::defaults;
use crate::document::{Document, Position};
use crate::error::Result;
use crate::flow::{FlowKind, LambdaParts};
use crate::ids::{Executable, FlowId, FlowIoId};
use crate::infer::{InferProbe, LambdaProbe};
use crate::port::{PortDefinition, PortKind, PortOwner};
use crate::state_machine::{NodeState, NodeStateMachine};

impl Document {
    /// Create a lambda with one flow input and one flow output.
    pub fn create_lambda(&mut self, parent: FlowId, position: Position) -> Result<FlowId> {
        self.create_function(parent, FlowKind::Lambda(LambdaParts::default()), position)
    }

    pub(crate) fn initialize_lambda(&mut self, lambda: FlowId) -> Result<()> {
        let function_port = self.create_port(
            PortOwner::Flow(lambda),
            PortKind::Output,
            PortDefinition::any(defaults::LAMBDA_OUTPUT_NAME),
            None,
        )?;
        if let Some(parts) = self.flow_mut(lambda)?.lambda_mut() {
            parts.function_port = Some(function_port);
        }

        let flow_output = self.create_flow_output(lambda, None, Some(false))?;
        if let Some(parts) = self.flow_mut(lambda)?.lambda_mut() {
            parts.flow_output = Some(flow_output);
        }
        self.create_flow_input(lambda, None, Some(false))?;
        self.infer_all()
    }

    /// Re-run the lambda's validation unless it is busy.
    pub(crate) fn top_validate(&mut self, lambda: FlowId) -> Result<()> {
        let Some(machine) = self.flows.get(&lambda).and_then(|f| f.lambda()).map(|p| p.machine()) else {
            return Ok(());
        };
        let busy = matches!(
            machine.state(),
            NodeState::Queued
                | NodeState::Executing
                | NodeState::Aborting
                | NodeState::AbortingValid
                | NodeState::Validating
        );
        if busy || machine.has_pending_request() {
            return Ok(());
        }
        self.drive_lambda_validation(lambda)
    }

    fn drive_lambda_validation(&mut self, lambda: FlowId) -> Result<()> {
        let entered = match self.flow_mut(lambda)?.lambda_mut() {
            Some(parts) => NodeStateMachine::validate(&mut parts.machine),
            None => return Ok(()),
        };
        self.apply_entered(Executable::Flow(lambda), entered)
    }

    /// Whether the lambda's contents form a complete function.
    ///
    /// The result output must have a source, every contained node needs
    /// connected inputs and a valid configuration, and every parent input
    /// must come from a dependent-armable source.
    pub(crate) fn internal_validate(&self, lambda: FlowId) -> Result<bool> {
        let f = self.flow(lambda)?;
        let Some(flow_output) = f.lambda().and_then(|p| p.flow_output) else {
            return Ok(false);
        };
        if !self.is_connected(self.flow_io(flow_output)?.port) {
            return Ok(false);
        }

        for executable in self.all_nodes(lambda, false, false) {
            if let Executable::Node(node) = executable {
                if !self.inputs_are_connected(node)? || !self.check(executable, |s| s.is_configuration_valid()) {
                    return Ok(false);
                }
            }
        }

        Ok(f.inputs.iter().all(|port| self.source_is_dependent_armable(*port)))
    }

    /// Validate every lambda from `flow` up to the root.
    pub(crate) fn revalidate_lambdas(&mut self, flow: FlowId) -> Result<()> {
        let chain: Vec<FlowId> = std::iter::once(flow).chain(self.ancestors(flow)).collect();
        for f in chain {
            if self.is_lambda(f) {
                self.top_validate(f)?;
            }
        }
        Ok(())
    }

    /// Whether one more flow input keeps the document well typed. Always
    /// true outside lambdas.
    pub fn can_create_flow_input(&mut self, flow: FlowId) -> Result<bool> {
        if !self.is_lambda(flow) {
            return Ok(true);
        }
        let probe = InferProbe {
            lambda: Some(LambdaProbe {
                lambda: flow,
                extra_input: true,
                exclude_input: None,
            }),
            ..Default::default()
        };
        Ok(self.check_inference(&probe).is_ok())
    }

    /// Whether `flow_input` can go. A lambda keeps at least one input and
    /// its function type must still unify without it.
    pub fn can_remove_flow_input(&mut self, flow: FlowId, flow_input: FlowIoId) -> Result<bool> {
        if !self.is_lambda(flow) {
            return Ok(true);
        }
        if self.flow(flow)?.flow_inputs.len() <= 1 {
            return Ok(false);
        }
        let probe = InferProbe {
            lambda: Some(LambdaProbe {
                lambda: flow,
                extra_input: false,
                exclude_input: Some(flow_input),
            }),
            ..Default::default()
        };
        Ok(self.check_inference(&probe).is_ok())
    }
}

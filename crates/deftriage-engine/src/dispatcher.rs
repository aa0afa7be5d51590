//! Research dispatch
//!
//! Walks the plan in order, handing each pending step to the executor with
//! the capability role its kind allows, until nothing is pending or the
//! run-wide step cap is reached.

use tracing::{debug, info};

use deftriage_tools::{CapabilityRegistry, ToolRole};
use deftriage_utils::error::TriageError;

use crate::defect::DefectRecord;
use crate::events::{EventSink, RunEvent};
use crate::executor::{StepContext, StepLimits, execute_step};
use crate::plan::{Plan, StepKind, StepStatus};
use crate::reasoning::Reasoner;
use crate::state::Observation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatchState {
    Idle,
    Selecting,
    Executing(usize),
    Resolved { incomplete: bool },
}

/// Dispatch bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub step: StepLimits,
    /// Steps executed per run, independent of per-step caps
    pub max_total_steps: usize,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            step: StepLimits::default(),
            max_total_steps: 12,
        }
    }
}

/// How dispatch ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Steps handed to the executor
    pub executed: usize,
    /// Pending steps remained when the global cap was reached
    pub incomplete: bool,
}

/// Closed routing from step kind to capability role.
const fn role_for(kind: StepKind) -> ToolRole {
    match kind {
        StepKind::Investigation => ToolRole::Investigation,
        StepKind::Analysis => ToolRole::Analysis,
    }
}

/// Execute every pending step of `plan` in order.
///
/// # Errors
///
/// Only cancellation. The step being executed is put back to pending and
/// earlier results stay as they were.
pub async fn dispatch(
    reasoner: &Reasoner,
    registry: &CapabilityRegistry,
    defect: &DefectRecord,
    plan: &mut Plan,
    observations: &mut Vec<Observation>,
    limits: DispatchLimits,
    events: &EventSink,
) -> Result<DispatchOutcome, TriageError> {
    let mut state = DispatchState::Idle;
    let mut executed = 0usize;

    loop {
        state = match state {
            DispatchState::Idle => DispatchState::Selecting,
            DispatchState::Selecting => match plan.next_pending() {
                None => DispatchState::Resolved { incomplete: false },
                Some(_) if executed >= limits.max_total_steps => {
                    info!(
                        run_id = %reasoner.run_id(),
                        cap = limits.max_total_steps,
                        pending = plan.pending_count(),
                        "Global step cap reached"
                    );
                    DispatchState::Resolved { incomplete: true }
                }
                Some(index) => DispatchState::Executing(index),
            },
            DispatchState::Executing(index) => {
                run_step(reasoner, registry, defect, plan, observations, index, limits, events).await?;
                executed += 1;
                DispatchState::Selecting
            }
            DispatchState::Resolved { incomplete } => {
                debug!(executed, incomplete, "Dispatch resolved");
                return Ok(DispatchOutcome {
                    executed,
                    incomplete,
                });
            }
        };
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_step(
    reasoner: &Reasoner,
    registry: &CapabilityRegistry,
    defect: &DefectRecord,
    plan: &mut Plan,
    observations: &mut Vec<Observation>,
    index: usize,
    limits: DispatchLimits,
    events: &EventSink,
) -> Result<(), TriageError> {
    let snapshot = plan.clone();
    let step = &mut plan.steps[index];
    let role = role_for(step.kind);

    events.emit(RunEvent::StepStarted {
        index,
        title: step.title.clone(),
        kind: step.kind,
    });
    info!(
        run_id = %reasoner.run_id(),
        step = %step.title,
        kind = %step.kind,
        index,
        "Step started"
    );
    step.status = StepStatus::Running;

    let ctx = StepContext {
        defect,
        plan: &snapshot,
        locale: &snapshot.locale,
        index,
    };
    match execute_step(reasoner, registry, role, step, observations, &ctx, limits.step, events).await {
        Ok(run) => {
            info!(
                run_id = %reasoner.run_id(),
                step = %step.title,
                status = %step.status,
                incomplete = step.incomplete,
                iterations = run.iterations,
                tool_calls = run.tool_calls,
                "Step finished"
            );
            events.emit(RunEvent::StepFinished {
                index,
                status: step.status,
                incomplete: step.incomplete,
            });
            Ok(())
        }
        Err(e) => {
            step.status = StepStatus::Pending;
            Err(e)
        }
    }
}

//! Step execution
//!
//! A step runs as a bounded conversation with the reasoning backend. Each
//! turn the backend either answers or asks for capability invocations; the
//! executor performs them through the [`CapabilityRegistry`] and feeds the
//! results back. Capability failures become diagnostics in the conversation.
//! Only a failing backend fails the step, and only cancellation escapes.

use tracing::{debug, info, warn};

use deftriage_llm::Message;
use deftriage_tools::{CapabilityRegistry, ToolRole};
use deftriage_utils::error::{StepIterationExceeded, TriageError};

use crate::defect::DefectRecord;
use crate::events::{EventSink, RunEvent, excerpt};
use crate::plan::{Plan, Step, StepStatus};
use crate::prompts::{self, PromptVars};
use crate::reasoning::Reasoner;
use crate::state::Observation;

/// Capability output longer than this is cut before it goes back to the backend
const MAX_TOOL_RESULT_CHARS: usize = 20_000;

/// Tool results quoted in a partial result
const PARTIAL_EVIDENCE_RESULTS: usize = 3;

/// Per-step bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLimits {
    /// Reasoning turns before the step is cut off
    pub max_iterations: u32,
    /// Capability invocations across all turns
    pub max_tool_calls: u32,
}

impl Default for StepLimits {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tool_calls: 24,
        }
    }
}

/// Read-only context for one step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub defect: &'a DefectRecord,
    pub plan: &'a Plan,
    pub locale: &'a str,
    /// Position of the step in the plan
    pub index: usize,
}

/// Counters from one step execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepRun {
    pub iterations: u32,
    pub tool_calls: u32,
}

/// Run `step` to completion and commit its result.
///
/// On success `step.result`, `step.status` and `step.incomplete` are set and
/// one observation is appended. A step that hits its iteration cap is done
/// but incomplete; a step whose reasoning call fails is failed. Either way
/// the result is committed.
///
/// # Errors
///
/// `TriageError::Cancelled`, or `PromptTemplate` for a broken stage prompt.
/// Nothing is committed in either case.
#[allow(clippy::too_many_arguments)]
pub async fn execute_step(
    reasoner: &Reasoner,
    registry: &CapabilityRegistry,
    role: ToolRole,
    step: &mut Step,
    observations: &mut Vec<Observation>,
    ctx: &StepContext<'_>,
    limits: StepLimits,
    events: &EventSink,
) -> Result<StepRun, TriageError> {
    let stage = step.kind.prompt();
    let tools = registry.specs(role);
    let names = registry.names(role);
    let capabilities = if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    };

    let vars = PromptVars::base(ctx.locale, ctx.plan.steps.len()).set("capabilities", capabilities);
    let mut messages = vec![
        Message::system(prompts::render(stage, &vars)?),
        Message::user(step_request(step, observations, ctx)),
    ];

    let mut run = StepRun::default();
    let mut budget_spent = false;
    let mut last_text = String::new();
    let mut recent_results: Vec<String> = Vec::new();

    while run.iterations < limits.max_iterations {
        run.iterations += 1;
        let offered = if budget_spent { Vec::new() } else { tools.clone() };

        let result = match reasoner.invoke(stage.as_ref(), messages.clone(), offered).await {
            Ok(result) => result,
            Err(e @ TriageError::Cancelled { .. }) => return Err(e),
            Err(e) => {
                warn!(run_id = %reasoner.run_id(), step = %step.title, error = %e, "Step failed");
                commit(
                    step,
                    observations,
                    StepStatus::Failed,
                    format!("Step failed: {e}"),
                    false,
                );
                return Ok(run);
            }
        };

        if !result.raw_response.trim().is_empty() {
            last_text = result.raw_response.clone();
        }
        if !result.requests_tools() {
            debug!(step = %step.title, iteration = run.iterations, "Step answered");
            commit(step, observations, StepStatus::Done, last_text, budget_spent);
            return Ok(run);
        }

        messages.push(Message::assistant_with_calls(
            result.raw_response,
            result.tool_calls.clone(),
        ));
        for call in result.tool_calls {
            events.emit(RunEvent::ToolCall {
                step: ctx.index,
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });

            let (ok, content) = if run.tool_calls >= limits.max_tool_calls {
                budget_spent = true;
                (
                    false,
                    format!(
                        "Error: tool-call budget of {} is spent. Answer with the evidence you have.",
                        limits.max_tool_calls
                    ),
                )
            } else {
                run.tool_calls += 1;
                debug!(
                    run_id = %reasoner.run_id(),
                    step = %step.title,
                    capability = %call.name,
                    iteration = run.iterations,
                    "Capability call"
                );
                match registry.invoke(role, &call.name, &call.arguments).await {
                    Ok(text) => (true, truncate_result(text)),
                    Err(e) => {
                        debug!(capability = %call.name, error = %e, "Capability error fed back");
                        (false, e.diagnostic())
                    }
                }
            };

            events.emit(RunEvent::ToolResult {
                step: ctx.index,
                name: call.name.clone(),
                ok,
                excerpt: excerpt(&content, 200),
            });
            if ok {
                recent_results.push(format!("[{}]\n{}", call.name, excerpt(&content, 2_000)));
            }
            messages.push(Message::tool_result(call.id, content));
        }
    }

    let exceeded = StepIterationExceeded {
        step: step.title.clone(),
        limit: limits.max_iterations,
    };
    info!(run_id = %reasoner.run_id(), "{exceeded}; keeping partial result");
    commit(
        step,
        observations,
        StepStatus::Done,
        partial_result(&exceeded, &last_text, &recent_results),
        true,
    );
    Ok(run)
}

fn commit(
    step: &mut Step,
    observations: &mut Vec<Observation>,
    status: StepStatus,
    result: String,
    incomplete: bool,
) {
    observations.push(Observation {
        step: step.title.clone(),
        kind: step.kind,
        content: result.clone(),
        incomplete,
        failed: status == StepStatus::Failed,
    });
    step.result = Some(result);
    step.status = status;
    step.incomplete = incomplete;
}

fn step_request(step: &Step, observations: &[Observation], ctx: &StepContext<'_>) -> String {
    let mut body = format!(
        "# Defect\n\n{}\n\n# Plan\n\n{}",
        ctx.defect.user_message(None),
        ctx.plan.outline()
    );
    if !observations.is_empty() {
        body.push_str("\n# Findings So Far\n");
        for obs in observations {
            body.push_str(&format!("\n## {}\n\n{}\n", obs.step, obs.content.trim()));
        }
    }
    body.push_str(&format!(
        "\n# Current Step\n\n## {}\n\n{}\n",
        step.title, step.description
    ));
    body
}

fn truncate_result(text: String) -> String {
    if text.chars().count() <= MAX_TOOL_RESULT_CHARS {
        return text;
    }
    let mut cut: String = text.chars().take(MAX_TOOL_RESULT_CHARS).collect();
    cut.push_str("\n[output truncated]");
    cut
}

fn partial_result(exceeded: &StepIterationExceeded, last_text: &str, recent: &[String]) -> String {
    let mut out = format!("Incomplete: {exceeded}.");
    if !last_text.trim().is_empty() {
        out.push_str("\n\n");
        out.push_str(last_text.trim());
    }
    let start = recent.len().saturating_sub(PARTIAL_EVIDENCE_RESULTS);
    if start < recent.len() {
        out.push_str("\n\nEvidence gathered:\n");
        for r in &recent[start..] {
            out.push('\n');
            out.push_str(r);
            out.push('\n');
        }
    }
    out
}

//! Workflow controller
//!
//! Drives one run through `Start -> Planning -> (HumanReview)? -> Dispatching
//! -> Reporting -> Done`. Any failure moves the run to `Failed`; cancellation
//! ends it as `Cancelled`. Plan review does not block a task: the controller
//! returns a [`Checkpoint`] and a later [`WorkflowController::resume`] call
//! re-enters the machine with the reviewer's decision.
//!
//! Use [`WorkflowController::from_config`] for CLI behavior or
//! [`WorkflowController::new`] with explicit [`EngineSettings`] when embedding.

use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, warn};

use deftriage_config::Config;
use deftriage_llm::LlmBackend;
use deftriage_tools::{CapabilityRegistry, format_hits};
use deftriage_utils::error::TriageError;
use deftriage_utils::logging::{log_stage_complete, log_stage_error, log_stage_start, run_span};

use crate::defect::{DefectRecord, SourceContext};
use crate::dispatcher::{DispatchLimits, dispatch};
use crate::events::{EventSink, RunEvent};
use crate::executor::StepLimits;
use crate::plan::{PlanRequest, build_plan, validate_plan_document};
use crate::reasoning::Reasoner;
use crate::reporter::{ReportRequest, synthesize};
use crate::state::{Checkpoint, ReviewDecision, RunOutcome, RunPhase, RunState};

/// Identifiers quoted in a defect summary, e.g. `'sock'` or `` `buf` ``
static QUOTED_IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"['`]([A-Za-z_][A-Za-z0-9_]*)['`]").unwrap());

/// Identifiers searched during background investigation
const BACKGROUND_QUERIES: usize = 3;

/// Hits kept per background query
const BACKGROUND_HITS: usize = 5;

/// Orchestration caps and run defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Re-plans allowed after review rejections
    pub max_plan_iterations: u32,
    /// Steps kept from a plan
    pub max_step_num: usize,
    pub dispatch: DispatchLimits,
    /// Lines either side of the reported line
    pub context_window: u32,
    pub locale: String,
    /// When false, runs suspend for plan review after planning
    pub auto_accept_plan: bool,
    pub background_investigation: bool,
    pub llm_timeout: Duration,
    pub model: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_plan_iterations: 1,
            max_step_num: 3,
            dispatch: DispatchLimits::default(),
            context_window: 20,
            locale: "en-US".to_string(),
            auto_accept_plan: true,
            background_investigation: false,
            llm_timeout: Duration::from_secs(300),
            model: None,
        }
    }
}

impl EngineSettings {
    /// Settings from the `[engine]` section, falling back to defaults.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        let engine = &config.engine;
        Self {
            max_plan_iterations: engine.max_plan_iterations.unwrap_or(defaults.max_plan_iterations),
            max_step_num: engine.max_step_num.unwrap_or(defaults.max_step_num),
            dispatch: DispatchLimits {
                step: StepLimits {
                    max_iterations: engine
                        .max_step_iterations
                        .unwrap_or(defaults.dispatch.step.max_iterations),
                    max_tool_calls: engine
                        .max_tool_calls
                        .unwrap_or(defaults.dispatch.step.max_tool_calls),
                },
                max_total_steps: engine
                    .max_total_steps
                    .unwrap_or(defaults.dispatch.max_total_steps),
            },
            context_window: engine.context_window.unwrap_or(defaults.context_window),
            locale: engine.locale.clone().unwrap_or(defaults.locale),
            auto_accept_plan: engine.auto_accept_plan.unwrap_or(defaults.auto_accept_plan),
            background_investigation: engine
                .background_investigation
                .unwrap_or(defaults.background_investigation),
            llm_timeout: engine
                .llm_timeout_secs
                .map_or(defaults.llm_timeout, Duration::from_secs),
            model: config.llm.openai.as_ref().and_then(|o| o.model.clone()),
        }
    }
}

/// Runs the triage state machine for single defects.
///
/// Cheap to share: the backend and capabilities sit behind `Arc`, and
/// distinct runs share nothing else.
#[derive(Clone)]
pub struct WorkflowController {
    backend: Arc<dyn LlmBackend>,
    registry: Arc<CapabilityRegistry>,
    settings: EngineSettings,
}

impl WorkflowController {
    #[must_use]
    pub fn new(backend: Arc<dyn LlmBackend>, registry: Arc<CapabilityRegistry>, settings: EngineSettings) -> Self {
        Self {
            backend,
            registry,
            settings,
        }
    }

    /// Backend, capabilities and settings from the effective configuration.
    ///
    /// # Errors
    ///
    /// `Llm` for an unknown or misconfigured provider, `Capability` when the
    /// project root or the configured interpreter cannot be used.
    pub fn from_config(config: &Config) -> Result<Self, TriageError> {
        let backend = deftriage_llm::from_config(config)?;
        let registry = CapabilityRegistry::from_config(config)?;
        Ok(Self::new(backend, Arc::new(registry), EngineSettings::from_config(config)))
    }

    #[must_use]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Run a defect from `Start` until it is done or suspends for review.
    ///
    /// # Errors
    ///
    /// `PlanFormat` for an unusable plan, `Llm` when planning or reporting
    /// cannot reach the backend, `Cancelled` when `cancel` fires. A `failed`
    /// event is emitted for every error except cancellation.
    pub async fn start(
        &self,
        defect: DefectRecord,
        instruction: Option<String>,
        events: &EventSink,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, TriageError> {
        let run_id = new_run_id(&defect);
        let span = run_span(&run_id, &defect.file, defect.line);
        let mut state = RunState::new(run_id, defect, self.settings.locale.clone());
        state.instruction = instruction;

        info!(parent: &span, run_id = %state.run_id, defect = %state.defect, "Run started");
        let review = !self.settings.auto_accept_plan;
        self.advance(state, events, cancel, review).instrument(span).await
    }

    /// Continue a run suspended for plan review.
    ///
    /// Accept proceeds to dispatch. Reject records the feedback and re-plans
    /// while re-plans remain, otherwise forces the current plan through. Edit
    /// validates the supplied document and proceeds with it. A re-planned run
    /// suspends for review again.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the checkpoint is not waiting for review,
    /// `PlanFormat` for an unusable edited plan, plus everything
    /// [`start`](Self::start) can return.
    pub async fn resume(
        &self,
        checkpoint: Checkpoint,
        decision: ReviewDecision,
        events: &EventSink,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, TriageError> {
        let mut state = checkpoint.state;
        if state.phase != RunPhase::HumanReview {
            return Err(TriageError::InvalidTransition {
                from: state.phase.to_string(),
                to: RunPhase::Dispatching.to_string(),
            });
        }
        let span = run_span(&state.run_id, &state.defect.file, state.defect.line);

        match decision {
            ReviewDecision::Accept => {
                info!(parent: &span, run_id = %state.run_id, "Plan accepted");
                state.phase = RunPhase::Dispatching;
            }
            ReviewDecision::Reject { feedback } => {
                state.history.push(format!("[FEEDBACK] {feedback}"));
                // plan_iterations counts generated plans, the first included
                if state.plan_iterations <= self.settings.max_plan_iterations {
                    info!(parent: &span, run_id = %state.run_id, "Plan rejected, re-planning");
                    state.phase = RunPhase::Planning;
                } else {
                    warn!(
                        parent: &span,
                        run_id = %state.run_id,
                        iterations = state.plan_iterations,
                        "Re-plan limit reached, proceeding with the last plan"
                    );
                    state.phase = RunPhase::Dispatching;
                }
            }
            ReviewDecision::Edit { plan } => {
                let version = state.plan.as_ref().map_or(0, |p| p.version) + 1;
                let mut edited =
                    match validate_plan_document(&plan, &state.locale, self.settings.max_step_num) {
                        Ok(edited) => edited,
                        Err(e) => {
                            let err = TriageError::from(e);
                            events.emit(RunEvent::Failed {
                                error: err.to_string(),
                            });
                            return Err(err);
                        }
                    };
                edited.version = version;
                info!(parent: &span, run_id = %state.run_id, version, "Plan replaced by reviewer");
                events.emit(RunEvent::PlanCreated {
                    version,
                    steps: edited.steps.len(),
                    has_enough_context: edited.has_enough_context,
                });
                state.plan = Some(edited);
                state.phase = RunPhase::Dispatching;
            }
        }

        self.advance(state, events, cancel, true).instrument(span).await
    }

    async fn advance(
        &self,
        mut state: RunState,
        events: &EventSink,
        cancel: CancellationToken,
        review: bool,
    ) -> Result<RunOutcome, TriageError> {
        let mut reasoner = Reasoner::new(self.backend.clone(), state.run_id.clone(), cancel)
            .with_timeout(self.settings.llm_timeout);
        if let Some(model) = &self.settings.model {
            reasoner = reasoner.with_model(model.clone());
        }

        loop {
            let phase = state.phase;
            if phase == RunPhase::Done {
                events.emit(RunEvent::Done {
                    defect_type: state.verdict.as_ref().map(|v| v.defect_type),
                    incomplete: state.incomplete,
                });
                info!(
                    run_id = %state.run_id,
                    defect_type = ?state.verdict.as_ref().map(|v| v.defect_type),
                    incomplete = state.incomplete,
                    "Run completed"
                );
                return Ok(RunOutcome::Completed(Box::new(state)));
            }
            if phase == RunPhase::HumanReview {
                let version = state.plan.as_ref().map_or(0, |p| p.version);
                events.emit(RunEvent::ReviewRequested { version });
                info!(run_id = %state.run_id, version, "Run suspended for plan review");
                let prompt = review_prompt(&state);
                return Ok(RunOutcome::Suspended(Box::new(Checkpoint::new(state, prompt))));
            }
            if phase.is_terminal() {
                return Err(TriageError::InvalidTransition {
                    from: phase.to_string(),
                    to: RunPhase::Done.to_string(),
                });
            }

            let started = Instant::now();
            log_stage_start(&state.run_id, &phase.to_string());
            match self.run_phase(&mut state, &reasoner, events, review).await {
                Ok(next) => {
                    log_stage_complete(&state.run_id, &phase.to_string(), started.elapsed().as_millis());
                    state.phase = next;
                }
                Err(err) => {
                    let elapsed = started.elapsed().as_millis();
                    if let TriageError::Cancelled { .. } = err {
                        state.phase = RunPhase::Cancelled;
                        info!(run_id = %state.run_id, stage = %phase, "Run cancelled");
                    } else {
                        state.phase = RunPhase::Failed;
                        log_stage_error(&state.run_id, &phase.to_string(), &err.to_string(), elapsed);
                        events.emit(RunEvent::Failed {
                            error: err.to_string(),
                        });
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Execute one non-terminal phase and name the next.
    async fn run_phase(
        &self,
        state: &mut RunState,
        reasoner: &Reasoner,
        events: &EventSink,
        review: bool,
    ) -> Result<RunPhase, TriageError> {
        match state.phase {
            RunPhase::Start => {
                state.source =
                    SourceContext::acquire(&state.defect, &self.registry, self.settings.context_window).await;
                if self.settings.background_investigation {
                    state.background = self.background_investigation(&state.defect).await;
                }
                Ok(RunPhase::Planning)
            }
            RunPhase::Planning => {
                let version = state.plan.as_ref().map_or(0, |p| p.version) + 1;
                let request = PlanRequest {
                    defect: &state.defect,
                    source: &state.source,
                    history: &state.history,
                    previous: state.plan.as_ref(),
                    instruction: state.instruction.as_deref(),
                    background: state.background.as_deref(),
                    locale: &state.locale,
                    max_steps: self.settings.max_step_num,
                };
                let plan = build_plan(reasoner, &request, version).await?;
                events.emit(RunEvent::PlanCreated {
                    version,
                    steps: plan.steps.len(),
                    has_enough_context: plan.has_enough_context,
                });
                state.locale.clone_from(&plan.locale);
                state.plan = Some(plan);
                state.plan_iterations += 1;
                Ok(if review {
                    RunPhase::HumanReview
                } else {
                    RunPhase::Dispatching
                })
            }
            RunPhase::Dispatching => {
                let Some(plan) = state.plan.as_mut() else {
                    return Err(TriageError::InvalidTransition {
                        from: RunPhase::Dispatching.to_string(),
                        to: RunPhase::Reporting.to_string(),
                    });
                };
                if plan.has_enough_context {
                    info!(run_id = %state.run_id, "Plan has enough context, skipping dispatch");
                } else {
                    let outcome = dispatch(
                        reasoner,
                        &self.registry,
                        &state.defect,
                        plan,
                        &mut state.observations,
                        self.settings.dispatch,
                        events,
                    )
                    .await?;
                    state.incomplete = outcome.incomplete;
                }
                Ok(RunPhase::Reporting)
            }
            RunPhase::Reporting => {
                let request = ReportRequest {
                    defect: &state.defect,
                    plan: state.plan.as_ref(),
                    observations: &state.observations,
                    locale: &state.locale,
                };
                let report = synthesize(reasoner, &request, events).await?;
                state.narrative = Some(report.narrative);
                state.verdict = report.verdict;
                state.verdict_error = report.verdict_error.map(|e| e.to_string());
                Ok(RunPhase::Done)
            }
            other => Err(TriageError::InvalidTransition {
                from: other.to_string(),
                to: RunPhase::Planning.to_string(),
            }),
        }
    }

    /// Search for identifiers quoted in the summary. Best-effort.
    async fn background_investigation(&self, defect: &DefectRecord) -> Option<String> {
        let mut queries: Vec<&str> = Vec::new();
        for caps in QUOTED_IDENT.captures_iter(&defect.summary) {
            if let Some(m) = caps.get(1)
                && !queries.contains(&m.as_str())
            {
                queries.push(m.as_str());
            }
        }
        if queries.is_empty() {
            debug!("No quoted identifiers for background investigation");
            return None;
        }

        let mut findings = String::new();
        for query in queries.into_iter().take(BACKGROUND_QUERIES) {
            let pattern = format!(r"\b{query}\b");
            match self.registry.search().search(&pattern, None, None).await {
                Ok(hits) => {
                    let shown = &hits[..hits.len().min(BACKGROUND_HITS)];
                    findings.push_str(&format!(
                        "### Search: {query} ({} matches)\n\n{}\n",
                        hits.len(),
                        format_hits(shown)
                    ));
                }
                Err(e) => warn!(query, error = %e, "Background search failed"),
            }
        }
        (!findings.is_empty()).then_some(findings)
    }
}

fn new_run_id(defect: &DefectRecord) -> String {
    let now = Utc::now();
    let mut hasher = blake3::Hasher::new();
    hasher.update(defect.origin_key().as_bytes());
    hasher.update(&now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    format!(
        "{}-{}",
        now.format("%Y%m%dT%H%M%S"),
        &hasher.finalize().to_hex()[..8]
    )
}

fn review_prompt(state: &RunState) -> String {
    let outline = state
        .plan
        .as_ref()
        .map_or_else(|| "(no plan)".to_string(), |p| p.outline());
    format!(
        "Review the investigation plan for {}.\n\n{outline}\n\
         Accept it, reject it with feedback, or replace it with an edited plan document.",
        state.defect
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepStatus;
    use crate::reporter::DefectType;
    use deftriage_llm::test_support::{ScriptedBackend, ScriptedReply};
    use deftriage_tools::{DirectoryLister, FsCodeLookup, NativeSearch, ProjectRoot, SearchLimits, build_globset};
    use tempfile::TempDir;

    const PLAN_ONE_STEP: &str = r#"{"has_enough_context": false, "title": "Check sock", "rationale": "r",
        "steps": [{"title": "Find checks", "description": "Search for sock checks", "kind": "investigation"}]}"#;
    const PLAN_ENOUGH: &str = r#"{"has_enough_context": true, "title": "Obvious", "steps": []}"#;
    const REPORT_BUG: &str = "## Conclusion\n\nNo check.\n\n```json\n{\"defect_type\": \"bug\", \"defect_description\": \"sock is never checked\"}\n```";

    fn controller(dir: &TempDir, backend: Arc<ScriptedBackend>, settings: EngineSettings) -> WorkflowController {
        std::fs::write(dir.path().join("net.c"), "int f(int *sock) {\n  return *sock;\n}\n").unwrap();
        let root = ProjectRoot::new(dir.path()).unwrap();
        let exclude = build_globset(&[]).unwrap();
        let registry = CapabilityRegistry::new(
            Arc::new(FsCodeLookup::new(root.clone())),
            Arc::new(NativeSearch::new(root.clone(), exclude.clone(), SearchLimits::default())),
        )
        .with_listing(DirectoryLister::new(root, exclude, 2));
        WorkflowController::new(backend, Arc::new(registry), settings)
    }

    fn defect() -> DefectRecord {
        DefectRecord::from_fields("net.c", "2", "error", "nullPointer", "Possible null dereference: 'sock'").unwrap()
    }

    fn reviewing() -> EngineSettings {
        EngineSettings {
            auto_accept_plan: false,
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_reaches_done() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ONE_STEP),
            ScriptedReply::text("sock is dereferenced without a check"),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let ctl = controller(&dir, backend.clone(), EngineSettings::default());

        let outcome = ctl
            .start(defect(), None, &EventSink::none(), CancellationToken::new())
            .await
            .unwrap();
        let state = outcome.completed().unwrap();

        assert_eq!(state.phase, RunPhase::Done);
        assert_eq!(state.verdict.as_ref().unwrap().defect_type, DefectType::Bug);
        assert_eq!(state.observations.len(), 1);
        assert!(state.source.code_window.as_deref().unwrap().contains(">>"));
        assert_eq!(backend.calls_for_stage("planner"), 1);
        assert_eq!(backend.calls_for_stage("reporter"), 1);
    }

    #[tokio::test]
    async fn test_enough_context_skips_dispatch() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ENOUGH),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let ctl = controller(&dir, backend.clone(), EngineSettings::default());

        let outcome = ctl
            .start(defect(), None, &EventSink::none(), CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.completed().unwrap().observations.is_empty());
        assert_eq!(backend.calls_for_stage("investigator"), 0);
        assert_eq!(backend.calls_for_stage("analyst"), 0);
    }

    #[tokio::test]
    async fn test_unusable_plan_fails_run_with_event() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([ScriptedReply::text("I cannot plan this.")]));
        let ctl = controller(&dir, backend, EngineSettings::default());
        let (sink, mut rx) = EventSink::channel();

        let err = ctl
            .start(defect(), None, &sink, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::PlanFormat(_)));

        drop(sink);
        let mut last = None;
        while let Some(ev) = rx.recv().await {
            last = Some(ev);
        }
        assert_eq!(last.map(|e| e.name()), Some("failed"));
    }

    #[tokio::test]
    async fn test_review_suspends_then_accept_completes() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ONE_STEP),
            ScriptedReply::text("no check"),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let ctl = controller(&dir, backend.clone(), reviewing());

        let outcome = ctl
            .start(defect(), None, &EventSink::none(), CancellationToken::new())
            .await
            .unwrap();
        let checkpoint = outcome.checkpoint().unwrap().clone();
        assert_eq!(checkpoint.state.phase, RunPhase::HumanReview);
        assert!(checkpoint.review_prompt.contains("Find checks"));
        assert_eq!(backend.calls().len(), 1);

        let outcome = ctl
            .resume(checkpoint, ReviewDecision::Accept, &EventSink::none(), CancellationToken::new())
            .await
            .unwrap();
        let state = outcome.completed().unwrap();
        assert_eq!(state.plan.as_ref().unwrap().steps[0].status, StepStatus::Done);
        assert_eq!(state.plan_iterations, 1);
    }

    #[tokio::test]
    async fn test_reject_replans_then_forces_last_plan() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ONE_STEP),
            ScriptedReply::text(PLAN_ENOUGH),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let ctl = controller(&dir, backend.clone(), reviewing());
        let none = EventSink::none();

        let first = ctl.start(defect(), None, &none, CancellationToken::new()).await.unwrap();
        let second = ctl
            .resume(
                first.checkpoint().unwrap().clone(),
                ReviewDecision::Reject {
                    feedback: "look at the caller".to_string(),
                },
                &none,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let cp = second.checkpoint().unwrap().clone();
        assert_eq!(cp.state.plan.as_ref().unwrap().version, 2);
        assert_eq!(cp.state.history, vec!["[FEEDBACK] look at the caller".to_string()]);
        let replan = &backend.calls()[1];
        assert!(replan.messages.iter().any(|m| m.content.contains("[FEEDBACK] look at the caller")));

        let done = ctl
            .resume(
                cp,
                ReviewDecision::Reject {
                    feedback: "still wrong".to_string(),
                },
                &none,
                CancellationToken::new(),
            )
            .await
            .unwrap();
        let state = done.completed().unwrap();
        assert_eq!(state.plan.as_ref().unwrap().version, 2);
        assert_eq!(backend.calls_for_stage("planner"), 2);
    }

    #[tokio::test]
    async fn test_edit_replaces_plan() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ONE_STEP),
            ScriptedReply::text("analysed"),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let ctl = controller(&dir, backend.clone(), reviewing());
        let none = EventSink::none();

        let first = ctl.start(defect(), None, &none, CancellationToken::new()).await.unwrap();
        let edited = r#"{'title': 'Mine', 'steps': [{'title': 'Think', 'description': 'reason', 'kind': 'analysis'}]}"#;
        let done = ctl
            .resume(
                first.checkpoint().unwrap().clone(),
                ReviewDecision::Edit {
                    plan: edited.to_string(),
                },
                &none,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let plan = done.completed().unwrap().plan.clone().unwrap();
        assert_eq!(plan.title, "Mine");
        assert_eq!(plan.version, 2);
        assert_eq!(backend.calls_for_stage("analyst"), 1);
    }

    #[tokio::test]
    async fn test_resume_of_finished_run_is_rejected() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([]));
        let ctl = controller(&dir, backend, reviewing());
        let mut state = RunState::new("run-1", defect(), "en-US");
        state.phase = RunPhase::Done;

        let err = ctl
            .resume(
                Checkpoint::new(state, String::new()),
                ReviewDecision::Accept,
                &EventSink::none(),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TriageError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_background_investigation_reaches_planner() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::new([
            ScriptedReply::text(PLAN_ENOUGH),
            ScriptedReply::text(REPORT_BUG),
        ]));
        let settings = EngineSettings {
            background_investigation: true,
            ..EngineSettings::default()
        };
        let ctl = controller(&dir, backend.clone(), settings);

        ctl.start(defect(), None, &EventSink::none(), CancellationToken::new())
            .await
            .unwrap();

        let planner = &backend.calls()[0];
        assert!(planner.messages[0].content.contains("### Search: sock"));
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config::builder()
            .max_total_steps(4)
            .auto_accept_plan(false)
            .locale("de-DE")
            .build()
            .unwrap();
        let settings = EngineSettings::from_config(&config);
        assert_eq!(settings.dispatch.max_total_steps, 4);
        assert!(!settings.auto_accept_plan);
        assert_eq!(settings.locale, "de-DE");
    }

    #[test]
    fn test_run_ids_are_distinct() {
        assert_ne!(new_run_id(&defect()), new_run_id(&defect()));
    }
}

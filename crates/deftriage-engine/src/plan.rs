//! Investigation plans
//!
//! The planner returns a JSON document describing the steps needed to
//! classify a defect. Reasoning output is rarely clean JSON, so
//! [`validate_plan_document`] repairs it, accepts older field names and
//! fills safe defaults before anything downstream sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString, VariantNames};
use tracing::{debug, info, warn};

use deftriage_extraction::parse_lenient;
use deftriage_llm::Message;
use deftriage_utils::error::{PlanFormatError, TriageError};

use crate::defect::{DefectRecord, SourceContext};
use crate::prompts::{self, PromptKind, PromptVars};
use crate::reasoning::Reasoner;

/// What a step does, and therefore which capabilities it may use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepKind {
    /// Gather evidence from the codebase
    Investigation,
    /// Reason over gathered evidence
    Analysis,
}

impl StepKind {
    /// Accepts current names plus the legacy `research`/`processing`.
    #[must_use]
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "investigation" | "research" | "investigate" => Some(Self::Investigation),
            "analysis" | "processing" | "analyze" | "analyse" => Some(Self::Analysis),
            _ => None,
        }
    }

    #[must_use]
    pub const fn prompt(self) -> PromptKind {
        match self {
            Self::Investigation => PromptKind::Investigator,
            Self::Analysis => PromptKind::Analyst,
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

/// One unit of plan work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub title: String,
    pub description: String,
    pub kind: StepKind,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub status: StepStatus,
    /// Set when the step stopped at its iteration or tool-call cap
    #[serde(default)]
    pub incomplete: bool,
}

impl Step {
    #[must_use]
    pub fn new(title: impl Into<String>, description: impl Into<String>, kind: StepKind) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            kind,
            result: None,
            status: StepStatus::Pending,
            incomplete: false,
        }
    }

    /// Done and failed steps are both resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.status, StepStatus::Done | StepStatus::Failed)
    }
}

/// Versioned, ordered investigation plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Incremented by every (re-)plan
    pub version: u32,
    pub locale: String,
    pub has_enough_context: bool,
    pub rationale: String,
    pub title: String,
    pub steps: Vec<Step>,
}

impl Plan {
    /// Index of the first pending step.
    #[must_use]
    pub fn next_pending(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| s.status == StepStatus::Pending)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .count()
    }

    /// The plan as the planner would have written it, without results.
    #[must_use]
    pub fn to_document(&self) -> Value {
        json!({
            "locale": self.locale,
            "has_enough_context": self.has_enough_context,
            "rationale": self.rationale,
            "title": self.title,
            "steps": self.steps.iter().map(|s| json!({
                "title": s.title,
                "description": s.description,
                "kind": s.kind,
            })).collect::<Vec<_>>(),
        })
    }

    /// Numbered step list for prompts.
    #[must_use]
    pub fn outline(&self) -> String {
        let mut out = format!("# {}\n", self.title);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {}: {}\n",
                i + 1,
                step.kind,
                step.title,
                step.description
            ));
        }
        out
    }
}

/// Parse, repair and normalize a plan document.
///
/// Code fences, smart quotes, single quotes, unquoted keys and trailing
/// commas are repaired. `thought` is accepted for `rationale` and
/// `step_type` for `kind`. Missing flags default to `has_enough_context =
/// false`, `locale = default_locale` and `kind = investigation`. Steps
/// beyond `max_steps` are dropped. The returned plan has version 0.
///
/// # Errors
///
/// `PlanFormatError` when no repair strategy yields a JSON object with
/// plan fields.
pub fn validate_plan_document(
    raw: &str,
    default_locale: &str,
    max_steps: usize,
) -> Result<Plan, PlanFormatError> {
    if raw.trim().is_empty() {
        return Err(PlanFormatError::Empty);
    }
    // Prose without any object would otherwise repair into a bare string
    if !raw.contains('{') {
        return Err(PlanFormatError::Unparseable {
            reason: "no JSON object in plan document".to_string(),
            excerpt: raw.chars().take(200).collect(),
        });
    }
    let value: Value = parse_lenient(raw).map_err(|e| PlanFormatError::Unparseable {
        reason: e.reason,
        excerpt: e.excerpt,
    })?;
    let obj = value.as_object().ok_or_else(|| PlanFormatError::InvalidField {
        field: "plan".to_string(),
        reason: "expected a JSON object".to_string(),
    })?;

    if !obj.contains_key("steps") && !obj.contains_key("has_enough_context") {
        return Err(PlanFormatError::MissingField {
            field: "steps".to_string(),
        });
    }

    let has_enough_context = match obj.get("has_enough_context") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        Some(other) => {
            return Err(PlanFormatError::InvalidField {
                field: "has_enough_context".to_string(),
                reason: format!("expected a boolean, got {other}"),
            });
        }
    };

    let steps: Vec<Step> = match obj.get("steps") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().filter_map(parse_step).collect(),
        Some(other) => {
            return Err(PlanFormatError::InvalidField {
                field: "steps".to_string(),
                reason: format!("expected an array, got {}", type_name(other)),
            });
        }
    };
    let total = steps.len();
    let steps: Vec<Step> = steps.into_iter().take(max_steps).collect();
    if total > steps.len() {
        debug!(total, kept = steps.len(), "Truncated plan steps");
    }

    Ok(Plan {
        version: 0,
        locale: text(obj, &["locale"]).unwrap_or_else(|| default_locale.to_string()),
        has_enough_context,
        rationale: text(obj, &["rationale", "thought"]).unwrap_or_default(),
        title: text(obj, &["title"]).unwrap_or_default(),
        steps,
    })
}

fn parse_step(item: &Value) -> Option<Step> {
    match item {
        Value::String(s) if !s.trim().is_empty() => {
            Some(Step::new(s.trim(), s.trim(), StepKind::Investigation))
        }
        Value::Object(obj) => {
            let title = text(obj, &["title", "name"]).unwrap_or_default();
            let description = text(obj, &["description", "details"]).unwrap_or_default();
            if title.is_empty() && description.is_empty() {
                return None;
            }
            let kind = match text(obj, &["kind", "step_type", "type"]) {
                None => StepKind::Investigation,
                Some(raw) => StepKind::parse_lenient(&raw).unwrap_or_else(|| {
                    warn!(kind = %raw, "Unknown step kind, treating as investigation");
                    StepKind::Investigation
                }),
            };
            let title = if title.is_empty() { description.clone() } else { title };
            let description = if description.is_empty() { title.clone() } else { description };
            Some(Step::new(title, description, kind))
        }
        _ => None,
    }
}

fn text(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Everything the planner sees.
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    pub defect: &'a DefectRecord,
    pub source: &'a SourceContext,
    /// Review feedback, oldest first
    pub history: &'a [String],
    /// Plan being replaced, when re-planning
    pub previous: Option<&'a Plan>,
    pub instruction: Option<&'a str>,
    /// Background investigation findings
    pub background: Option<&'a str>,
    pub locale: &'a str,
    pub max_steps: usize,
}

/// Ask the planner for a plan and validate it.
///
/// # Errors
///
/// `PlanFormat` when the document cannot be repaired, `Llm` when the
/// backend fails, `Cancelled` when the run is cancelled.
pub async fn build_plan(
    reasoner: &Reasoner,
    request: &PlanRequest<'_>,
    version: u32,
) -> Result<Plan, TriageError> {
    let vars = PromptVars::base(request.locale, request.max_steps)
        .with_defect(request.defect)
        .with_source_context(request.source)
        .set(
            "background",
            request.background.unwrap_or("No background investigation was run."),
        );
    let system = prompts::render(PromptKind::Planner, &vars)?;

    let mut messages = vec![
        Message::system(system),
        Message::user(request.defect.user_message(request.instruction)),
    ];
    if let Some(previous) = request.previous {
        messages.push(Message::assistant(previous.to_document().to_string()));
    }
    messages.extend(request.history.iter().map(|h| Message::user(h.clone())));

    let result = reasoner
        .invoke(PromptKind::Planner.as_ref(), messages, Vec::new())
        .await?;

    let mut plan = validate_plan_document(&result.raw_response, request.locale, request.max_steps)?;
    plan.version = version;
    info!(
        run_id = %reasoner.run_id(),
        version,
        steps = plan.steps.len(),
        has_enough_context = plan.has_enough_context,
        "Plan created"
    );
    Ok(plan)
}

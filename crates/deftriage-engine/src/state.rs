//! Run state, checkpoints and review decisions

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, VariantNames};

use deftriage_utils::atomic_write::write_json_atomic;
use deftriage_utils::error::TriageError;

use crate::defect::{DefectRecord, SourceContext};
use crate::plan::{Plan, StepKind};
use crate::reporter::Verdict;

/// Checkpoint layout version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Controller state machine position.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Start,
    Planning,
    HumanReview,
    Dispatching,
    Reporting,
    Done,
    Failed,
    Cancelled,
}

impl RunPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

/// Result of one resolved step, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub step: String,
    pub kind: StepKind,
    pub content: String,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default)]
    pub failed: bool,
}

/// Everything a run knows. Owned by the controller and serialized into checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub defect: DefectRecord,
    #[serde(default)]
    pub source: SourceContext,
    #[serde(default)]
    pub instruction: Option<String>,
    /// Background investigation findings given to the planner
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    /// Plans generated so far
    #[serde(default)]
    pub plan_iterations: u32,
    /// Review feedback, oldest first
    #[serde(default)]
    pub history: Vec<String>,
    pub locale: String,
    /// Set when the run hit the global step cap
    #[serde(default)]
    pub incomplete: bool,
    pub phase: RunPhase,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    /// Why the verdict is absent, when it is
    #[serde(default)]
    pub verdict_error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    #[must_use]
    pub fn new(run_id: impl Into<String>, defect: DefectRecord, locale: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            defect,
            source: SourceContext::default(),
            instruction: None,
            background: None,
            plan: None,
            observations: Vec::new(),
            plan_iterations: 0,
            history: Vec::new(),
            locale: locale.into(),
            incomplete: false,
            phase: RunPhase::Start,
            narrative: None,
            verdict: None,
            verdict_error: None,
            started_at: Utc::now(),
        }
    }
}

/// What the reviewer decided about a suspended plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Accept,
    Reject { feedback: String },
    /// Replace the plan with a caller-supplied document
    Edit { plan: String },
}

/// Serializable snapshot of a run suspended for plan review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    /// Text shown to the reviewer
    pub review_prompt: String,
    pub state: RunState,
}

impl Checkpoint {
    #[must_use]
    pub fn new(state: RunState, review_prompt: String) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            created_at: Utc::now(),
            review_prompt,
            state,
        }
    }

    /// Write the checkpoint atomically as pretty JSON.
    ///
    /// # Errors
    ///
    /// `TriageError::Checkpoint` when the file cannot be written.
    pub fn save(&self, path: &Utf8Path) -> Result<(), TriageError> {
        write_json_atomic(path, self).map_err(|e| TriageError::Checkpoint {
            path: path.to_string(),
            reason: format!("{e:#}"),
        })
    }

    /// Read a checkpoint written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// `TriageError::Checkpoint` when the file is missing, malformed or from
    /// an unsupported layout version.
    pub fn load(path: &Utf8Path) -> Result<Self, TriageError> {
        let fail = |reason: String| TriageError::Checkpoint {
            path: path.to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let checkpoint: Self = serde_json::from_str(&text).map_err(|e| fail(e.to_string()))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(fail(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

/// How a call into the controller ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The run reached `Done`
    Completed(Box<RunState>),
    /// The run is waiting for plan review
    Suspended(Box<Checkpoint>),
}

impl RunOutcome {
    #[must_use]
    pub fn completed(&self) -> Option<&RunState> {
        match self {
            Self::Completed(state) => Some(state),
            Self::Suspended(_) => None,
        }
    }

    #[must_use]
    pub fn checkpoint(&self) -> Option<&Checkpoint> {
        match self {
            Self::Completed(_) => None,
            Self::Suspended(cp) => Some(cp),
        }
    }
}

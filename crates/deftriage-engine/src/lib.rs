//! Plan-driven defect triage
//!
//! A run takes one static-analysis finding, asks the reasoning backend for an
//! investigation plan, executes the plan's steps against the codebase
//! capabilities and ends with a narrative report and a verdict.
//!
//! [`WorkflowController`] is the entry point for single runs; [`run_batch`]
//! drives many runs and [`analyze`] aggregates their results.

// Re-export shared crates so callers need only this one.
pub use deftriage_config as config;
pub use deftriage_llm as llm;
pub use deftriage_tools as tools;

pub use deftriage_utils::error;
pub use deftriage_utils::exit_codes;
pub use deftriage_utils::logging;

pub mod analysis;
pub mod batch;
pub mod controller;
pub mod defect;
pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod plan;
pub mod prompts;
pub mod reasoning;
pub mod reporter;
pub mod state;

pub use analysis::{
    BatchStats, ClassMetrics, Classification, analyze, csv_summary, severity_category,
};
pub use batch::{BatchOptions, BatchOutput, BatchResult, BatchStatus, load_batch, run_batch};
pub use controller::{EngineSettings, WorkflowController};
pub use defect::{DefectRecord, SourceContext};
pub use events::{EventSink, RunEvent};
pub use plan::{Plan, Step, StepKind, StepStatus, validate_plan_document};
pub use reporter::{DefectType, Verdict, extract_verdict, summary_block};
pub use state::{Checkpoint, ReviewDecision, RunOutcome, RunPhase, RunState};

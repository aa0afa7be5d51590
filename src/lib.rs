//! deftriage - plan-driven triage of static-analysis defect reports
//!
//! Each finding from a static analyzer (file, line, severity, rule id,
//! summary) becomes a run: a reasoning backend writes an investigation plan,
//! the plan's steps read and search the analysed project, and a final report
//! classifies the finding as `false_positive`, `style`, `perf` or `bug`.
//!
//! deftriage can be used in two ways:
//! - **CLI**: `deftriage run`, `resume`, `batch` and `analyze`
//! - **Library**: drive [`WorkflowController`] directly
//!
//! # Quick Start (CLI)
//!
//! ```bash
//! # Triage one finding
//! deftriage run --file src/net.c --line 42 --severity error \
//!     --id nullPointer --summary "Possible null pointer dereference: sock"
//!
//! # Same finding, suspending for plan review
//! deftriage run --csv "src/net.c,42,error,nullPointer,Possible null pointer dereference: sock" --review
//! deftriage resume .deftriage/checkpoints/<run-id>.json --accept
//!
//! # Evaluate a whole sheet, then summarise it
//! deftriage batch findings.csv --output results.json --max-concurrent 4
//! deftriage analyze results.json
//! ```
//!
//! # Quick Start (Library)
//!
//! ```rust,no_run
//! use deftriage::{Config, CliArgs, DefectRecord, EventSink, WorkflowController};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::discover(&CliArgs::default())?;
//! let controller = WorkflowController::from_config(&config)?;
//! let defect = DefectRecord::from_csv_line("src/net.c,42,error,nullPointer,Null pointer: sock")?;
//!
//! let outcome = controller
//!     .start(defect, None, &EventSink::none(), CancellationToken::new())
//!     .await?;
//! if let Some(state) = outcome.completed() {
//!     println!("{:?}", state.verdict);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Run completed |
//! | 2 | Invalid arguments, configuration or defect input |
//! | 3 | Suspended for plan review; checkpoint written |
//! | 10 | Reasoning invocation timed out |
//! | 20 | Plan document could not be repaired |
//! | 70 | Reasoning backend failed |
//! | 130 | Cancelled |

pub mod cli;

pub use deftriage_config::{CliArgs, Config};
pub use deftriage_engine::{
    BatchOptions, BatchOutput, BatchStats, Checkpoint, DefectRecord, DefectType, EngineSettings,
    EventSink, Plan, ReviewDecision, RunEvent, RunOutcome, RunPhase, RunState, Verdict,
    WorkflowController, analyze, csv_summary, extract_verdict, load_batch, run_batch,
    validate_plan_document,
};
pub use deftriage_utils::error::{TriageError, UserFriendlyError};
pub use deftriage_utils::exit_codes::ExitCode;

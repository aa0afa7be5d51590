//! CLI argument definitions and parsing structures

use camino::Utf8PathBuf;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::PathBuf;

/// deftriage - plan-driven triage of static-analysis findings
#[derive(Parser, Debug)]
#[command(name = "deftriage")]
#[command(about = "Triage static-analysis defect reports with a plan-driven reasoning workflow")]
#[command(long_about = r#"
deftriage takes a finding from a static analyzer, asks a reasoning backend for an
investigation plan, runs the plan's steps against the project's source code and
writes a report ending in a verdict: false_positive, style, perf or bug.

EXAMPLES:
  # Triage one finding from discrete fields
  deftriage run --file src/net.c --line 42 --severity error --id nullPointer \
      --summary "Possible null pointer dereference: sock"

  # Triage an inline CSV line and stream the report as it is written
  deftriage run --csv "src/net.c,42,error,nullPointer,Null pointer: sock" --stream

  # Suspend for plan review, then accept or reject the plan
  deftriage run --json-file finding.json --review
  deftriage resume .deftriage/checkpoints/<run-id>.json --reject "check the caller too"

  # Evaluate a sheet of findings and summarise the results
  deftriage batch findings.csv --output results.json --max-concurrent 4
  deftriage analyze results.json --csv summary.csv

CONFIGURATION:
  Configuration is loaded with precedence: CLI flags > environment > config file > defaults
  The config file is discovered by searching upward from CWD for .deftriage/config.toml
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Reasoning provider (openai)
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Model to use for reasoning calls
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Locale of plans and reports (e.g. en-US, zh-CN)
    #[arg(long, global = true)]
    pub locale: Option<String>,

    /// Root of the analysed project (defaults to the working directory)
    #[arg(long, global = true)]
    pub project_root: Option<PathBuf>,

    /// Code search backend: ripgrep or native
    #[arg(long, global = true)]
    pub search_backend: Option<String>,

    /// Re-plans allowed after plan review rejections
    #[arg(long, global = true)]
    pub max_plan_iterations: Option<u32>,

    /// Steps kept from a plan
    #[arg(long, global = true)]
    pub max_step_num: Option<usize>,

    /// Steps executed per run
    #[arg(long, global = true)]
    pub max_total_steps: Option<usize>,

    /// Search the codebase for identifiers in the summary before planning
    #[arg(long, global = true)]
    pub background_investigation: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Triage a single finding
    Run(RunArgs),

    /// Continue a run suspended for plan review
    Resume(ResumeArgs),

    /// Triage every finding in a CSV sheet or JSON array
    Batch(BatchArgs),

    /// Summarise a batch results document
    Analyze(AnalyzeArgs),
}

/// Ways to name the finding; the first one given wins.
#[derive(Args, Debug, Default)]
pub struct DefectArgs {
    /// Finding as a JSON object
    #[arg(long, conflicts_with_all = ["json_file", "csv"])]
    pub json: Option<String>,

    /// File holding the finding as a JSON object
    #[arg(long, conflicts_with = "csv")]
    pub json_file: Option<Utf8PathBuf>,

    /// Finding as one CSV line: file,line,severity,id,summary
    #[arg(long)]
    pub csv: Option<String>,

    /// Source file of the finding
    #[arg(long)]
    pub file: Option<String>,

    /// Reported line (positive integer)
    #[arg(long)]
    pub line: Option<String>,

    #[arg(long)]
    pub severity: Option<String>,

    /// Scanner rule id, e.g. nullPointer
    #[arg(long)]
    pub id: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub defect: DefectArgs,

    /// Extra instruction appended to the planner request
    #[arg(long)]
    pub instruction: Option<String>,

    /// Suspend for plan review after planning and write a checkpoint
    #[arg(long)]
    pub review: bool,

    /// Where to write the review checkpoint
    /// (default: .deftriage/checkpoints/<run-id>.json)
    #[arg(long)]
    pub checkpoint: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("decision").required(true).args(["accept", "reject", "edit"])))]
pub struct ResumeArgs {
    /// Checkpoint written by `run --review`
    pub checkpoint: Utf8PathBuf,

    /// Proceed with the plan as written
    #[arg(long)]
    pub accept: bool,

    /// Re-plan with this feedback
    #[arg(long, value_name = "FEEDBACK")]
    pub reject: Option<String>,

    /// Replace the plan with the document in this file
    #[arg(long, value_name = "PLAN_JSON")]
    pub edit: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Shared output options of `run` and `resume`
#[derive(Args, Debug, Default)]
pub struct OutputArgs {
    /// Print the report as it is written
    #[arg(long)]
    pub stream: bool,

    /// Print run events as JSON lines on stderr
    #[arg(long)]
    pub events: bool,

    /// Write the final run state as JSON
    #[arg(long)]
    pub output: Option<Utf8PathBuf>,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// CSV sheet (File,Line,Severity,Id,Summary[,Category,Ours,Baseline]) or JSON array
    pub input: Utf8PathBuf,

    /// Results document to write
    #[arg(long, short)]
    pub output: Utf8PathBuf,

    /// First finding to run (0-based)
    #[arg(long, default_value_t = 0)]
    pub start_index: usize,

    /// One past the last finding to run
    #[arg(long)]
    pub end_index: Option<usize>,

    /// Concurrent runs (overrides [batch] max_concurrent)
    #[arg(long)]
    pub max_concurrent: Option<usize>,

    /// Intermediate save interval in completed runs
    #[arg(long)]
    pub save_every: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Results document written by `batch`
    pub results: Utf8PathBuf,

    /// Also write the report to this file
    #[arg(long, short)]
    pub output: Option<Utf8PathBuf>,

    /// Export a per-result CSV summary
    #[arg(long)]
    pub csv: Option<Utf8PathBuf>,

    /// Print value counts for every verdict-block field
    #[arg(long)]
    pub json_details: bool,

    /// Print the statistics as JSON instead of the text report
    #[arg(long)]
    pub json: bool,
}

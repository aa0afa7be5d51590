//! Logging and observability infrastructure for deftriage
//!
//! Structured logging through `tracing`. Every run carries a `run_id` field so
//! interleaved batch output can be filtered per defect.

use std::io::IsTerminal;
use tracing::{Level, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Check if colored output should be used.
///
/// Returns true only if stderr is a terminal and NO_COLOR is not set.
fn use_color() -> bool {
    std::io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

/// Output format for the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable compact lines
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise verbose mode enables debug output for
/// deftriage crates. Logs go to stderr so stdout stays clean for reports.
pub fn init_tracing(verbose: bool, format: LogFormat) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("deftriage=debug,info")
            } else {
                EnvFilter::try_new("deftriage=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_current_span(true)
                        .with_span_list(false),
                )
                .try_init()?;
        }
        LogFormat::Compact => {
            let span_events = if verbose {
                FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            };
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(use_color())
                        .with_target(verbose)
                        .with_thread_ids(false)
                        .with_line_number(false)
                        .with_file(false)
                        .with_span_events(span_events)
                        .compact(),
                )
                .try_init()?;
        }
    }

    Ok(())
}

/// Span wrapping one run with its defect location.
pub fn run_span(run_id: &str, file: &str, line: u32) -> tracing::Span {
    span!(
        Level::INFO,
        "triage_run",
        run_id = %run_id,
        file = %file,
        line = line,
    )
}

/// Log the start of a controller stage.
pub fn log_stage_start(run_id: &str, stage: &str) {
    info!(run_id = %run_id, stage = %stage, "Stage started");
}

/// Log the completion of a controller stage with its duration.
pub fn log_stage_complete(run_id: &str, stage: &str, duration_ms: u128) {
    info!(
        run_id = %run_id,
        stage = %stage,
        duration_ms = duration_ms,
        "Stage completed"
    );
}

/// Log a stage failure.
pub fn log_stage_error(run_id: &str, stage: &str, error: &str, duration_ms: u128) {
    error!(
        run_id = %run_id,
        stage = %stage,
        error = %error,
        duration_ms = duration_ms,
        "Stage failed"
    );
}

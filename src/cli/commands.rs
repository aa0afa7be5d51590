//! Command implementations for the deftriage CLI

use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use deftriage_config::CONFIG_DIR;
use deftriage_utils::atomic_write::{write_file_atomic, write_json_atomic};
use deftriage_utils::error::DefectInputError;

use super::args::{AnalyzeArgs, BatchArgs, DefectArgs, OutputArgs, ResumeArgs, RunArgs};
use crate::{
    BatchOptions, BatchOutput, Checkpoint, Config, DefectRecord, EventSink, ExitCode,
    ReviewDecision, RunEvent, RunOutcome, RunState, TriageError, WorkflowController, analyze,
    csv_summary, load_batch, run_batch,
};

/// Triage one finding.
///
/// The defect is parsed before any backend is built so malformed input
/// fails fast without credentials.
pub async fn execute_run_command(
    args: RunArgs,
    config: &Config,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let defect = resolve_defect(&args.defect).map_err(TriageError::from)?;
    let controller = WorkflowController::from_config(config)?;

    let (sink, printer) = attach_printer(&args.output);
    let outcome = controller
        .start(defect, args.instruction.clone(), &sink, cancel)
        .await;
    drop(sink);
    finish_printer(printer).await;

    let default_checkpoint = |run_id: &str| {
        Utf8PathBuf::from(CONFIG_DIR)
            .join("checkpoints")
            .join(format!("{run_id}.json"))
    };
    match outcome? {
        RunOutcome::Completed(state) => report_completed(&state, &args.output),
        RunOutcome::Suspended(checkpoint) => {
            let path = args
                .checkpoint
                .clone()
                .unwrap_or_else(|| default_checkpoint(&checkpoint.state.run_id));
            report_suspended(&checkpoint, &path)
        }
    }
}

/// Continue a run suspended for plan review.
pub async fn execute_resume_command(
    args: ResumeArgs,
    config: &Config,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let checkpoint = Checkpoint::load(&args.checkpoint)?;
    let decision = if let Some(feedback) = args.reject.clone() {
        ReviewDecision::Reject { feedback }
    } else if let Some(plan_path) = &args.edit {
        let plan = std::fs::read_to_string(plan_path).map_err(TriageError::from)?;
        ReviewDecision::Edit { plan }
    } else {
        ReviewDecision::Accept
    };
    info!(run_id = %checkpoint.state.run_id, ?decision, "Resuming run");

    let controller = WorkflowController::from_config(config)?;
    let (sink, printer) = attach_printer(&args.output);
    let outcome = controller.resume(checkpoint, decision, &sink, cancel).await;
    drop(sink);
    finish_printer(printer).await;

    match outcome? {
        RunOutcome::Completed(state) => report_completed(&state, &args.output),
        RunOutcome::Suspended(checkpoint) => report_suspended(&checkpoint, &args.checkpoint),
    }
}

/// Triage every finding of a sheet and write the results document.
///
/// `--max-concurrent` and `--save-every` win over the `[batch]` table.
pub async fn execute_batch_command(
    args: BatchArgs,
    config: &Config,
    cancel: CancellationToken,
) -> Result<ExitCode> {
    let defects = load_batch(&args.input)?;

    let mut options = BatchOptions::new(args.output.clone());
    options.start_index = args.start_index;
    options.end_index = args.end_index;
    options.max_concurrent = args
        .max_concurrent
        .or(config.batch.max_concurrent)
        .unwrap_or(options.max_concurrent);
    options.save_every = args
        .save_every
        .or(config.batch.save_every)
        .unwrap_or(options.save_every);

    println!(
        "Loaded {} defects from {}; running with {} concurrent",
        defects.len(),
        args.input,
        options.max_concurrent
    );
    let controller = WorkflowController::from_config(config)?;
    let output = run_batch(&controller, defects, &options, cancel.clone()).await?;

    let meta = &output.metadata;
    println!(
        "✓ Processed {} defects: {} succeeded, {} failed",
        meta.completed_defects, meta.success_count, meta.error_count
    );
    println!("  Results written to {}", args.output);

    if cancel.is_cancelled() {
        return Ok(ExitCode::CANCELLED);
    }
    Ok(ExitCode::SUCCESS)
}

/// Summarise a results document.
pub fn execute_analyze_command(args: &AnalyzeArgs) -> Result<ExitCode> {
    let output = BatchOutput::load(&args.results)?;
    let stats = analyze(&output);

    let text = if args.json {
        serde_json::to_string_pretty(&stats).context("Failed to serialize statistics")?
    } else {
        let mut text = stats.report_text();
        if args.json_details {
            text.push('\n');
            text.push_str(&stats.field_details());
        }
        text
    };
    println!("{text}");

    if let Some(path) = &args.output {
        write_file_atomic(path, &text)?;
        println!("Report written to {path}");
    }
    if let Some(path) = &args.csv {
        write_file_atomic(path, &csv_summary(&output))?;
        println!("CSV summary written to {path}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Build the defect from whichever input form was given.
pub(super) fn resolve_defect(args: &DefectArgs) -> Result<DefectRecord, DefectInputError> {
    if let Some(json) = &args.json {
        return DefectRecord::from_json_str(json);
    }
    if let Some(path) = &args.json_file {
        let payload = std::fs::read_to_string(path)
            .map_err(|e| DefectInputError::InvalidJson(format!("{path}: {e}")))?;
        return DefectRecord::from_json_str(&payload);
    }
    if let Some(line) = &args.csv {
        return DefectRecord::from_csv_line(line);
    }
    let field = |value: &Option<String>| value.clone().unwrap_or_default();
    DefectRecord::from_fields(
        &field(&args.file),
        &field(&args.line),
        &field(&args.severity),
        &field(&args.id),
        &field(&args.summary),
    )
}

/// Connect a printing task when streaming or event output was requested.
fn attach_printer(output: &OutputArgs) -> (EventSink, Option<JoinHandle<()>>) {
    if !output.stream && !output.events {
        return (EventSink::none(), None);
    }
    let (sink, mut rx) = EventSink::channel();
    let (stream, events) = (output.stream, output.events);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if events && let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{line}");
            }
            if stream && let RunEvent::ReportChunk { text } = &event {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
        }
    });
    (sink, Some(printer))
}

async fn finish_printer(printer: Option<JoinHandle<()>>) {
    if let Some(printer) = printer {
        // The printer ends once every sink clone is dropped
        let _ = printer.await;
    }
}

fn report_completed(state: &RunState, output: &OutputArgs) -> Result<ExitCode> {
    match &state.narrative {
        Some(narrative) if !output.stream => println!("{narrative}"),
        Some(_) => println!(),
        None => {}
    }

    println!();
    match (&state.verdict, &state.verdict_error) {
        (Some(verdict), _) => println!(
            "✓ Verdict: {} - {}",
            verdict.defect_type, verdict.defect_description
        ),
        (None, Some(reason)) => println!("⚠ No verdict: {reason}"),
        (None, None) => println!("⚠ No verdict"),
    }
    if state.incomplete {
        println!("⚠ Investigation incomplete: step limit reached before the plan finished");
    }

    if let Some(path) = &output.output {
        write_json_atomic(path, state)?;
        println!("Run state written to {path}");
    }
    Ok(ExitCode::SUCCESS)
}

fn report_suspended(checkpoint: &Checkpoint, path: &Utf8Path) -> Result<ExitCode> {
    checkpoint.save(path)?;

    println!("{}", checkpoint.review_prompt);
    println!();
    println!("⏸ Run {} is waiting for plan review", checkpoint.state.run_id);
    println!("  Checkpoint: {path}");
    println!("  Continue with one of:");
    println!("    deftriage resume {path} --accept");
    println!("    deftriage resume {path} --reject \"<feedback>\"");
    println!("    deftriage resume {path} --edit <plan.json>");
    Ok(ExitCode::REVIEW_PENDING)
}

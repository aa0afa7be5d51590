//! Batch evaluation
//!
//! Loads defect sheets (CSV or JSON), runs every record as an independent
//! run with bounded concurrency and writes the collected results as one JSON
//! document. Failed runs are recorded and the batch carries on.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use deftriage_utils::atomic_write::write_json_atomic;
use deftriage_utils::error::{DefectInputError, TriageError};

use crate::controller::WorkflowController;
use crate::defect::{DefectRecord, parse_csv_records};
use crate::events::EventSink;
use crate::plan::Plan;
use crate::reporter::{Verdict, summary_block};
use crate::state::{Observation, RunOutcome};

/// Required sheet columns, in the order [`DefectRecord::from_fields`] takes them
const REQUIRED_COLUMNS: [&str; 5] = ["File", "Line", "Severity", "Id", "Summary"];

/// Load a defect sheet with a `File,Line,Severity,Id,Summary` header.
///
/// Optional `Category`, `Ours` and `Baseline` columns become the record's
/// category, expected label and baseline label. Quoted fields may span
/// lines. Data records are numbered from 2, blank lines not counted, and that
/// number is the record's origin. Rows with missing fields or a non-positive
/// line are skipped with a warning.
///
/// # Errors
///
/// `Io` when the file cannot be read, `Input` when the header lacks a
/// required column.
pub fn load_batch_csv(path: &Utf8Path) -> Result<Vec<DefectRecord>, TriageError> {
    let text = std::fs::read_to_string(path)?;
    parse_batch_csv(&text)
}

fn parse_batch_csv(text: &str) -> Result<Vec<DefectRecord>, TriageError> {
    let mut records = parse_csv_records(text.trim_start_matches('\u{feff}')).into_iter();
    let Some(header) = records.next() else {
        return Ok(Vec::new());
    };
    let column = |name: &str| header.iter().position(|h| h.eq_ignore_ascii_case(name));

    let mut required = [0usize; 5];
    for (slot, name) in required.iter_mut().zip(REQUIRED_COLUMNS) {
        *slot = column(name).ok_or_else(|| {
            DefectInputError::InvalidCsv(format!(
                "header must contain {}; missing '{name}'",
                REQUIRED_COLUMNS.join(",")
            ))
        })?;
    }
    let category = column("Category");
    let ours = column("Ours");
    let baseline = column("Baseline");

    let mut defects = Vec::new();
    // Rows count records, so a quoted summary spanning lines is one row
    for (row, fields) in (2usize..).zip(records) {
        let cell = |i: usize| fields.get(i).map_or("", String::as_str);
        let optional = |i: Option<usize>| {
            i.map(cell)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let [file, line_no, severity, id, summary] = required.map(cell);
        match DefectRecord::from_fields(file, line_no, severity, id, summary) {
            Ok(mut record) => {
                record.category = optional(category);
                record.expected = optional(ours);
                record.baseline = optional(baseline);
                defects.push(record.with_origin(row.to_string()));
            }
            Err(e) => warn!(row, error = %e, "Skipping sheet row"),
        }
    }
    info!(count = defects.len(), "Loaded defect sheet");
    Ok(defects)
}

/// Load a JSON array of defect objects.
///
/// Records without an `origin` get their 0-based array index.
///
/// # Errors
///
/// `Io` when the file cannot be read, `Input` when it is not an array.
/// Invalid elements are skipped with a warning.
pub fn load_batch_json(path: &Utf8Path) -> Result<Vec<DefectRecord>, TriageError> {
    let text = std::fs::read_to_string(path)?;
    let value: Value =
        serde_json::from_str(&text).map_err(|e| DefectInputError::InvalidJson(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(DefectInputError::InvalidJson("expected an array of defect objects".to_string()).into());
    };

    let mut defects = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match DefectRecord::from_json_value(item) {
            Ok(record) if record.origin.is_some() => defects.push(record),
            Ok(record) => defects.push(record.with_origin(index.to_string())),
            Err(e) => warn!(index, error = %e, "Skipping batch element"),
        }
    }
    Ok(defects)
}

/// Load a batch by extension: `.json` is an array, anything else a sheet.
///
/// # Errors
///
/// See [`load_batch_csv`] and [`load_batch_json`].
pub fn load_batch(path: &Utf8Path) -> Result<Vec<DefectRecord>, TriageError> {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("json") => load_batch_json(path),
        _ => load_batch_csv(path),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Error,
}

/// One run in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub defect: DefectRecord,
    pub status: BatchStatus,
    /// Report narrative
    #[serde(default)]
    pub analysis_content: Option<String>,
    /// Trailing JSON block of the narrative, as written
    #[serde(default)]
    pub json_summary: Option<Value>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub incomplete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchResult {
    fn failed(defect: DefectRecord, error: String) -> Self {
        Self {
            defect,
            status: BatchStatus::Error,
            analysis_content: None,
            json_summary: None,
            verdict: None,
            plan: None,
            observations: Vec::new(),
            incomplete: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMetadata {
    pub timestamp: String,
    pub total_defects: usize,
    pub completed_defects: usize,
    pub success_count: usize,
    pub error_count: usize,
}

/// The results document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutput {
    pub metadata: BatchMetadata,
    pub results: Vec<BatchResult>,
}

impl BatchOutput {
    fn snapshot(results: &[BatchResult], total: usize) -> Self {
        let success_count = results
            .iter()
            .filter(|r| r.status == BatchStatus::Success)
            .count();
        Self {
            metadata: BatchMetadata {
                timestamp: Utc::now().to_rfc3339(),
                total_defects: total,
                completed_defects: results.len(),
                success_count,
                error_count: results.len() - success_count,
            },
            results: results.to_vec(),
        }
    }

    /// Read a results document written by [`run_batch`].
    ///
    /// # Errors
    ///
    /// Fails when the file is missing or not a results document.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read results file: {path}"))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid results document: {path}"))
    }
}

/// Batch driver knobs.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// First record to run (0-based)
    pub start_index: usize,
    /// One past the last record to run; `None` runs to the end
    pub end_index: Option<usize>,
    pub max_concurrent: usize,
    /// Intermediate save interval in completed runs
    pub save_every: usize,
    pub output: Utf8PathBuf,
}

impl BatchOptions {
    #[must_use]
    pub fn new(output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            start_index: 0,
            end_index: None,
            max_concurrent: 1,
            save_every: 10,
            output: output.into(),
        }
    }
}

/// Run every selected defect and write the results document.
///
/// Runs never suspend for review. Results are appended in completion order
/// and saved every `save_every` completions and once at the end.
///
/// # Errors
///
/// Fails only when the final results document cannot be written.
/// Individual run failures are recorded in the output.
pub async fn run_batch(
    controller: &WorkflowController,
    defects: Vec<DefectRecord>,
    options: &BatchOptions,
    cancel: CancellationToken,
) -> Result<BatchOutput> {
    let end = options.end_index.unwrap_or(defects.len()).min(defects.len());
    let start = options.start_index.min(end);
    let selected: Vec<DefectRecord> = defects.into_iter().skip(start).take(end - start).collect();
    let total = selected.len();
    info!(total, start, end, max_concurrent = options.max_concurrent, "Batch started");

    let mut settings = controller.settings().clone();
    settings.auto_accept_plan = true;
    let controller = controller.clone().with_settings(settings);

    let semaphore = Arc::new(Semaphore::new(options.max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    for defect in selected {
        let controller = controller.clone();
        let semaphore = Arc::clone(&semaphore);
        let cancel = cancel.child_token();
        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return BatchResult::failed(defect, "batch semaphore closed".to_string());
            };
            run_one(&controller, defect, cancel).await
        });
    }

    let save_every = options.save_every.max(1);
    let mut results = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => {
                error!(error = %e, "Batch task panicked");
                continue;
            }
        }
        let completed = results.len();
        info!(
            completed,
            total,
            percent = %format!("{:.1}", completed as f64 / total as f64 * 100.0),
            "Batch progress"
        );
        if completed % save_every == 0
            && completed < total
            && let Err(e) = write_json_atomic(&options.output, &BatchOutput::snapshot(&results, total))
        {
            warn!(output = %options.output, error = %e, "Intermediate save failed");
        }
    }

    let output = BatchOutput::snapshot(&results, total);
    write_json_atomic(&options.output, &output)
        .with_context(|| format!("Failed to write batch results: {}", options.output))?;
    info!(
        output = %options.output,
        success = output.metadata.success_count,
        errors = output.metadata.error_count,
        "Batch completed"
    );
    Ok(output)
}

async fn run_one(controller: &WorkflowController, defect: DefectRecord, cancel: CancellationToken) -> BatchResult {
    info!(defect = %defect, origin = %defect.origin_key(), "Analyzing defect");
    let outcome = controller
        .start(defect.clone(), None, &EventSink::none(), cancel)
        .await;
    match outcome {
        Ok(RunOutcome::Completed(state)) => {
            let state = *state;
            let json_summary = state.narrative.as_deref().and_then(summary_block);
            BatchResult {
                defect,
                status: BatchStatus::Success,
                analysis_content: state.narrative,
                json_summary,
                verdict: state.verdict,
                plan: state.plan,
                observations: state.observations,
                incomplete: state.incomplete,
                error: None,
            }
        }
        Ok(RunOutcome::Suspended(_)) => {
            BatchResult::failed(defect, "run suspended for plan review".to_string())
        }
        Err(e) => {
            error!(defect = %defect, error = %e, "Defect analysis failed");
            BatchResult::failed(defect, e.to_string())
        }
    }
}

//! Final report synthesis and verdict extraction
//!
//! The reporter gets the defect, the plan and every observation in one
//! reasoning call and writes a narrative that ends in a fenced JSON block.
//! That block is extracted and repaired with the same strategy as plan
//! documents. A report without a usable block still counts: the narrative
//! is kept and the verdict is simply absent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, VariantNames};
use tokio::sync::mpsc;
use tracing::{info, warn};

use deftriage_extraction::{json_block_candidates, parse_lenient};
use deftriage_llm::Message;
use deftriage_utils::error::{TriageError, VerdictExtractionError};

use crate::defect::DefectRecord;
use crate::events::{EventSink, RunEvent};
use crate::plan::Plan;
use crate::prompts::{self, PromptKind, PromptVars};
use crate::reasoning::Reasoner;
use crate::state::Observation;

/// Final classification of a report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, VariantNames,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DefectType {
    FalsePositive,
    Style,
    Perf,
    Bug,
}

impl DefectType {
    /// Case-insensitive; spaces and hyphens count as underscores.
    #[must_use]
    pub fn normalize(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        match key.as_str() {
            "false_positive" | "falsepositive" => Some(Self::FalsePositive),
            "style" => Some(Self::Style),
            "perf" | "performance" => Some(Self::Perf),
            "bug" => Some(Self::Bug),
            _ => None,
        }
    }

    /// True for every genuine defect kind.
    #[must_use]
    pub const fn is_genuine(self) -> bool {
        !matches!(self, Self::FalsePositive)
    }
}

/// Compact machine-readable outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub defect_type: DefectType,
    pub defect_description: String,
}

impl Verdict {
    /// The fenced block a report ends with.
    #[must_use]
    pub fn to_block(&self) -> String {
        let body = serde_json::to_string_pretty(self).unwrap_or_default();
        format!("```json\n{body}\n```")
    }
}

/// Pull the verdict out of the trailing structured block of `narrative`.
///
/// JSON blocks are tried from last to first; the first object carrying
/// `defect_type` wins, so example configs or tool output quoted after the
/// verdict do not hide it.
///
/// # Errors
///
/// A soft [`VerdictExtractionError`]; callers keep the narrative. When no
/// block carries `defect_type` the error describes the last block.
pub fn extract_verdict(narrative: &str) -> Result<Verdict, VerdictExtractionError> {
    let obj = verdict_object(narrative)?;

    let raw_type = obj
        .get("defect_type")
        .and_then(Value::as_str)
        .ok_or_else(|| VerdictExtractionError::MissingField("defect_type".to_string()))?;
    let defect_type = DefectType::normalize(raw_type)
        .ok_or_else(|| VerdictExtractionError::UnknownDefectType(raw_type.to_string()))?;
    let defect_description = obj
        .get("defect_description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(Verdict {
        defect_type,
        defect_description,
    })
}

/// The structured summary of a report, as written by the reporter.
///
/// The verdict block when there is one, otherwise the last JSON block that
/// parses.
#[must_use]
pub fn summary_block(narrative: &str) -> Option<Value> {
    match verdict_object(narrative) {
        Ok(obj) => Some(Value::Object(obj)),
        Err(_) => json_block_candidates(narrative)
            .into_iter()
            .find_map(|block| parse_lenient(block).ok()),
    }
}

fn verdict_object(narrative: &str) -> Result<Map<String, Value>, VerdictExtractionError> {
    let mut last_error = None;
    for block in json_block_candidates(narrative) {
        let error = match parse_lenient::<Value>(block) {
            Ok(Value::Object(obj)) if obj.contains_key("defect_type") => return Ok(obj),
            Ok(Value::Object(_)) => VerdictExtractionError::MissingField("defect_type".to_string()),
            Ok(_) => VerdictExtractionError::Unparseable("expected a JSON object".to_string()),
            Err(e) => VerdictExtractionError::Unparseable(e.reason),
        };
        last_error.get_or_insert(error);
    }
    Err(last_error.unwrap_or(VerdictExtractionError::MissingBlock))
}

/// Synthesizer input.
#[derive(Debug, Clone, Copy)]
pub struct ReportRequest<'a> {
    pub defect: &'a DefectRecord,
    pub plan: Option<&'a Plan>,
    pub observations: &'a [Observation],
    pub locale: &'a str,
}

/// Narrative plus the verdict, when one could be extracted.
#[derive(Debug, Clone)]
pub struct Report {
    pub narrative: String,
    pub verdict: Option<Verdict>,
    pub verdict_error: Option<VerdictExtractionError>,
}

/// Write the final report.
///
/// Streams narrative chunks as `report_chunk` events when a receiver is
/// attached to `events`.
///
/// # Errors
///
/// `Llm` when the backend fails and `Cancelled` when the run is cancelled.
/// Verdict problems are not errors.
pub async fn synthesize(
    reasoner: &Reasoner,
    request: &ReportRequest<'_>,
    events: &EventSink,
) -> Result<Report, TriageError> {
    let vars = PromptVars::base(request.locale, 0).with_defect(request.defect);
    let messages = vec![
        Message::system(prompts::render(PromptKind::Reporter, &vars)?),
        Message::user(request_body(request)),
    ];
    let stage = PromptKind::Reporter.as_ref();

    let result = if events.is_attached() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let call = async move {
            let result = reasoner.invoke_streaming(stage, messages, &tx).await;
            drop(tx);
            result
        };
        let forward = async move {
            while let Some(text) = rx.recv().await {
                events.emit(RunEvent::ReportChunk { text });
            }
        };
        tokio::join!(call, forward).0?
    } else {
        reasoner.invoke(stage, messages, Vec::new()).await?
    };

    let narrative = result.raw_response;
    let (verdict, verdict_error) = match extract_verdict(&narrative) {
        Ok(v) => {
            info!(run_id = %reasoner.run_id(), defect_type = %v.defect_type, "Verdict extracted");
            (Some(v), None)
        }
        Err(e) => {
            warn!(run_id = %reasoner.run_id(), error = %e, "Report has no usable verdict");
            (None, Some(e))
        }
    };
    Ok(Report {
        narrative,
        verdict,
        verdict_error,
    })
}

fn request_body(request: &ReportRequest<'_>) -> String {
    let mut body = request.defect.user_message(None);
    if let Some(plan) = request.plan {
        body.push_str("\n\n# Investigation Plan\n\n");
        body.push_str(&plan.outline());
        if !plan.rationale.is_empty() {
            body.push_str(&format!("\nRationale: {}\n", plan.rationale));
        }
    }
    if request.observations.is_empty() {
        body.push_str("\n\nNo investigation steps were run; rely on the defect report and plan.");
    } else {
        body.push_str("\n\n# Observations\n");
        for (i, obs) in request.observations.iter().enumerate() {
            let flag = match (obs.failed, obs.incomplete) {
                (true, _) => " (failed)",
                (false, true) => " (incomplete)",
                _ => "",
            };
            body.push_str(&format!(
                "\n## Step {}: {} [{}]{flag}\n\n{}\n",
                i + 1,
                obs.step,
                obs.kind,
                obs.content.trim()
            ));
        }
    }
    body
}

//! Batch evaluation over a defect sheet, followed by analysis of the
//! results document it writes.

mod common;

use std::sync::Arc;

use camino::Utf8PathBuf;
use deftriage::{BatchOptions, BatchOutput, EngineSettings, analyze, csv_summary, load_batch, run_batch};
use deftriage_engine::batch::BatchStatus;
use deftriage_llm::LlmError;
use deftriage_llm::test_support::{ScriptedBackend, ScriptedReply};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use common::*;

const SHEET: &str = "\u{feff}File,Line,Severity,Id,Summary,Category,Ours,Baseline
net.c,6,error,nullPointer,Possible null pointer dereference: sock,memory,false positive,bug
net.c,2,style,unusedFunction,\"The function 'send_all' is never used, consider removing it\",style,style,style
net.c,0,error,nullPointer,Line zero is not a location,memory,bug,bug
net.c,4,error,memleak,Memory leak: buf,memory,bug,bug
";

/// Guard responder, except that planning the leak report loses the connection.
fn sheet_backend() -> Arc<ScriptedBackend> {
    Arc::new(ScriptedBackend::from_fn(|inv| {
        let leak = inv.messages.iter().any(|m| m.content.contains("Memory leak: buf"));
        if inv.stage == "planner" && leak {
            return ScriptedReply::Fail(LlmError::Transport("connection reset by peer".to_string()));
        }
        guard_responder(inv)
    }))
}

fn workspace() -> (TempDir, Utf8PathBuf) {
    let dir = project(GUARDED_SOURCE);
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    std::fs::write(root.join("findings.csv"), SHEET).unwrap();
    (dir, root)
}

#[test]
fn test_sheet_rows_are_numbered_by_record() {
    let (_dir, root) = workspace();
    let defects = load_batch(&root.join("findings.csv")).unwrap();

    // The line-zero row is skipped but still counted
    let origins: Vec<&str> = defects.iter().filter_map(|d| d.origin.as_deref()).collect();
    assert_eq!(origins, ["2", "3", "5"]);
    assert_eq!(
        defects[1].summary,
        "The function 'send_all' is never used, consider removing it"
    );
    assert_eq!(defects[0].expected.as_deref(), Some("false positive"));
    assert_eq!(defects[0].baseline.as_deref(), Some("bug"));
}

#[tokio::test]
async fn test_batch_records_every_run_and_analysis_summarises() {
    let (dir, root) = workspace();
    let ctl = controller(
        &dir,
        sheet_backend(),
        EngineSettings {
            // Batch runs ignore this and never suspend
            auto_accept_plan: false,
            ..EngineSettings::default()
        },
    );
    let defects = load_batch(&root.join("findings.csv")).unwrap();
    let mut options = BatchOptions::new(root.join("results.json"));
    options.max_concurrent = 2;
    options.save_every = 1;

    let output = run_batch(&ctl, defects, &options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.metadata.total_defects, 3);
    assert_eq!(output.metadata.completed_defects, 3);
    assert_eq!(output.metadata.success_count, 2);
    assert_eq!(output.metadata.error_count, 1);

    let failed = output
        .results
        .iter()
        .find(|r| r.status == BatchStatus::Error)
        .unwrap();
    assert_eq!(failed.defect.id, "memleak");
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));

    let ok = output
        .results
        .iter()
        .find(|r| r.defect.id == "nullPointer")
        .unwrap();
    assert_eq!(ok.status, BatchStatus::Success);
    assert_eq!(
        ok.json_summary.as_ref().unwrap()["defect_type"],
        "false_positive"
    );
    assert!(ok.plan.is_some());

    // The document on disk is the final snapshot
    let saved = BatchOutput::load(&root.join("results.json")).unwrap();
    assert_eq!(saved.results.len(), 3);

    let stats = analyze(&saved);
    assert_eq!(stats.verdicts.get("false_positive"), Some(&2));
    assert_eq!(stats.error_types.get("network"), Some(&1));
    assert_eq!(stats.sample_errors.len(), 1);
    assert_eq!(stats.summary_count, 2);

    let agreement = stats.agreement.unwrap();
    assert_eq!((agreement.labelled, agreement.agreed), (2, 1));
    let baseline = stats.baseline_agreement.unwrap();
    assert_eq!((baseline.labelled, baseline.agreed), (2, 0));

    let report = stats.report_text();
    assert!(report.starts_with(&"=".repeat(60)));
    assert!(report.contains("BATCH EVALUATION ANALYSIS REPORT"));
    assert!(report.contains("Agreement with expected labels: 1/2 (50.0%)"));

    let csv = csv_summary(&saved);
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().any(|l| l.starts_with("5,net.c,4,error,memleak")));
}

#[tokio::test]
async fn test_index_range_limits_the_batch() {
    let (dir, root) = workspace();
    let backend = sheet_backend();
    let ctl = controller(&dir, backend.clone(), EngineSettings::default());
    let defects = load_batch(&root.join("findings.csv")).unwrap();
    let mut options = BatchOptions::new(root.join("slice.json"));
    options.start_index = 1;
    options.end_index = Some(2);

    let output = run_batch(&ctl, defects, &options, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.metadata.total_defects, 1);
    assert_eq!(output.results[0].defect.id, "unusedFunction");
    assert_eq!(backend.calls_for_stage("planner"), 1);
}

#[tokio::test]
async fn test_cancelled_batch_still_writes_results() {
    let (dir, root) = workspace();
    let ctl = controller(&dir, sheet_backend(), EngineSettings::default());
    let defects = load_batch(&root.join("findings.csv")).unwrap();
    let options = BatchOptions::new(root.join("cancelled.json"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let output = run_batch(&ctl, defects, &options, cancel).await.unwrap();

    assert_eq!(output.metadata.completed_defects, 3);
    assert_eq!(output.metadata.success_count, 0);
    assert!(root.join("cancelled.json").exists());
}

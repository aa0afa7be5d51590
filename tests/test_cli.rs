//! CLI smoke tests
//!
//! These run the compiled binary and cover every path that needs no
//! reasoning backend: help output, argument validation, exit codes for bad
//! input, and `analyze` over a results document.

use assert_cmd::assert::OutputAssertExt;
use predicates::prelude::*;
use std::process::Command;
use tempfile::TempDir;

const RESULTS: &str = r#"{
  "metadata": {"timestamp": "2026-03-01T10:00:00+00:00", "total_defects": 3,
               "completed_defects": 3, "success_count": 2, "error_count": 1},
  "results": [
    {"defect": {"file": "src/net.c", "line": 42, "severity": "error", "id": "nullPointer",
                "summary": "Possible null pointer dereference: sock", "expected": "bug", "origin": "2"},
     "status": "success",
     "analysis_content": "unchecked",
     "json_summary": {"defect_type": "bug", "defect_description": "sock is never checked"},
     "verdict": {"defect_type": "bug", "defect_description": "sock is never checked"}},
    {"defect": {"file": "src/io.c", "line": 7, "severity": "style", "id": "unusedVariable",
                "summary": "Unused variable: n", "expected": "style", "origin": "3"},
     "status": "success",
     "analysis_content": "dead store",
     "json_summary": {"defect_type": "style", "defect_description": "n is never read"},
     "verdict": {"defect_type": "style", "defect_description": "n is never read"}},
    {"defect": {"file": "src/big.c", "line": 900, "severity": "error", "id": "memleak",
                "summary": "Memory leak: buf", "origin": "4"},
     "status": "error",
     "error": "Reasoning backend error: Request timed out after 300s"}
  ]
}"#;

/// The binary, run from an empty directory so no config file is discovered.
fn deftriage(dir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("deftriage"));
    cmd.current_dir(dir.path());
    cmd.env_remove("DEFTRIAGE_MODEL");
    cmd.env_remove("DEFTRIAGE_LOCALE");
    cmd
}

#[test]
fn help_lists_commands() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("resume"))
        .stdout(predicate::str::contains("batch"))
        .stdout(predicate::str::contains("analyze"));
}

#[test]
fn version_output() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("deftriage"));
}

#[test]
fn invalid_line_exits_with_cli_args_code() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .args(["run", "--csv", "src/net.c,zero,error,nullPointer,Null pointer: sock"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("zero"));
}

#[test]
fn missing_summary_exits_with_cli_args_code() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .args([
            "run", "--file", "a.c", "--line", "3", "--severity", "error", "--id", "x",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("summary"));
}

#[test]
fn missing_api_key_exits_with_cli_args_code() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .env_remove("OPENAI_API_KEY")
        .args(["run", "--csv", "src/net.c,42,error,nullPointer,Null pointer: sock"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("OPENAI_API_KEY"));
}

#[test]
fn resume_needs_a_decision() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .args(["resume", "cp.json"])
        .assert()
        .code(2);
}

#[test]
fn resume_with_missing_checkpoint_exits_with_cli_args_code() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .args(["resume", "missing.json", "--accept"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("missing.json"));
}

#[test]
fn explicit_missing_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    deftriage(&dir)
        .args(["--config", "nope.toml", "analyze", "results.json"])
        .assert()
        .code(2);
}

#[test]
fn batch_sheet_without_required_columns_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("sheet.csv"), "File,Line,Summary\na.c,1,x\n").unwrap();
    deftriage(&dir)
        .args(["batch", "sheet.csv", "--output", "out.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Severity"));
}

#[test]
fn batch_max_concurrent_flag_overrides_config_file() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cfg.toml"), "[batch]\nmax_concurrent = 2\n").unwrap();
    std::fs::write(
        dir.path().join("sheet.csv"),
        "File,Line,Severity,Id,Summary\nsrc/net.c,42,error,nullPointer,Null pointer: sock\n",
    )
    .unwrap();

    // No API key, so the run stops after the plan line is printed
    deftriage(&dir)
        .env_remove("OPENAI_API_KEY")
        .args([
            "--config", "cfg.toml", "batch", "sheet.csv", "--output", "out.json",
            "--max-concurrent", "5",
        ])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("running with 5 concurrent"));
}

#[test]
fn analyze_prints_report_and_exports_csv() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("results.json"), RESULTS).unwrap();

    deftriage(&dir)
        .args(["analyze", "results.json", "--csv", "summary.csv", "-o", "report.txt"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BATCH EVALUATION ANALYSIS REPORT"))
        .stdout(predicate::str::contains("Agreement with expected labels: 2/2 (100.0%)"))
        .stdout(predicate::str::contains("timeout: 1"));

    let csv = std::fs::read_to_string(dir.path().join("summary.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(dir.path().join("report.txt").exists());
}

#[test]
fn analyze_json_output_is_machine_readable() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("results.json"), RESULTS).unwrap();

    let output = deftriage(&dir)
        .args(["analyze", "results.json", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["verdicts"]["bug"], 1);
    assert_eq!(stats["error_types"]["timeout"], 1);

    let classification = &stats["classification"];
    assert_eq!(classification["accuracy"], 1.0);
    assert_eq!(classification["confusion_matrix"]["bug"]["bug"], 1);
    assert_eq!(classification["confusion_matrix"]["bug"]["style"], 0);
    assert_eq!(classification["per_class"]["style"]["support"], 1);
}

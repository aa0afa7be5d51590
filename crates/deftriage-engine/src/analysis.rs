//! Batch result analysis
//!
//! Aggregates a results document into rates, distributions and
//! classification metrics, and renders them as a plain-text report or a
//! per-result CSV summary.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::batch::{BatchOutput, BatchStatus};
use crate::reporter::DefectType;

/// Rule ids listed in the report
const TOP_RULE_IDS: usize = 10;

const SAMPLE_ERRORS: usize = 5;

/// Characters of a summary or error kept in reports
const EXCERPT_CHARS: usize = 100;

const RULE: &str = "============================================================";

/// Column width of the confusion matrix in the text report
const MATRIX_CELL: usize = 15;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleError {
    pub file: String,
    pub line: u32,
    pub error: String,
}

/// Labelled results whose verdict matched the label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Agreement {
    /// Successful results carrying both a verdict and a usable label
    pub labelled: usize,
    pub agreed: usize,
    pub rate: f64,
}

/// Precision, recall and F1 for one label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Pairs whose reference label is this label
    pub support: usize,
}

/// Predicted labels scored against reference labels.
///
/// Ratios are in `0.0..=1.0`; a ratio with a zero denominator is `0.0`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub total: usize,
    pub accuracy: f64,
    /// Union of reference and predicted labels, sorted
    pub labels: Vec<String>,
    /// Counts keyed by reference label, then predicted label
    pub confusion_matrix: BTreeMap<String, BTreeMap<String, usize>>,
    pub per_class: BTreeMap<String, ClassMetrics>,
    pub precision_macro: f64,
    pub recall_macro: f64,
    pub f1_macro: f64,
    pub precision_weighted: f64,
    pub recall_weighted: f64,
    pub f1_weighted: f64,
}

impl Classification {
    /// Score `(reference, predicted)` pairs, `None` when there are none.
    #[must_use]
    pub fn from_pairs(pairs: &[(String, String)]) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let labels: Vec<String> = pairs
            .iter()
            .flat_map(|(reference, predicted)| [reference.clone(), predicted.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut confusion_matrix: BTreeMap<String, BTreeMap<String, usize>> = labels
            .iter()
            .map(|row| (row.clone(), labels.iter().map(|col| (col.clone(), 0)).collect()))
            .collect();
        for (reference, predicted) in pairs {
            *confusion_matrix
                .entry(reference.clone())
                .or_default()
                .entry(predicted.clone())
                .or_default() += 1;
        }

        let mut per_class = BTreeMap::new();
        for label in &labels {
            let support = pairs.iter().filter(|(r, _)| r == label).count();
            let predicted = pairs.iter().filter(|(_, p)| p == label).count();
            let hits = pairs.iter().filter(|(r, p)| r == label && p == label).count();
            let precision = ratio(hits, predicted);
            let recall = ratio(hits, support);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class.insert(
                label.clone(),
                ClassMetrics {
                    precision,
                    recall,
                    f1,
                    support,
                },
            );
        }

        let classes = labels.len() as f64;
        let total = pairs.len();
        let macro_avg = |pick: fn(&ClassMetrics) -> f64| per_class.values().map(pick).sum::<f64>() / classes;
        let weighted_avg = |pick: fn(&ClassMetrics) -> f64| {
            per_class
                .values()
                .map(|m| pick(m) * m.support as f64)
                .sum::<f64>()
                / total as f64
        };

        let (precision_macro, recall_macro, f1_macro) = (
            macro_avg(|m| m.precision),
            macro_avg(|m| m.recall),
            macro_avg(|m| m.f1),
        );
        let (precision_weighted, recall_weighted, f1_weighted) = (
            weighted_avg(|m| m.precision),
            weighted_avg(|m| m.recall),
            weighted_avg(|m| m.f1),
        );

        Some(Self {
            total,
            accuracy: ratio(pairs.iter().filter(|(r, p)| r == p).count(), total),
            labels,
            confusion_matrix,
            per_class,
            precision_macro,
            recall_macro,
            f1_macro,
            precision_weighted,
            recall_weighted,
            f1_weighted,
        })
    }

    fn report_lines(&self, title: &str) -> Vec<String> {
        let mut lines = vec![
            String::new(),
            format!("{title}:"),
            format!("  Accuracy: {:.4} ({} pairs)", self.accuracy, self.total),
            format!("  Precision (Macro): {:.4}", self.precision_macro),
            format!("  Recall (Macro): {:.4}", self.recall_macro),
            format!("  F1 Score (Macro): {:.4}", self.f1_macro),
            format!("  Precision (Weighted): {:.4}", self.precision_weighted),
            format!("  Recall (Weighted): {:.4}", self.recall_weighted),
            format!("  F1 Score (Weighted): {:.4}", self.f1_weighted),
            "  Confusion Matrix (rows: reference, columns: predicted):".to_string(),
        ];
        let mut header = format!("  {:>MATRIX_CELL$}", "");
        for label in &self.labels {
            header.push_str(&format!("{label:>MATRIX_CELL$}"));
        }
        lines.push(header);
        for (reference, row) in &self.confusion_matrix {
            let mut line = format!("  {reference:>MATRIX_CELL$}");
            for count in row.values() {
                line.push_str(&format!("{count:>MATRIX_CELL$}"));
            }
            lines.push(line);
        }
        lines.push("  Per-Class Metrics:".to_string());
        for (label, m) in &self.per_class {
            lines.push(format!(
                "    {label}: precision {:.4}, recall {:.4}, f1 {:.4}, support {}",
                m.precision, m.recall, m.f1, m.support
            ));
        }
        lines
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Review category implied by an analyzer severity.
///
/// `warning` and `error` findings are bugs; `style`, `information` and any
/// other severity keep their lowercased name.
#[must_use]
pub fn severity_category(severity: &str) -> String {
    let severity = severity.trim().to_lowercase();
    match severity.as_str() {
        "warning" | "error" => "bug".to_string(),
        _ => severity,
    }
}

/// Lowercased baseline label, `unknown` when blank.
fn baseline_category(label: &str) -> String {
    let label = label.trim().to_lowercase();
    if matches!(label.as_str(), "" | "nan" | "none") {
        "unknown".to_string()
    } else {
        label
    }
}

/// Aggregates over one results document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    pub total_defects: usize,
    pub completed_defects: usize,
    pub success_count: usize,
    pub error_count: usize,
    /// Percent of completed runs that succeeded
    pub success_rate: f64,
    /// Percent of selected defects that completed
    pub completion_rate: f64,
    /// Successful runs per verdict; `none` when no verdict was extracted
    pub verdicts: BTreeMap<String, usize>,
    /// Most frequent rule ids among successful runs, most frequent first
    pub top_rule_ids: Vec<(String, usize)>,
    pub severities: BTreeMap<String, usize>,
    pub categories: BTreeMap<String, usize>,
    pub incomplete_runs: usize,
    pub summary_count: usize,
    /// Value counts per field of the trailing JSON blocks
    pub summary_fields: BTreeMap<String, BTreeMap<String, usize>>,
    pub error_types: BTreeMap<String, usize>,
    pub sample_errors: Vec<SampleError>,
    /// Agreement with the sheet's `Ours` labels
    pub agreement: Option<Agreement>,
    /// Agreement with the sheet's `Baseline` labels
    pub baseline_agreement: Option<Agreement>,
    /// Verdicts scored against the `Ours` labels
    pub classification: Option<Classification>,
    /// Verdicts scored against the `Baseline` labels
    pub baseline_classification: Option<Classification>,
    /// `Baseline` labels scored against the severity category, false
    /// positives excluded
    pub severity_classification: Option<Classification>,
}

/// Aggregate a results document.
#[must_use]
pub fn analyze(output: &BatchOutput) -> BatchStats {
    let meta = &output.metadata;
    let percent = |part: usize, whole: usize| {
        if whole == 0 {
            0.0
        } else {
            part as f64 / whole as f64 * 100.0
        }
    };

    let mut verdicts: BTreeMap<String, usize> = BTreeMap::new();
    let mut rule_ids: BTreeMap<String, usize> = BTreeMap::new();
    let mut severities: BTreeMap<String, usize> = BTreeMap::new();
    let mut categories: BTreeMap<String, usize> = BTreeMap::new();
    let mut summary_fields: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    let mut summary_count = 0usize;
    let mut incomplete_runs = 0usize;
    let mut error_types: BTreeMap<String, usize> = BTreeMap::new();
    let mut sample_errors = Vec::new();
    let mut expected = Tally::default();
    let mut baseline = Tally::default();
    let mut severity_pairs = Vec::new();

    for result in &output.results {
        if let Some(label) = result.defect.baseline.as_deref().map(baseline_category)
            && label != "false_positive"
        {
            severity_pairs.push((severity_category(&result.defect.severity), label));
        }

        match result.status {
            BatchStatus::Success => {
                let defect = &result.defect;
                *rule_ids.entry(defect.id.clone()).or_default() += 1;
                *severities.entry(defect.severity.clone()).or_default() += 1;
                if let Some(category) = &defect.category {
                    *categories.entry(category.clone()).or_default() += 1;
                }
                if result.incomplete {
                    incomplete_runs += 1;
                }

                let verdict = result.verdict.as_ref().map(|v| v.defect_type);
                let key = verdict.map_or_else(|| "none".to_string(), |t| t.to_string());
                *verdicts.entry(key).or_default() += 1;
                if let Some(verdict) = verdict {
                    expected.record(verdict, defect.expected.as_deref());
                    baseline.record(verdict, defect.baseline.as_deref());
                }

                if let Some(Value::Object(fields)) = &result.json_summary {
                    summary_count += 1;
                    for (key, value) in fields {
                        let bucket = match value {
                            Value::String(s) => s.clone(),
                            Value::Number(_) => "numeric_values".to_string(),
                            Value::Bool(b) => b.to_string(),
                            _ => continue,
                        };
                        *summary_fields
                            .entry(key.clone())
                            .or_default()
                            .entry(bucket)
                            .or_default() += 1;
                    }
                }
            }
            BatchStatus::Error => {
                let message = result.error.as_deref().unwrap_or("Unknown error");
                *error_types.entry(classify_error(message).to_string()).or_default() += 1;
                if sample_errors.len() < SAMPLE_ERRORS {
                    sample_errors.push(SampleError {
                        file: result.defect.file.clone(),
                        line: result.defect.line,
                        error: message.to_string(),
                    });
                }
            }
        }
    }

    let mut top_rule_ids: Vec<(String, usize)> = rule_ids.into_iter().collect();
    top_rule_ids.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_rule_ids.truncate(TOP_RULE_IDS);

    BatchStats {
        total_defects: meta.total_defects,
        completed_defects: meta.completed_defects,
        success_count: meta.success_count,
        error_count: meta.error_count,
        success_rate: percent(meta.success_count, meta.completed_defects),
        completion_rate: percent(meta.completed_defects, meta.total_defects),
        verdicts,
        top_rule_ids,
        severities,
        categories,
        incomplete_runs,
        summary_count,
        summary_fields,
        error_types,
        sample_errors,
        agreement: expected.finish(),
        baseline_agreement: baseline.finish(),
        classification: Classification::from_pairs(&expected.pairs),
        baseline_classification: Classification::from_pairs(&baseline.pairs),
        severity_classification: Classification::from_pairs(&severity_pairs),
    }
}

#[derive(Debug, Default)]
struct Tally {
    labelled: usize,
    agreed: usize,
    /// `(label, verdict)` per labelled result
    pairs: Vec<(String, String)>,
}

impl Tally {
    /// Labels that are not a defect type (free-text notes) are ignored.
    fn record(&mut self, verdict: DefectType, label: Option<&str>) {
        if let Some(label) = label.and_then(DefectType::normalize) {
            self.labelled += 1;
            if label == verdict {
                self.agreed += 1;
            }
            self.pairs.push((label.to_string(), verdict.to_string()));
        }
    }

    fn finish(&self) -> Option<Agreement> {
        (self.labelled > 0).then(|| Agreement {
            labelled: self.labelled,
            agreed: self.agreed,
            rate: self.agreed as f64 / self.labelled as f64 * 100.0,
        })
    }
}

/// Bucket an error message, first match wins.
fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("memory") {
        "memory"
    } else if lower.contains("network") || lower.contains("connection") {
        "network"
    } else if lower.contains("file") || lower.contains("path") {
        "file_access"
    } else {
        "other"
    }
}

fn clip(text: &str) -> String {
    if text.chars().count() > EXCERPT_CHARS {
        let cut: String = text.chars().take(EXCERPT_CHARS).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

impl BatchStats {
    /// Plain-text report.
    #[must_use]
    pub fn report_text(&self) -> String {
        let mut lines = vec![
            RULE.to_string(),
            "BATCH EVALUATION ANALYSIS REPORT".to_string(),
            RULE.to_string(),
            String::new(),
            "BASIC STATISTICS:".to_string(),
            format!("  Total Defects: {}", self.total_defects),
            format!(
                "  Completed: {} ({:.1}%)",
                self.completed_defects, self.completion_rate
            ),
            format!(
                "  Successful: {} ({:.1}%)",
                self.success_count, self.success_rate
            ),
            format!("  Failed: {}", self.error_count),
            format!("  Incomplete: {}", self.incomplete_runs),
            String::new(),
            "VERDICT DISTRIBUTION:".to_string(),
        ];
        lines.extend(self.verdicts.iter().map(|(k, v)| format!("  {k}: {v}")));

        if let Some(a) = &self.agreement {
            lines.push(format!(
                "  Agreement with expected labels: {}/{} ({:.1}%)",
                a.agreed, a.labelled, a.rate
            ));
        }
        if let Some(a) = &self.baseline_agreement {
            lines.push(format!(
                "  Agreement with baseline labels: {}/{} ({:.1}%)",
                a.agreed, a.labelled, a.rate
            ));
        }

        let scored = [
            ("CLASSIFICATION VS EXPECTED LABELS", &self.classification),
            ("CLASSIFICATION VS BASELINE LABELS", &self.baseline_classification),
            ("BASELINE VS SEVERITY CATEGORY", &self.severity_classification),
        ];
        for (title, classification) in scored {
            if let Some(c) = classification {
                lines.extend(c.report_lines(title));
            }
        }

        lines.push(String::new());
        lines.push("DEFECT SEVERITY DISTRIBUTION:".to_string());
        lines.extend(self.severities.iter().map(|(k, v)| format!("  {k}: {v}")));

        lines.push(String::new());
        lines.push("TOP DEFECT TYPES:".to_string());
        lines.extend(self.top_rule_ids.iter().map(|(k, v)| format!("  {k}: {v}")));

        if !self.categories.is_empty() {
            lines.push(String::new());
            lines.push("DEFECT CATEGORIES:".to_string());
            lines.extend(self.categories.iter().map(|(k, v)| format!("  {k}: {v}")));
        }

        let fields: Vec<&str> = self
            .summary_fields
            .keys()
            .take(10)
            .map(String::as_str)
            .collect();
        lines.extend([
            String::new(),
            "JSON SUMMARY ANALYSIS:".to_string(),
            format!("  Total Summaries Generated: {}", self.summary_count),
            format!("  Common Fields: {}", fields.join(", ")),
            String::new(),
            "ERROR ANALYSIS:".to_string(),
            format!("  Total Errors: {}", self.error_count),
        ]);
        if !self.error_types.is_empty() {
            lines.push("  Error Types:".to_string());
            lines.extend(self.error_types.iter().map(|(k, v)| format!("    {k}: {v}")));
        }
        if !self.sample_errors.is_empty() {
            lines.push(String::new());
            lines.push("SAMPLE ERRORS:".to_string());
            for (i, e) in self.sample_errors.iter().enumerate() {
                lines.push(format!("  {}. {}:{} - {}", i + 1, e.file, e.line, clip(&e.error)));
            }
        }
        lines.push(RULE.to_string());
        lines.join("\n")
    }

    /// Value counts for every summary field, one indented block per field.
    #[must_use]
    pub fn field_details(&self) -> String {
        let mut out = String::from("DETAILED JSON FIELD ANALYSIS:\n");
        for (field, values) in &self.summary_fields {
            out.push_str(&format!("  {field}:\n"));
            for (value, count) in values {
                out.push_str(&format!("    {}: {count}\n", clip(value)));
            }
        }
        out
    }
}

/// One CSV row per result.
#[must_use]
pub fn csv_summary(output: &BatchOutput) -> String {
    let mut out = String::from("row_number,file,line,severity,defect_id,summary,status,defect_type,has_json_summary,error_message\n");
    for result in &output.results {
        let d = &result.defect;
        let row = [
            d.origin.clone().unwrap_or_default(),
            d.file.clone(),
            d.line.to_string(),
            d.severity.clone(),
            d.id.clone(),
            clip(&d.summary),
            result.status.to_string(),
            result
                .verdict
                .as_ref()
                .map(|v| v.defect_type.to_string())
                .unwrap_or_default(),
            if result.json_summary.is_some() { "Yes" } else { "No" }.to_string(),
            clip(result.error.as_deref().unwrap_or("")),
        ];
        let cells: Vec<String> = row.iter().map(String::as_str).map(csv_cell).collect();
        out.push_str(&cells.join(","));
        out.push('\n');
    }
    out
}

fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchMetadata, BatchResult};
    use crate::defect::{DefectRecord, split_csv_line};
    use crate::reporter::Verdict;
    use serde_json::json;

    fn result(id: &str, verdict: Option<DefectType>, expected: Option<&str>, error: Option<&str>) -> BatchResult {
        let mut defect = DefectRecord::from_fields("src/a.c", "3", "error", id, "summary, with comma").unwrap();
        defect.expected = expected.map(str::to_string);
        defect.category = Some("memory".to_string());
        BatchResult {
            defect,
            status: if error.is_some() {
                BatchStatus::Error
            } else {
                BatchStatus::Success
            },
            analysis_content: None,
            json_summary: verdict.map(|t| json!({"defect_type": t.to_string(), "defect_description": "d", "confidence": 0.9})),
            verdict: verdict.map(|defect_type| Verdict {
                defect_type,
                defect_description: "d".to_string(),
            }),
            plan: None,
            observations: Vec::new(),
            incomplete: false,
            error: error.map(str::to_string),
        }
    }

    fn output() -> BatchOutput {
        let results = vec![
            result("nullPointer", Some(DefectType::Bug), Some("bug"), None),
            result("nullPointer", Some(DefectType::FalsePositive), Some("bug"), None),
            result("uninitvar", Some(DefectType::FalsePositive), Some("False Positive"), None),
            result("uninitvar", None, None, None),
            result("leak", None, None, Some("Reasoning backend error: request timeout after 300s")),
            result("leak", None, None, Some("Capability error: file src/x.c not found")),
        ];
        BatchOutput {
            metadata: BatchMetadata {
                timestamp: "2025-01-01T00:00:00Z".to_string(),
                total_defects: 8,
                completed_defects: 6,
                success_count: 4,
                error_count: 2,
            },
            results,
        }
    }

    #[test]
    fn test_rates_and_distributions() {
        let stats = analyze(&output());
        assert!((stats.success_rate - 66.666).abs() < 0.01);
        assert!((stats.completion_rate - 75.0).abs() < f64::EPSILON);
        assert_eq!(stats.verdicts["false_positive"], 2);
        assert_eq!(stats.verdicts["none"], 1);
        assert_eq!(stats.top_rule_ids[0], ("nullPointer".to_string(), 2));
        assert_eq!(stats.categories["memory"], 4);
        assert_eq!(stats.summary_fields["confidence"]["numeric_values"], 3);
    }

    #[test]
    fn test_agreement_counts_only_usable_labels() {
        let agreement = analyze(&output()).agreement.unwrap();
        assert_eq!(agreement.labelled, 3);
        assert_eq!(agreement.agreed, 2);
        assert!(analyze(&output()).baseline_agreement.is_none());
    }

    #[test]
    fn test_classification_against_expected_labels() {
        let stats = analyze(&output());
        let c = stats.classification.unwrap();
        assert_eq!(c.total, 3);
        assert_eq!(c.labels, vec!["bug", "false_positive"]);
        assert_eq!(c.confusion_matrix["bug"]["bug"], 1);
        assert_eq!(c.confusion_matrix["bug"]["false_positive"], 1);
        assert_eq!(c.confusion_matrix["false_positive"]["bug"], 0);
        assert_eq!(c.confusion_matrix["false_positive"]["false_positive"], 1);

        let bug = c.per_class["bug"];
        assert!((bug.precision - 1.0).abs() < 1e-9);
        assert!((bug.recall - 0.5).abs() < 1e-9);
        assert!((bug.f1 - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(bug.support, 2);
        let fp = c.per_class["false_positive"];
        assert!((fp.precision - 0.5).abs() < 1e-9);
        assert!((fp.recall - 1.0).abs() < 1e-9);

        assert!((c.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert!((c.f1_macro - 2.0 / 3.0).abs() < 1e-9);
        assert!((c.recall_weighted - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.baseline_classification.is_none());
    }

    #[test]
    fn test_severity_category_mapping() {
        assert_eq!(severity_category("error"), "bug");
        assert_eq!(severity_category(" Warning "), "bug");
        assert_eq!(severity_category("style"), "style");
        assert_eq!(severity_category("information"), "information");
        assert_eq!(severity_category("portability"), "portability");
    }

    #[test]
    fn test_baseline_scored_against_severity() {
        let rows = [
            ("error", "bug"),
            ("warning", "Style"),
            ("style", "style"),
            ("information", "false_positive"),
            ("error", ""),
        ];
        let mut out = output();
        out.results = rows
            .iter()
            .map(|(severity, label)| {
                let mut r = result("id", None, None, None);
                r.defect.severity = (*severity).to_string();
                r.defect.baseline = Some((*label).to_string());
                r
            })
            .collect();

        let c = analyze(&out).severity_classification.unwrap();
        // The false positive row is left out
        assert_eq!(c.total, 4);
        assert_eq!(c.labels, vec!["bug", "style", "unknown"]);
        assert_eq!(c.confusion_matrix["bug"]["bug"], 1);
        assert_eq!(c.confusion_matrix["bug"]["style"], 1);
        assert_eq!(c.confusion_matrix["bug"]["unknown"], 1);
        assert_eq!(c.confusion_matrix["style"]["style"], 1);
        assert!((c.accuracy - 0.5).abs() < 1e-9);
        assert!((c.per_class["bug"].recall - 1.0 / 3.0).abs() < 1e-9);
        assert!((c.per_class["style"].precision - 0.5).abs() < 1e-9);
        assert_eq!(c.per_class["unknown"].support, 0);
        assert!(c.per_class["unknown"].f1.abs() < 1e-9);
    }

    #[test]
    fn test_classification_empty_pairs() {
        assert!(Classification::from_pairs(&[]).is_none());
    }

    #[test]
    fn test_error_classification() {
        let stats = analyze(&output());
        assert_eq!(stats.error_types["timeout"], 1);
        assert_eq!(stats.error_types["file_access"], 1);
        assert_eq!(classify_error("connection refused"), "network");
        assert_eq!(classify_error("boom"), "other");
    }

    #[test]
    fn test_report_layout() {
        let text = analyze(&output()).report_text();
        assert!(text.starts_with(RULE));
        assert!(text.contains("BATCH EVALUATION ANALYSIS REPORT"));
        assert!(text.contains("  Completed: 6 (75.0%)"));
        assert!(text.contains("SAMPLE ERRORS:\n  1. src/a.c:3 - Reasoning backend error"));
        assert!(text.contains("CLASSIFICATION VS EXPECTED LABELS:\n  Accuracy: 0.6667 (3 pairs)"));
        assert!(text.contains("    bug: precision 1.0000, recall 0.5000, f1 0.6667, support 2"));
        assert!(text.ends_with(RULE));
    }

    #[test]
    fn test_csv_summary_quotes_cells() {
        let csv = csv_summary(&output());
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 7);
        let first = split_csv_line(lines[1]);
        assert_eq!(first[5], "summary, with comma");
        assert_eq!(first[7], "bug");
    }

    #[test]
    fn test_clip_marks_cut_text() {
        let long = "x".repeat(150);
        assert_eq!(clip(&long).len(), EXCERPT_CHARS + 3);
        assert_eq!(clip("short"), "short");
    }
}

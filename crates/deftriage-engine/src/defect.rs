//! Defect records and the source context derived from them

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use deftriage_tools::CapabilityRegistry;
use deftriage_utils::error::DefectInputError;

/// Fields every defect report must carry
pub const REQUIRED_FIELDS: [&str; 5] = ["file", "line", "severity", "id", "summary"];

/// One scanner finding.
///
/// Immutable once built. The optional annotations only appear on records
/// loaded from evaluation sheets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub file: String,
    pub line: u32,
    pub severity: String,
    /// Scanner rule id, e.g. `nullPointer`
    pub id: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Ground-truth label from an evaluation sheet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Label assigned by a baseline tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
    /// Row number or other identity within the batch input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

impl fmt::Display for DefectRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}] {}", self.file, self.line, self.id, self.summary)
    }
}

impl DefectRecord {
    /// Build a record from discrete fields.
    ///
    /// # Errors
    ///
    /// `MissingField` for a blank required field and `InvalidLine` when
    /// `line` is not a positive integer.
    pub fn from_fields(
        file: &str,
        line: &str,
        severity: &str,
        id: &str,
        summary: &str,
    ) -> Result<Self, DefectInputError> {
        for (name, value) in REQUIRED_FIELDS
            .iter()
            .zip([file, line, severity, id, summary])
        {
            if value.trim().is_empty() {
                return Err(DefectInputError::MissingField((*name).to_string()));
            }
        }

        Ok(Self {
            file: file.trim().to_string(),
            line: parse_line(line)?,
            severity: severity.trim().to_string(),
            id: id.trim().to_string(),
            summary: summary.trim().to_string(),
            category: None,
            expected: None,
            baseline: None,
            origin: None,
        })
    }

    /// Parse a JSON object payload.
    ///
    /// Keys are matched case-insensitively so rows exported from
    /// spreadsheets (`File`, `Line`) are accepted. `line` may be a number or
    /// a numeric string.
    ///
    /// # Errors
    ///
    /// `InvalidJson` when the payload is not a JSON object.
    pub fn from_json_str(payload: &str) -> Result<Self, DefectInputError> {
        let value: Value = serde_json::from_str(payload)
            .map_err(|e| DefectInputError::InvalidJson(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Build a record from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`from_json_str`](Self::from_json_str).
    pub fn from_json_value(value: &Value) -> Result<Self, DefectInputError> {
        let obj = value
            .as_object()
            .ok_or_else(|| DefectInputError::InvalidJson("expected a JSON object".to_string()))?;

        let text = |name: &str| field_text(obj, name);
        let required = |name: &str| {
            text(name).ok_or_else(|| DefectInputError::MissingField(name.to_string()))
        };

        let mut record = Self::from_fields(
            &required("file")?,
            &required("line")?,
            &required("severity")?,
            &required("id")?,
            &required("summary")?,
        )?;
        record.category = text("category");
        record.expected = text("expected").or_else(|| text("ours"));
        record.baseline = text("baseline");
        record.origin = text("origin").or_else(|| text("row_number"));
        Ok(record)
    }

    /// Parse an inline `file,line,severity,id,summary` line.
    ///
    /// The first four fields may be double-quoted. Everything after the
    /// fourth comma is the summary, kept verbatim apart from its outer
    /// whitespace; a summary that is one quoted field is unquoted.
    ///
    /// # Errors
    ///
    /// `InvalidCsv` when fewer than five fields are present.
    pub fn from_csv_line(line: &str) -> Result<Self, DefectInputError> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        let mut leading = Vec::with_capacity(4);
        while leading.len() < 4 {
            let (field, separator, tail) = take_csv_field(rest);
            leading.push(field);
            if separator != CsvSeparator::Comma {
                return Err(DefectInputError::InvalidCsv(format!(
                    "expected 5 fields, found {}",
                    leading.len()
                )));
            }
            rest = tail;
        }
        let summary = unquote_csv_field(rest);
        Self::from_fields(&leading[0], &leading[1], &leading[2], &leading[3], &summary)
    }

    /// Attach the batch identity.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Stable identity used to key batch results.
    ///
    /// The explicit origin when present, otherwise a short BLAKE3 digest of
    /// the location and rule.
    #[must_use]
    pub fn origin_key(&self) -> String {
        if let Some(origin) = &self.origin {
            return origin.clone();
        }
        let mut hasher = blake3::Hasher::new();
        for part in [self.file.as_str(), &self.line.to_string(), &self.id, &self.summary] {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex()[..16].to_string()
    }

    /// Request text handed to the planner.
    #[must_use]
    pub fn user_message(&self, instruction: Option<&str>) -> String {
        let mut message = format!(
            "Analyze the following potential code defect reported by the static analyzer:\n\n\
             - File: {}\n\
             - Line: {}\n\
             - Severity: {}\n\
             - ID: {}\n\
             - Summary: {}\n\n\
             Please determine if this is a genuine defect or a false positive, explain the issue, \
             and provide a concise classification in your final JSON summary.",
            self.file, self.line, self.severity, self.id, self.summary
        );
        if let Some(extra) = instruction.map(str::trim).filter(|s| !s.is_empty()) {
            message.push_str("\n\nAdditional instruction: ");
            message.push_str(extra);
        }
        message
    }
}

fn parse_line(raw: &str) -> Result<u32, DefectInputError> {
    let trimmed = raw.trim();
    match trimmed.parse::<u32>() {
        Ok(0) | Err(_) => Err(DefectInputError::InvalidLine(trimmed.to_string())),
        Ok(n) => Ok(n),
    }
}

fn field_text(obj: &Map<String, Value>, name: &str) -> Option<String> {
    let value = obj
        .get(name)
        .or_else(|| {
            obj.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })?;
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvSeparator {
    Comma,
    Newline,
    End,
}

/// Read one field off the front of `text`.
///
/// Double quotes group text, commas and newlines included; `""` inside
/// quotes is a literal quote. Returns the trimmed field, what ended it and
/// the text after that separator.
fn take_csv_field(text: &str) -> (String, CsvSeparator, &str) {
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '"' if in_quotes && matches!(chars.peek(), Some((_, '"'))) => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return (field.trim().to_string(), CsvSeparator::Comma, &text[i + 1..]),
            '\n' if !in_quotes => {
                return (field.trim().to_string(), CsvSeparator::Newline, &text[i + 1..]);
            }
            _ => field.push(c),
        }
    }
    (field.trim().to_string(), CsvSeparator::End, "")
}

fn unquote_csv_field(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        let (field, separator, _) = take_csv_field(trimmed);
        if separator == CsvSeparator::End {
            return field;
        }
    }
    trimmed.to_string()
}

/// Split one CSV line, honouring double quotes and `""` escapes.
#[must_use]
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut rest = line.trim_end_matches(['\r', '\n']);
    loop {
        let (field, separator, tail) = take_csv_field(rest);
        fields.push(field);
        if separator == CsvSeparator::End {
            return fields;
        }
        rest = tail;
    }
}

/// Split a CSV document into records.
///
/// Quoted fields may span lines and stay one field. Blank lines produce no
/// record.
#[must_use]
pub fn parse_csv_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut rest = text;
    loop {
        let (field, separator, tail) = take_csv_field(rest);
        fields.push(field);
        rest = tail;
        if separator == CsvSeparator::Comma {
            continue;
        }
        let record = std::mem::take(&mut fields);
        if !(record.len() == 1 && record[0].is_empty()) {
            records.push(record);
        }
        if separator == CsvSeparator::End {
            return records;
        }
    }
}

/// Read-only view of the code around the reported line.
///
/// Both parts are best-effort; either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    /// Numbered window around the reported line, which is marked with `>>`
    pub code_window: Option<String>,
    /// Depth-bounded listing of the project root
    pub directory_tree: Option<String>,
}

impl SourceContext {
    /// Read the window of `window` lines either side of `defect.line` and
    /// list the project root.
    pub async fn acquire(defect: &DefectRecord, registry: &CapabilityRegistry, window: u32) -> Self {
        let start = defect.line.saturating_sub(window).max(1);
        let end = defect.line.saturating_add(window);

        let code_window = match registry
            .lookup()
            .read(&defect.file, i64::from(start), i64::from(end))
            .await
        {
            Ok(text) => Some(number_lines(&text, start, defect.line)),
            Err(e) => {
                warn!(file = %defect.file, line = defect.line, error = %e, "Source window unavailable");
                None
            }
        };

        let directory_tree = match registry.listing().cloned() {
            Some(lister) => {
                let depth = lister.max_depth();
                match tokio::task::spawn_blocking(move || lister.list("", depth)).await {
                    Ok(Ok(tree)) => Some(tree),
                    Ok(Err(e)) => {
                        warn!(error = %e, "Directory listing unavailable");
                        None
                    }
                    Err(e) => {
                        warn!(error = %e, "Directory listing task failed");
                        None
                    }
                }
            }
            None => None,
        };

        debug!(
            has_window = code_window.is_some(),
            has_tree = directory_tree.is_some(),
            "Source context acquired"
        );
        Self {
            code_window,
            directory_tree,
        }
    }
}

fn number_lines(text: &str, first: u32, marked: u32) -> String {
    let mut out = String::new();
    for (n, line) in (first..).zip(text.lines()) {
        let marker = if n == marked { ">>" } else { "  " };
        out.push_str(&format!("{marker}{n:>6} | {line}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use deftriage_tools::{DirectoryLister, FsCodeLookup, NativeSearch, ProjectRoot, SearchLimits, build_globset};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_csv_line_keeps_commas_in_summary() {
        let defect = DefectRecord::from_csv_line(
            "src/net.c,42,warning,nullPointer,Possible null pointer dereference: sock, check it",
        )
        .unwrap();
        assert_eq!(defect.file, "src/net.c");
        assert_eq!(defect.line, 42);
        assert_eq!(
            defect.summary,
            "Possible null pointer dereference: sock, check it"
        );
    }

    #[test]
    fn test_csv_line_summary_spacing_and_quotes() {
        let spaced = DefectRecord::from_csv_line("a.c,12,error,nullPointer,  Null deref of sock,  check it  \r\n").unwrap();
        assert_eq!(spaced.summary, "Null deref of sock,  check it");

        let quoted = DefectRecord::from_csv_line(r#""src/a b.c",3,style,unusedFunction,"The function 'f' is never used, remove it""#)
            .unwrap();
        assert_eq!(quoted.file, "src/a b.c");
        assert_eq!(quoted.summary, "The function 'f' is never used, remove it");

        let mixed = DefectRecord::from_csv_line(r#"a.c,3,style,x,"quoted" then more"#).unwrap();
        assert_eq!(mixed.summary, r#""quoted" then more"#);
    }

    #[test]
    fn test_csv_quoted_fields() {
        let fields = split_csv_line(r#""a, b",2,"say ""hi""",x"#);
        assert_eq!(fields, vec!["a, b", "2", r#"say "hi""#, "x"]);
    }

    #[test]
    fn test_csv_records_keep_quoted_newlines() {
        let text = "File,Summary\r\nsrc/a.c,\"first line\nsecond line\"\r\n\r\nsrc/b.c,ok\n";
        let records = parse_csv_records(text);
        assert_eq!(
            records,
            vec![
                vec!["File", "Summary"],
                vec!["src/a.c", "first line\nsecond line"],
                vec!["src/b.c", "ok"],
            ]
        );
        assert!(parse_csv_records("\n\n").is_empty());
    }

    #[test]
    fn test_csv_too_few_fields() {
        assert!(matches!(
            DefectRecord::from_csv_line("a.c,1,error"),
            Err(DefectInputError::InvalidCsv(_))
        ));
    }

    #[test]
    fn test_json_line_may_be_string() {
        let defect = DefectRecord::from_json_value(&json!({
            "file": "a.c", "line": "7", "severity": "error", "id": "x", "summary": "s"
        }))
        .unwrap();
        assert_eq!(defect.line, 7);
    }

    #[test]
    fn test_json_keys_are_case_insensitive() {
        let defect = DefectRecord::from_json_value(&json!({
            "File": "a.c", "Line": 3, "Severity": "style", "Id": "unusedVariable",
            "Summary": "Unused variable: tmp", "Ours": "false_positive", "row_number": 5
        }))
        .unwrap();
        assert_eq!(defect.expected.as_deref(), Some("false_positive"));
        assert_eq!(defect.origin.as_deref(), Some("5"));
    }

    #[test]
    fn test_missing_and_invalid_fields() {
        let missing = DefectRecord::from_json_value(&json!({"file": "a.c", "line": 1}));
        assert!(matches!(missing, Err(DefectInputError::MissingField(f)) if f == "severity"));

        for line in ["0", "-3", "abc", "1.5"] {
            let err = DefectRecord::from_fields("a.c", line, "error", "x", "s").unwrap_err();
            assert!(matches!(err, DefectInputError::InvalidLine(_)), "line {line}");
        }

        assert!(matches!(
            DefectRecord::from_json_str("[1, 2]"),
            Err(DefectInputError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_user_message_lists_fields() {
        let defect = DefectRecord::from_fields("a.c", "9", "error", "nullPointer", "deref").unwrap();
        let msg = defect.user_message(Some("Focus on error paths."));
        assert!(msg.starts_with("Analyze the following potential code defect"));
        assert!(msg.contains("- Line: 9\n"));
        assert!(msg.contains("- ID: nullPointer\n"));
        assert!(msg.ends_with("Additional instruction: Focus on error paths."));
        assert!(!defect.user_message(Some("  ")).contains("Additional"));
    }

    #[test]
    fn test_origin_key_prefers_explicit_origin() {
        let defect = DefectRecord::from_fields("a.c", "9", "error", "x", "s").unwrap();
        let hashed = defect.origin_key();
        assert_eq!(hashed.len(), 16);
        assert_eq!(hashed, defect.clone().origin_key());
        assert_eq!(defect.with_origin("row-2").origin_key(), "row-2");
    }

    fn registry(dir: &TempDir) -> CapabilityRegistry {
        let root = ProjectRoot::new(dir.path()).unwrap();
        let exclude = build_globset(&[]).unwrap();
        let search = NativeSearch::new(root.clone(), exclude.clone(), SearchLimits::default());
        CapabilityRegistry::new(Arc::new(FsCodeLookup::new(root.clone())), Arc::new(search))
            .with_listing(DirectoryLister::new(root, exclude, 2))
    }

    #[tokio::test]
    async fn test_acquire_marks_reported_line() {
        let dir = TempDir::new().unwrap();
        let body: String = (1..=10).map(|n| format!("line {n}\n")).collect();
        std::fs::write(dir.path().join("main.c"), body).unwrap();
        let defect = DefectRecord::from_fields("main.c", "5", "error", "x", "s").unwrap();

        let ctx = SourceContext::acquire(&defect, &registry(&dir), 2).await;
        let window = ctx.code_window.unwrap();
        assert_eq!(window.lines().count(), 5);
        assert!(window.contains(">>     5 | line 5"));
        assert!(window.starts_with("       3 | line 3"));
        assert!(ctx.directory_tree.unwrap().contains("main.c"));
    }

    #[tokio::test]
    async fn test_acquire_degrades_when_file_missing() {
        let dir = TempDir::new().unwrap();
        let defect = DefectRecord::from_fields("gone.c", "1", "error", "x", "s").unwrap();

        let ctx = SourceContext::acquire(&defect, &registry(&dir), 20).await;
        assert!(ctx.code_window.is_none());
        assert!(ctx.directory_tree.is_some());
    }
}

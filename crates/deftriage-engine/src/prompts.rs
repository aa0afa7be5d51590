//! System prompts for each reasoning stage
//!
//! Templates use `{{name}}` placeholders. Rendering fails when a template
//! references a variable the caller did not set, so a prompt is never sent
//! with a hole in it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use strum::{AsRefStr, Display, EnumIter};

use deftriage_utils::error::TriageError;

use crate::defect::{DefectRecord, SourceContext};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Format of `CURRENT_TIME`
const TIME_FORMAT: &str = "%a %b %d %Y %H:%M:%S %z";

/// Shown in place of context that could not be acquired
const UNAVAILABLE: &str = "(unavailable)";

/// Reasoning stage a prompt belongs to; doubles as the stage name in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum PromptKind {
    Planner,
    Investigator,
    Analyst,
    Reporter,
}

impl PromptKind {
    const fn template(self) -> &'static str {
        match self {
            Self::Planner => PLANNER,
            Self::Investigator => INVESTIGATOR,
            Self::Analyst => ANALYST,
            Self::Reporter => REPORTER,
        }
    }

    /// Variables the template references, in first-use order.
    #[must_use]
    pub fn required_variables(self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = Vec::new();
        for caps in PLACEHOLDER.captures_iter(self.template()) {
            if let Some(m) = caps.get(1)
                && !names.contains(&m.as_str())
            {
                names.push(m.as_str());
            }
        }
        names
    }
}

/// Variable bindings for one render.
#[derive(Debug, Clone, Default)]
pub struct PromptVars {
    values: BTreeMap<String, String>,
}

impl PromptVars {
    /// Bindings every stage shares: locale, step limit and current time.
    #[must_use]
    pub fn base(locale: &str, max_step_num: usize) -> Self {
        Self::default()
            .set("locale", locale)
            .set("max_step_num", max_step_num.to_string())
            .set(
                "CURRENT_TIME",
                chrono::Local::now().format(TIME_FORMAT).to_string(),
            )
    }

    #[must_use]
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Bind the defect fields.
    #[must_use]
    pub fn with_defect(self, defect: &DefectRecord) -> Self {
        self.set("file", defect.file.clone())
            .set("line", defect.line.to_string())
            .set("severity", defect.severity.clone())
            .set("rule_id", defect.id.clone())
            .set("summary", defect.summary.clone())
    }

    /// Bind the code window and directory tree, or a placeholder when absent.
    #[must_use]
    pub fn with_source_context(self, ctx: &SourceContext) -> Self {
        self.set(
            "source_code_context",
            ctx.code_window.as_deref().unwrap_or(UNAVAILABLE),
        )
        .set(
            "directory_tree",
            ctx.directory_tree.as_deref().unwrap_or(UNAVAILABLE),
        )
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Render the system prompt for `kind`.
///
/// # Errors
///
/// `TriageError::PromptTemplate` naming the first unbound variable.
pub fn render(kind: PromptKind, vars: &PromptVars) -> Result<String, TriageError> {
    let template = kind.template();
    if let Some(missing) = kind
        .required_variables()
        .into_iter()
        .find(|name| vars.get(name).is_none())
    {
        return Err(TriageError::PromptTemplate {
            template: kind.to_string(),
            variable: missing.to_string(),
        });
    }

    Ok(PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            vars.get(&caps[1]).unwrap_or_default().to_string()
        })
        .into_owned())
}

const PLANNER: &str = r#"---
CURRENT_TIME: {{CURRENT_TIME}}
---

You are a static-analysis triage planner. A scanner reported a potential defect and your job is to plan a short investigation that decides whether it is a genuine defect or a false positive.

# Reported Defect

- File: {{file}}
- Line: {{line}}
- Severity: {{severity}}
- Rule: {{rule_id}}
- Summary: {{summary}}

# Source Around the Reported Line

The reported line is marked with `>>`.

```
{{source_code_context}}
```

# Project Layout

```
{{directory_tree}}
```

# Background Findings

{{background}}

# Your Task

Decide whether the context above is already enough to classify the report. If it is, set `has_enough_context` to true and return no steps. Otherwise plan at most {{max_step_num}} focused steps.

Step kinds:
- `investigation`: read code, search the codebase for definitions, callers and checks, list directories.
- `analysis`: reason over gathered code, optionally running a small computation.

Each step must name exactly what to look at (functions, variables, files) and what question it answers. Prefer following the data flow of the flagged value: where it is assigned, whether it is checked, and every path that reaches the reported line.

# Output Format

Respond with a single JSON object and nothing else:

```json
{
  "locale": "{{locale}}",
  "has_enough_context": false,
  "rationale": "why these steps are needed",
  "title": "short plan title",
  "steps": [
    {
      "title": "step title",
      "description": "what to inspect and what question it answers",
      "kind": "investigation"
    }
  ]
}
```

Write all text fields in the language of locale **{{locale}}**."#;

const INVESTIGATOR: &str = r#"---
CURRENT_TIME: {{CURRENT_TIME}}
---

You are a code investigator gathering evidence about a reported static-analysis defect.

You can call these capabilities: {{capabilities}}.

- Read the code you need with `read_file_lines`; do not guess file contents.
- Use `codebase_search` to find definitions, callers, and checks of the identifiers involved.
- Use `list_directory` when you do not know where a file lives.
- If a capability returns an error, adjust the arguments or try another approach.

When you have enough evidence for this step, stop calling capabilities and answer with a concise summary of what you found. Quote the relevant code with file paths and line numbers. Do not classify the defect; only report evidence.

Write in the language of locale **{{locale}}**."#;

const ANALYST: &str = r#"---
CURRENT_TIME: {{CURRENT_TIME}}
---

You are a code analyst. Using the evidence gathered so far, answer the question posed by this step.

Available capabilities: {{capabilities}}.

Reason step by step about control flow and data flow. When a computation would settle the question (value ranges, overflow arithmetic), run it instead of estimating. Finish with a concise statement of your conclusion and the evidence behind it.

Write in the language of locale **{{locale}}**."#;

const REPORTER: &str = r#"---
CURRENT_TIME: {{CURRENT_TIME}}
---

You are a senior engineer writing the final triage report for a static-analysis finding.

# Reported Defect

- File: {{file}}
- Line: {{line}}
- Severity: {{severity}}
- Rule: {{rule_id}}
- Summary: {{summary}}

# Report Structure

1. **Verdict**: one sentence stating whether this is a genuine defect or a false positive.
2. **Analysis**: the relevant code path, quoting code with file paths and line numbers.
3. **Evidence**: the findings that support the verdict.
4. **Recommendation**: the fix, or why no change is needed.

Base every claim on the observations provided. If evidence is missing, say so.

End the report with a fenced JSON block and nothing after it:

```json
{"defect_type": "false_positive | style | perf | bug", "defect_description": "one-sentence description"}
```

Use `false_positive` when the reported problem cannot happen, `bug` for a genuine correctness defect, `perf` for a performance issue and `style` for a code quality issue without behavioral impact.

Write the report in the language of locale **{{locale}}**."#;

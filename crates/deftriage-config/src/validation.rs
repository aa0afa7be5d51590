use deftriage_utils::error::{ConfigError, TriageError};
use globset::Glob;

use crate::Config;

fn invalid(key: &str, value: impl Into<String>) -> TriageError {
    TriageError::Config(ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.into(),
    })
}

fn check_range<T: PartialOrd + Copy + std::fmt::Display>(
    key: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> Result<(), TriageError> {
    if let Some(v) = value
        && (v < min || v > max)
    {
        return Err(invalid(key, format!("{v} is outside {min}..={max}")));
    }
    Ok(())
}

impl Config {
    /// Validate configuration values
    pub(crate) fn validate(&self) -> Result<(), TriageError> {
        let engine = &self.engine;
        check_range("max_plan_iterations", engine.max_plan_iterations, 0, 10)?;
        check_range("max_step_num", engine.max_step_num, 1, 20)?;
        check_range("max_step_iterations", engine.max_step_iterations, 1, 50)?;
        check_range("max_tool_calls", engine.max_tool_calls, 1, 200)?;
        check_range("max_total_steps", engine.max_total_steps, 1, 200)?;
        check_range("context_window", engine.context_window, 0, 500)?;
        check_range("tree_depth", engine.tree_depth, 0, 10)?;
        check_range("llm_timeout_secs", engine.llm_timeout_secs, 5, 7200)?;
        check_range("capability_timeout_secs", engine.capability_timeout_secs, 1, 600)?;

        if let Some(locale) = &engine.locale
            && locale.trim().is_empty()
        {
            return Err(invalid("locale", "must not be empty"));
        }

        if let Some(provider) = self.llm.provider.as_deref()
            && provider != "openai"
        {
            return Err(invalid(
                "llm_provider",
                format!("unknown provider '{provider}'. Supported providers: openai"),
            ));
        }

        if let Some(openai) = &self.llm.openai {
            check_range("temperature", openai.temperature, 0.0, 2.0)?;
            if openai.budget == Some(0) {
                return Err(invalid("budget", "must be greater than 0"));
            }
        }

        match self.tools.search_backend.as_deref() {
            None | Some("ripgrep") | Some("native") => {}
            Some(other) => {
                return Err(invalid(
                    "search_backend",
                    format!("'{other}' (expected \"ripgrep\" or \"native\")"),
                ));
            }
        }

        for pattern in &self.tools.exclude {
            Glob::new(pattern).map_err(|e| invalid("exclude", format!("{pattern}: {e}")))?;
        }

        check_range("max_concurrent", self.batch.max_concurrent, 1, 64)?;
        check_range("save_every", self.batch.save_every, 1, 10_000)?;

        Ok(())
    }
}

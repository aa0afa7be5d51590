use std::collections::HashMap;
use std::path::PathBuf;

use deftriage_utils::error::TriageError;

use crate::{BatchConfig, Config, ConfigSource, EngineConfig, LlmConfig, OpenAiConfig, ToolsConfig};

impl Config {
    /// Create a builder for programmatic configuration.
    ///
    /// Unlike [`Config::discover`] this never reads files or the environment,
    /// so embedding applications and tests get deterministic settings.
    ///
    /// ```rust
    /// use deftriage_config::Config;
    ///
    /// let config = Config::builder()
    ///     .max_step_num(4)
    ///     .locale("en-US")
    ///     .auto_accept_plan(false)
    ///     .build()
    ///     .expect("valid config");
    /// assert_eq!(config.engine.max_step_num, Some(4));
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for programmatic configuration.
///
/// Values set here are attributed to `ConfigSource::Programmatic`.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    max_plan_iterations: Option<u32>,
    max_step_num: Option<usize>,
    max_step_iterations: Option<u32>,
    max_tool_calls: Option<u32>,
    max_total_steps: Option<usize>,
    context_window: Option<u32>,
    tree_depth: Option<usize>,
    locale: Option<String>,
    auto_accept_plan: Option<bool>,
    background_investigation: Option<bool>,
    project_root: Option<PathBuf>,
    search_backend: Option<String>,
    interpreter: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    max_concurrent: Option<usize>,
}

impl ConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_plan_iterations(mut self, n: u32) -> Self {
        self.max_plan_iterations = Some(n);
        self
    }

    #[must_use]
    pub fn max_step_num(mut self, n: usize) -> Self {
        self.max_step_num = Some(n);
        self
    }

    #[must_use]
    pub fn max_step_iterations(mut self, n: u32) -> Self {
        self.max_step_iterations = Some(n);
        self
    }

    #[must_use]
    pub fn max_tool_calls(mut self, n: u32) -> Self {
        self.max_tool_calls = Some(n);
        self
    }

    #[must_use]
    pub fn max_total_steps(mut self, n: usize) -> Self {
        self.max_total_steps = Some(n);
        self
    }

    #[must_use]
    pub fn context_window(mut self, lines: u32) -> Self {
        self.context_window = Some(lines);
        self
    }

    #[must_use]
    pub fn tree_depth(mut self, depth: usize) -> Self {
        self.tree_depth = Some(depth);
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    #[must_use]
    pub fn auto_accept_plan(mut self, accept: bool) -> Self {
        self.auto_accept_plan = Some(accept);
        self
    }

    #[must_use]
    pub fn background_investigation(mut self, enabled: bool) -> Self {
        self.background_investigation = Some(enabled);
        self
    }

    #[must_use]
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    #[must_use]
    pub fn search_backend(mut self, backend: impl Into<String>) -> Self {
        self.search_backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<Config, TriageError> {
        let mut attribution = HashMap::new();
        let mut engine = EngineConfig::default();
        let mut tools = ToolsConfig::default();
        let mut batch = BatchConfig::default();
        let mut llm = LlmConfig {
            provider: Some("openai".to_string()),
            openai: None,
        };

        let mut set = |key: &str| {
            attribution.insert(key.to_string(), ConfigSource::Programmatic);
        };

        macro_rules! take {
            ($field:ident => $target:expr) => {
                if let Some(v) = self.$field {
                    $target = Some(v);
                    set(stringify!($field));
                }
            };
        }

        take!(max_plan_iterations => engine.max_plan_iterations);
        take!(max_step_num => engine.max_step_num);
        take!(max_step_iterations => engine.max_step_iterations);
        take!(max_tool_calls => engine.max_tool_calls);
        take!(max_total_steps => engine.max_total_steps);
        take!(context_window => engine.context_window);
        take!(tree_depth => engine.tree_depth);
        take!(locale => engine.locale);
        take!(auto_accept_plan => engine.auto_accept_plan);
        take!(background_investigation => engine.background_investigation);
        take!(project_root => tools.project_root);
        take!(search_backend => tools.search_backend);
        take!(interpreter => tools.interpreter);
        take!(max_concurrent => batch.max_concurrent);

        if self.model.is_some() || self.base_url.is_some() {
            llm.openai = Some(OpenAiConfig {
                model: self.model,
                base_url: self.base_url,
                ..OpenAiConfig::default()
            });
            set("llm_openai");
        }

        let config = Config {
            engine,
            llm,
            tools,
            batch,
            source_attribution: attribution,
        };
        config.validate()?;
        Ok(config)
    }
}

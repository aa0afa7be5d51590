use std::collections::BTreeMap;

use crate::{Config, ConfigSource};

fn source_label(source: Option<&ConfigSource>) -> String {
    match source {
        Some(ConfigSource::Cli) => "cli".to_string(),
        Some(ConfigSource::ConfigFile(path)) => format!("config ({})", path.display()),
        Some(ConfigSource::Programmatic) => "programmatic".to_string(),
        Some(ConfigSource::Defaults) | None => "default".to_string(),
    }
}

impl Config {
    /// Effective configuration as `key -> (value, source)`, sorted by key.
    #[must_use]
    pub fn effective_config(&self) -> BTreeMap<String, (String, String)> {
        let mut out = BTreeMap::new();
        let mut add = |key: &str, value: Option<String>| {
            if let Some(val) = value {
                let source = source_label(self.source_attribution.get(key));
                out.insert(key.to_string(), (val, source));
            }
        };

        let e = &self.engine;
        add("max_plan_iterations", e.max_plan_iterations.map(|v| v.to_string()));
        add("max_step_num", e.max_step_num.map(|v| v.to_string()));
        add("max_step_iterations", e.max_step_iterations.map(|v| v.to_string()));
        add("max_tool_calls", e.max_tool_calls.map(|v| v.to_string()));
        add("max_total_steps", e.max_total_steps.map(|v| v.to_string()));
        add("context_window", e.context_window.map(|v| v.to_string()));
        add("tree_depth", e.tree_depth.map(|v| v.to_string()));
        add("locale", e.locale.clone());
        add("auto_accept_plan", e.auto_accept_plan.map(|v| v.to_string()));
        add(
            "background_investigation",
            e.background_investigation.map(|v| v.to_string()),
        );
        add("llm_timeout_secs", e.llm_timeout_secs.map(|v| v.to_string()));
        add("llm_provider", self.llm.provider.clone());
        add(
            "model",
            self.llm.openai.as_ref().and_then(|o| o.model.clone()),
        );
        add("search_backend", self.tools.search_backend.clone());
        add(
            "project_root",
            self.tools.project_root.as_ref().map(|p| p.display().to_string()),
        );
        add("max_concurrent", self.batch.max_concurrent.map(|v| v.to_string()));
        add("save_every", self.batch.save_every.map(|v| v.to_string()));

        out
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::{
    BatchConfig, CliArgs, Config, ConfigSource, EngineConfig, LlmConfig, OpenAiConfig, ToolsConfig,
};

/// Directory searched for `config.toml`
pub const CONFIG_DIR: &str = ".deftriage";

/// Environment variable overriding the reasoning model
pub const MODEL_ENV_VAR: &str = "DEFTRIAGE_MODEL";

/// Environment variable overriding the run locale
pub const LOCALE_ENV_VAR: &str = "DEFTRIAGE_LOCALE";

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TomlConfig {
    engine: Option<EngineConfig>,
    llm: Option<LlmConfig>,
    tools: Option<ToolsConfig>,
    batch: Option<BatchConfig>,
}

/// Overwrite `target` when `value` is set, recording where it came from.
fn apply<T>(
    target: &mut Option<T>,
    value: Option<T>,
    key: &str,
    source: &ConfigSource,
    attribution: &mut HashMap<String, ConfigSource>,
) {
    if value.is_some() {
        *target = value;
        attribution.insert(key.to_string(), source.clone());
    }
}

impl Config {
    /// Discover and load configuration with precedence: CLI > env > file > defaults
    pub fn discover(cli_args: &CliArgs) -> Result<Self> {
        let start_dir = env::current_dir().context("Failed to get current directory")?;
        Self::discover_from(&start_dir, cli_args)
    }

    /// Discover and load configuration starting from a specific directory
    ///
    /// Path-driven variant used by tests to avoid process-global state.
    pub fn discover_from(start_dir: &Path, cli_args: &CliArgs) -> Result<Self> {
        let mut attribution = HashMap::new();

        let mut engine = EngineConfig::default();
        let mut llm = LlmConfig::default();
        let mut tools = ToolsConfig::default();
        let mut batch = BatchConfig::default();

        for key in [
            "max_plan_iterations",
            "max_step_num",
            "max_step_iterations",
            "max_tool_calls",
            "max_total_steps",
            "context_window",
            "tree_depth",
            "locale",
            "auto_accept_plan",
            "background_investigation",
            "llm_timeout_secs",
            "capability_timeout_secs",
            "search_backend",
            "max_concurrent",
            "save_every",
        ] {
            attribution.insert(key.to_string(), ConfigSource::Defaults);
        }

        let config_path = match &cli_args.config_path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(deftriage_utils::error::ConfigError::NotFound {
                        path: explicit.display().to_string(),
                    }
                    .into());
                }
                Some(explicit.clone())
            }
            None => Self::discover_config_file_from(start_dir)?,
        };

        if let Some(path) = &config_path {
            let file = Self::load_config_file(path)
                .with_context(|| format!("Failed to load config file: {}", path.display()))?;
            let src = ConfigSource::ConfigFile(path.clone());
            let attr = &mut attribution;

            if let Some(f) = file.engine {
                apply(&mut engine.max_plan_iterations, f.max_plan_iterations, "max_plan_iterations", &src, attr);
                apply(&mut engine.max_step_num, f.max_step_num, "max_step_num", &src, attr);
                apply(&mut engine.max_step_iterations, f.max_step_iterations, "max_step_iterations", &src, attr);
                apply(&mut engine.max_tool_calls, f.max_tool_calls, "max_tool_calls", &src, attr);
                apply(&mut engine.max_total_steps, f.max_total_steps, "max_total_steps", &src, attr);
                apply(&mut engine.context_window, f.context_window, "context_window", &src, attr);
                apply(&mut engine.tree_depth, f.tree_depth, "tree_depth", &src, attr);
                apply(&mut engine.locale, f.locale, "locale", &src, attr);
                apply(&mut engine.auto_accept_plan, f.auto_accept_plan, "auto_accept_plan", &src, attr);
                apply(&mut engine.background_investigation, f.background_investigation, "background_investigation", &src, attr);
                apply(&mut engine.llm_timeout_secs, f.llm_timeout_secs, "llm_timeout_secs", &src, attr);
                apply(&mut engine.capability_timeout_secs, f.capability_timeout_secs, "capability_timeout_secs", &src, attr);
            }

            if let Some(f) = file.llm {
                apply(&mut llm.provider, f.provider, "llm_provider", &src, attr);
                if f.openai.is_some() {
                    llm.openai = f.openai;
                    attr.insert("llm_openai".to_string(), src.clone());
                }
            }

            if let Some(f) = file.tools {
                apply(&mut tools.project_root, f.project_root, "project_root", &src, attr);
                apply(&mut tools.search_backend, f.search_backend, "search_backend", &src, attr);
                apply(&mut tools.rg_path, f.rg_path, "rg_path", &src, attr);
                apply(&mut tools.max_matches_per_file, f.max_matches_per_file, "max_matches_per_file", &src, attr);
                apply(&mut tools.context_lines, f.context_lines, "context_lines", &src, attr);
                apply(&mut tools.interpreter, f.interpreter, "interpreter", &src, attr);
                if !f.exclude.is_empty() {
                    tools.exclude = f.exclude;
                    attr.insert("exclude".to_string(), src.clone());
                }
            }

            if let Some(f) = file.batch {
                apply(&mut batch.max_concurrent, f.max_concurrent, "max_concurrent", &src, attr);
                apply(&mut batch.save_every, f.save_every, "save_every", &src, attr);
            }
        }

        // Environment overrides the file but not explicit flags
        if let Ok(model) = env::var(MODEL_ENV_VAR)
            && !model.is_empty()
        {
            llm.openai.get_or_insert_with(OpenAiConfig::default).model = Some(model);
            attribution.insert("model".to_string(), ConfigSource::Cli);
        }
        if let Ok(locale) = env::var(LOCALE_ENV_VAR)
            && !locale.is_empty()
        {
            engine.locale = Some(locale);
            attribution.insert("locale".to_string(), ConfigSource::Cli);
        }

        let cli = ConfigSource::Cli;
        let attr = &mut attribution;
        apply(&mut llm.provider, cli_args.provider.clone(), "llm_provider", &cli, attr);
        if let Some(model) = &cli_args.model {
            llm.openai.get_or_insert_with(OpenAiConfig::default).model = Some(model.clone());
            attr.insert("model".to_string(), cli.clone());
        }
        apply(&mut engine.max_plan_iterations, cli_args.max_plan_iterations, "max_plan_iterations", &cli, attr);
        apply(&mut engine.max_step_num, cli_args.max_step_num, "max_step_num", &cli, attr);
        apply(&mut engine.max_total_steps, cli_args.max_total_steps, "max_total_steps", &cli, attr);
        apply(&mut engine.locale, cli_args.locale.clone(), "locale", &cli, attr);
        apply(&mut engine.auto_accept_plan, cli_args.auto_accept_plan, "auto_accept_plan", &cli, attr);
        apply(&mut engine.background_investigation, cli_args.background_investigation, "background_investigation", &cli, attr);
        apply(&mut tools.project_root, cli_args.project_root.clone(), "project_root", &cli, attr);
        apply(&mut tools.search_backend, cli_args.search_backend.clone(), "search_backend", &cli, attr);
        apply(&mut batch.max_concurrent, cli_args.max_concurrent, "max_concurrent", &cli, attr);

        if llm.provider.is_none() {
            llm.provider = Some("openai".to_string());
            attribution.insert("llm_provider".to_string(), ConfigSource::Defaults);
        }

        let config = Self {
            engine,
            llm,
            tools,
            batch,
            source_attribution: attribution,
        };

        config.validate()?;

        Ok(config)
    }

    /// Discover config file by searching upward from a given directory
    ///
    /// Walks up looking for `.deftriage/config.toml`, stopping at repository
    /// root markers (.git, .hg, .svn) or the filesystem root.
    pub fn discover_config_file_from(start_dir: &Path) -> Result<Option<PathBuf>> {
        let mut current_dir = start_dir.to_path_buf();

        loop {
            let config_path = current_dir.join(CONFIG_DIR).join("config.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            if current_dir.join(".git").exists()
                || current_dir.join(".hg").exists()
                || current_dir.join(".svn").exists()
            {
                break;
            }

            match current_dir.parent() {
                Some(parent) => current_dir = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    fn load_config_file(path: &Path) -> Result<TomlConfig> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: TomlConfig = toml::from_str(&content).with_context(|| {
                    format!("Failed to parse TOML config file: {}", path.display())
                })?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(TomlConfig::default()),
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }
}

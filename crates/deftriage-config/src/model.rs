use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Where a configuration value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Command-line flag or environment override
    Cli,
    /// `.deftriage/config.toml`
    ConfigFile(PathBuf),
    /// Set through [`ConfigBuilder`](crate::ConfigBuilder)
    Programmatic,
    /// Built-in default
    Defaults,
}

/// Configuration for deftriage runs.
///
/// Hierarchical with precedence CLI > environment > config file > defaults.
/// Use [`Config::discover`] for CLI behavior or [`Config::builder`] when
/// embedding the engine.
///
/// # Configuration File Format
///
/// ```toml
/// [engine]
/// max_plan_iterations = 1
/// max_step_num = 3
/// locale = "en-US"
/// auto_accept_plan = true
///
/// [llm]
/// provider = "openai"
///
/// [llm.openai]
/// model = "gpt-4o-mini"
/// api_key_env = "OPENAI_API_KEY"
///
/// [tools]
/// search_backend = "ripgrep"
///
/// [batch]
/// max_concurrent = 4
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Orchestration caps and run defaults.
    pub engine: EngineConfig,
    /// Reasoning provider configuration.
    pub llm: LlmConfig,
    /// Capability implementations.
    pub tools: ToolsConfig,
    /// Batch driver settings.
    pub batch: BatchConfig,
    /// Source attribution for each setting.
    pub source_attribution: HashMap<String, ConfigSource>,
}

/// Orchestration limits and per-run defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// How many times a rejected plan may be regenerated before the last one is forced through.
    pub max_plan_iterations: Option<u32>,
    /// Steps kept from a plan; extra steps are truncated.
    pub max_step_num: Option<usize>,
    /// Reasoning turns allowed per step before it is marked incomplete.
    pub max_step_iterations: Option<u32>,
    /// Capability invocations allowed per step.
    pub max_tool_calls: Option<u32>,
    /// Steps executed per run across the whole dispatch.
    pub max_total_steps: Option<usize>,
    /// Lines shown either side of the reported line.
    pub context_window: Option<u32>,
    /// Depth of the directory listing given to the planner.
    pub tree_depth: Option<usize>,
    pub locale: Option<String>,
    /// When false the run suspends for plan review.
    pub auto_accept_plan: Option<bool>,
    /// Search the codebase for identifiers in the summary before planning.
    pub background_investigation: Option<bool>,
    pub llm_timeout_secs: Option<u64>,
    pub capability_timeout_secs: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_plan_iterations: Some(1),
            max_step_num: Some(3),
            max_step_iterations: Some(10),
            max_tool_calls: Some(24),
            max_total_steps: Some(12),
            context_window: Some(20),
            tree_depth: Some(3),
            locale: Some("en-US".to_string()),
            auto_accept_plan: Some(true),
            background_investigation: Some(false),
            llm_timeout_secs: Some(300),
            capability_timeout_secs: Some(30),
        }
    }
}

/// Reasoning provider configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LlmConfig {
    pub provider: Option<String>,
    pub openai: Option<OpenAiConfig>,
}

/// OpenAI-compatible HTTP provider configuration
///
/// Works with any chat-completions endpoint that supports tool calls
/// (OpenAI, OpenRouter, vLLM, Ollama).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Reasoning calls allowed per process.
    pub budget: Option<u32>,
}

/// Capability implementation settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    /// Root that code lookup and search are confined to. Defaults to the working directory.
    pub project_root: Option<PathBuf>,
    /// "ripgrep" or "native"
    pub search_backend: Option<String>,
    pub rg_path: Option<PathBuf>,
    pub max_matches_per_file: Option<u32>,
    pub context_lines: Option<u32>,
    /// Interpreter for the analysis sandbox (e.g. "python3"). Unset disables it.
    pub interpreter: Option<String>,
    /// Globs skipped by directory listing and native search.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            project_root: None,
            search_backend: Some("ripgrep".to_string()),
            rg_path: None,
            max_matches_per_file: Some(50),
            context_lines: Some(3),
            interpreter: None,
            exclude: vec![
                ".git/**".to_string(),
                "target/**".to_string(),
                "node_modules/**".to_string(),
            ],
        }
    }
}

/// Batch driver settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    pub max_concurrent: Option<usize>,
    /// Write intermediate results every N completed runs.
    pub save_every: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: Some(1),
            save_every: Some(10),
        }
    }
}

use std::path::PathBuf;

/// Command-line overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_plan_iterations: Option<u32>,
    pub max_step_num: Option<usize>,
    pub max_total_steps: Option<usize>,
    pub locale: Option<String>,
    pub auto_accept_plan: Option<bool>,
    pub background_investigation: Option<bool>,
    pub project_root: Option<PathBuf>,
    pub search_backend: Option<String>,
    pub max_concurrent: Option<usize>,
}

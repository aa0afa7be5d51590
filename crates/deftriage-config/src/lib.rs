//! Configuration management for deftriage
//!
//! Hierarchical configuration with discovery and precedence:
//! CLI > environment > file > defaults. The TOML file supports
//! `[engine]`, `[llm]`, `[tools]` and `[batch]` sections.

mod builder;
mod cli_args;
mod discovery;
mod model;
mod sources;
mod validation;

pub use builder::ConfigBuilder;
pub use cli_args::CliArgs;
pub use discovery::{CONFIG_DIR, LOCALE_ENV_VAR, MODEL_ENV_VAR};
pub use model::*;

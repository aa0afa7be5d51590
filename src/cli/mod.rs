//! Command-line interface for deftriage
//!
//! ## Module Structure
//!
//! - `args`: CLI argument definitions (clap)
//! - `run`: entry point, configuration and error reporting
//! - `commands`: command implementations
//! - `tests`: argument parsing tests (cfg(test) only)

pub mod args;
mod commands;
mod run;


pub use args::{AnalyzeArgs, BatchArgs, Cli, Commands, DefectArgs, ResumeArgs, RunArgs};
pub use run::run;

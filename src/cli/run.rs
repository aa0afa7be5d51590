//! CLI entry point and dispatch logic
//!
//! `run()` parses arguments, discovers configuration, creates the tokio
//! runtime, dispatches to the command handlers and prints every error.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use deftriage_utils::error::ConfigError;
use deftriage_utils::logging::{LogFormat, init_tracing};

use super::args::{Cli, Commands};
use super::commands;
use crate::{CliArgs, Config, ExitCode, TriageError};

/// Main CLI execution function.
///
/// Handles ALL output including errors. main.rs only calls
/// `std::process::exit(code.as_i32())` on error; it does not print.
pub fn run() -> Result<(), ExitCode> {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    // A second initialisation only happens in tests; keep the first subscriber
    let _ = init_tracing(cli.verbose, format);

    let cli_args = CliArgs {
        config_path: cli.config.clone(),
        provider: cli.provider.clone(),
        model: cli.model.clone(),
        max_plan_iterations: cli.max_plan_iterations,
        max_step_num: cli.max_step_num,
        max_total_steps: cli.max_total_steps,
        locale: cli.locale.clone(),
        auto_accept_plan: match &cli.command {
            Commands::Run(args) if args.review => Some(false),
            _ => None,
        },
        background_investigation: cli.background_investigation.then_some(true),
        project_root: cli.project_root.clone(),
        search_backend: cli.search_backend.clone(),
        max_concurrent: match &cli.command {
            Commands::Batch(args) => args.max_concurrent,
            _ => None,
        },
    };

    let config = match Config::discover(&cli_args) {
        Ok(config) => config,
        Err(err) => {
            let err = match err.downcast::<ConfigError>() {
                Ok(config_err) => anyhow::Error::new(TriageError::Config(config_err)),
                Err(other) => other,
            };
            report_error("config", &err);
            return Err(ExitCode::CLI_ARGS);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("✗ Failed to create async runtime: {e}");
            return Err(ExitCode::INTERNAL);
        }
    };

    let operation = match &cli.command {
        Commands::Run(_) => "run",
        Commands::Resume(_) => "resume",
        Commands::Batch(_) => "batch",
        Commands::Analyze(_) => "analyze",
    };

    let result = rt.block_on(async {
        let cancel = CancellationToken::new();
        let watcher = spawn_interrupt_watcher(cancel.clone());

        let outcome = match cli.command {
            Commands::Run(args) => commands::execute_run_command(args, &config, cancel).await,
            Commands::Resume(args) => {
                commands::execute_resume_command(args, &config, cancel).await
            }
            Commands::Batch(args) => commands::execute_batch_command(args, &config, cancel).await,
            Commands::Analyze(args) => commands::execute_analyze_command(&args),
        };

        watcher.abort();
        outcome
    });

    match result {
        Ok(ExitCode::SUCCESS) => Ok(()),
        Ok(code) => Err(code),
        Err(err) => {
            report_error(operation, &err);
            Err(exit_code_for(&err))
        }
    }
}

/// Cancel the run on the first Ctrl+C.
fn spawn_interrupt_watcher(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling...");
            cancel.cancel();
        }
    })
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    err.downcast_ref::<TriageError>()
        .map_or(ExitCode::INTERNAL, TriageError::to_exit_code)
}

fn report_error(operation: &str, err: &anyhow::Error) {
    if let Some(triage_err) = err.downcast_ref::<TriageError>() {
        eprintln!("{}", triage_err.display_for_user());
    } else {
        eprintln!("✗ Unexpected error during {operation}: {err:#}");
        eprintln!();
        eprintln!("Suggestions:");
        eprintln!("  • Re-run with --verbose for more detail");
        eprintln!("  • Check that input and output paths are readable and writable");
    }
}

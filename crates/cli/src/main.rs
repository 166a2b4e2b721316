use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;

use probe_actions::{PLUGIN_SUBCOMMAND, PluginDispatcher};
use probe_engine::{RunConfig, SecurityMode, WorkflowRun, load_workflow};

/// Run declarative YAML workflows.
#[derive(Debug, Parser)]
#[command(name = "probe", version, about)]
struct Cli {
    /// Workflow files, directories, or simple globs
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Stream job output as it happens instead of only the final report
    #[arg(short, long)]
    verbose: bool,

    /// Hide response times in the report
    #[arg(long)]
    no_rt: bool,

    /// Terminate with exit status 2 on expression security violations
    #[arg(long)]
    strict_security: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Plugin mode is dispatched on the raw argv before clap sees anything:
    // `builtin-actions` is a reserved first argument, not a subcommand.
    let mut raw_args = std::env::args().skip(1);
    if raw_args.next().as_deref() == Some(PLUGIN_SUBCOMMAND) {
        let action = raw_args.next().context("builtin-actions requires an action name")?;
        init_tracing(true);
        return probe_actions::serve(&action).await.map_err(Into::into);
    }

    init_tracing(false);
    let cli = Cli::parse();

    let (spec, base_dir) = load_workflow(&cli.paths)?;
    debug!(workflow = %spec.name, jobs = spec.jobs.len(), "workflow loaded");

    let config = RunConfig {
        verbose: cli.verbose,
        show_rt: !cli.no_rt,
        security_mode: if cli.strict_security {
            SecurityMode::HardExit
        } else {
            SecurityMode::ReturnError
        },
    };
    let runner = Arc::new(PluginDispatcher::from_current_exe()?);

    let mut run = WorkflowRun::new(spec, base_dir);
    let outcome = tokio::select! {
        outcome = run.start(config, runner) => outcome,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            std::process::exit(130);
        }
    };

    match outcome {
        Ok(summary) => std::process::exit(summary.exit_status),
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    }
}

/// Tracing goes to stderr: in plugin mode stdout carries the RPC frames,
/// and in run mode stdout carries the report.
fn init_tracing(plugin_mode: bool) {
    let default_filter = if plugin_mode { "warn" } else { "info" };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

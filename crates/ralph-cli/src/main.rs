//! ralph -- autonomous agent loop over a task backlog.

mod commands;
mod exit_codes;
mod logging;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ralph", version, about = "Run an autonomous coding agent over a task backlog")]
struct Cli {
    /// Working directory for the session (defaults to the current directory).
    #[arg(long, global = true)]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new session over the backlog.
    Run(RunArgs),

    /// Resume a persisted session after an interrupt or pause.
    Resume(RunArgs),

    /// Signal the live session in the working directory to stop.
    Stop,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    /// Agent plugin: claude, codex, or a custom binary name.
    #[arg(long, default_value = "claude")]
    agent: String,

    /// Tracker plugin: currently only `json` (tasks.json in the working
    /// directory).
    #[arg(long, default_value = "json")]
    tracker: String,

    /// Model passed through to the agent CLI.
    #[arg(long)]
    model: Option<String>,

    /// Epic id forwarded into agent prompts.
    #[arg(long)]
    epic: Option<String>,

    /// Path to a product requirements document forwarded into prompts.
    #[arg(long)]
    prd: Option<String>,

    /// Iteration budget; 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    max_iterations: u32,

    /// Delay between iterations in milliseconds.
    #[arg(long, default_value_t = 0)]
    iteration_delay_ms: u64,

    /// Retry attempts per task before it is skipped.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Per-invocation agent timeout in seconds.
    #[arg(long, default_value_t = 1800)]
    agent_timeout_secs: u64,

    /// Take over the lock even if a live session holds it.
    #[arg(long)]
    force: bool,

    /// Treat lock conflicts as hard errors instead of prompting.
    #[arg(long)]
    non_interactive: bool,
}

#[tokio::main]
async fn main() {
    logging::init_logging("info");

    let cli = Cli::parse();
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let code = match cli.command {
        Commands::Run(args) => commands::run::run(&cwd, args).await,
        Commands::Resume(args) => commands::resume::run(&cwd, args).await,
        Commands::Stop => commands::stop::run(&cwd),
    };

    let code = code.unwrap_or_else(|err| {
        eprintln!("{err:#}");
        exit_codes::FAILURE
    });
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_defaults() {
        let cli = Cli::parse_from(["ralph", "run"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.agent, "claude");
                assert_eq!(args.tracker, "json");
                assert_eq!(args.max_iterations, 0);
                assert!(!args.force);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_run_with_budget_and_force() {
        let cli = Cli::parse_from(["ralph", "run", "--max-iterations", "5", "--force"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.max_iterations, 5);
                assert!(args.force);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn parse_stop_with_cwd() {
        let cli = Cli::parse_from(["ralph", "stop", "--cwd", "/tmp/project"]);
        assert!(matches!(cli.command, Commands::Stop));
        assert_eq!(cli.cwd.unwrap(), PathBuf::from("/tmp/project"));
    }
}

//! `taskloop` CLI: drive one goal through the execution loop.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use taskloop::agent::{Agent, RunOptions};
use taskloop::core::playback::PlaybackMode;
use taskloop::core::types::LoopState;
use taskloop::exit_codes;
use taskloop::io::backend::CommandBackend;
use taskloop::io::config::{AgentConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use taskloop::io::events::{ConsoleObserver, Observers, TranscriptObserver};
use taskloop::io::store::InMemoryTaskStore;
use taskloop::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "taskloop",
    version,
    about = "Autonomous task-execution agent loop"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file if missing.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Decompose a goal into tasks and work through them.
    Run {
        /// The top-level objective.
        #[arg(long)]
        goal: String,
        /// Override the loop budget.
        #[arg(long)]
        max_loops: Option<u32>,
        /// Analyze each task (web search or reasoning) before executing it.
        #[arg(long)]
        web_search: bool,
        /// Pause before every iteration and wait for input.
        #[arg(long)]
        stepwise: bool,
        /// Append every message as JSON lines to this file.
        #[arg(long)]
        transcript: Option<PathBuf>,
    },
}

struct RunArgs {
    goal: String,
    max_loops: Option<u32>,
    web_search: bool,
    stepwise: bool,
    transcript: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            goal,
            max_loops,
            web_search,
            stepwise,
            transcript,
        } => cmd_run(
            &cli.config,
            RunArgs {
                goal,
                max_loops,
                web_search,
                stepwise,
                transcript,
            },
        ),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &AgentConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Merge CLI overrides into the file config.
fn apply_overrides(mut cfg: AgentConfig, args: &RunArgs) -> Result<AgentConfig> {
    if args.max_loops.is_some() {
        cfg.max_loops = args.max_loops;
    }
    if args.web_search {
        cfg.web_search = true;
    }
    if args.stepwise {
        cfg.mode = PlaybackMode::Stepwise;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn cmd_run(config_path: &Path, args: RunArgs) -> Result<i32> {
    if args.goal.trim().is_empty() {
        bail!("--goal must not be empty");
    }
    let cfg = apply_overrides(load_config(config_path)?, &args)?;

    let backend = CommandBackend::new(cfg.backend.clone(), cfg.model.clone())
        .context("build command backend")?;
    let mut observers = Observers::new().with(ConsoleObserver);
    if let Some(path) = &args.transcript {
        observers = observers.with(TranscriptObserver::create(path)?);
    }

    let store = Arc::new(InMemoryTaskStore::new());
    let mut agent = Agent::new(
        args.goal,
        RunOptions::from_config(&cfg),
        backend,
        store,
        observers,
    );

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut outcome = agent.start();
    while outcome.state == LoopState::Paused {
        // End of input stops the run like `q` does.
        let line = match lines.next() {
            Some(line) => line.context("read stdin")?,
            None => "q".to_string(),
        };
        outcome = if line.trim().eq_ignore_ascii_case("q") {
            agent.stop()
        } else {
            agent.resume()
        };
    }

    info!(state = ?outcome.state, loop_count = outcome.loop_count, "run finished");
    Ok(exit_codes::for_state(outcome.state))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_overrides() {
        let cli = Cli::parse_from([
            "taskloop",
            "run",
            "--goal",
            "Plan a trip",
            "--max-loops",
            "3",
            "--stepwise",
        ]);
        match cli.command {
            Command::Run {
                goal,
                max_loops,
                stepwise,
                web_search,
                transcript,
            } => {
                assert_eq!(goal, "Plan a trip");
                assert_eq!(max_loops, Some(3));
                assert!(stepwise);
                assert!(!web_search);
                assert!(transcript.is_none());
            }
            Command::Init { .. } => panic!("expected run"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["taskloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let args = RunArgs {
            goal: "Plan a trip".to_string(),
            max_loops: Some(4),
            web_search: true,
            stepwise: true,
            transcript: None,
        };
        let cfg = apply_overrides(AgentConfig::default(), &args).expect("overrides");
        assert_eq!(cfg.max_loops, Some(4));
        assert!(cfg.web_search);
        assert_eq!(cfg.mode, PlaybackMode::Stepwise);
    }
}

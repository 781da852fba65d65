//! Command-line front end for the delegation engine.
//!
//! State lives under `.cortex/` in the current directory: `config.toml`, the
//! persistent feedback history, per-run session logs and run archives.

use std::env;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use cortex::cancel::CancelToken;
use cortex::core::delegation::{describe_plan, parse_with_trace};
use cortex::core::feedback::record_feedback;
use cortex::core::state::{RunResult, RunState};
use cortex::driver::Engine;
use cortex::exit_codes;
use cortex::io::config::{CortexConfig, load_config};
use cortex::io::feedback_store::FeedbackStore;
use cortex::io::generator::CommandGenerator;
use cortex::io::init::{CortexPaths, InitOptions, init_cortex};
use cortex::io::run_archive::write_run_archive;
use cortex::io::session_log::SessionLog;
use cortex::logging;

#[derive(Parser)]
#[command(
    name = "cortex",
    version,
    about = "Route a task through planner, analyzer and integrator stages"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.cortex/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Print the delegation plan parsed from planner text (`-` reads stdin).
    Plan {
        /// Planner output to parse.
        text: String,
    },
    /// Run a task through the stages and print the final recommendation.
    Run {
        /// Task description.
        task: String,
        /// Feedback on this run's response, saved to the feedback history.
        #[arg(long)]
        feedback: Option<String>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Plan { text } => cmd_plan(&text),
        Command::Run { task, feedback } => cmd_run(&root, &task, feedback.as_deref()),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_cortex(root, &InitOptions { force })?;
    println!("{}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_plan(text: &str) -> Result<i32> {
    let input = if text == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read planner text from stdin")?;
        buf
    } else {
        text.to_string()
    };
    let trace = parse_with_trace(&input);
    println!("{}", describe_plan(&trace.plan));
    if trace.used_fallback {
        eprintln!("no analyzer was named; using every analyzer");
    }
    Ok(exit_codes::OK)
}

fn load_runtime_config(paths: &CortexPaths) -> Result<CortexConfig> {
    let mut cfg = load_config(&paths.config_path)?;
    cfg.models.apply_env_overrides(|key| env::var(key).ok());
    Ok(cfg)
}

fn cmd_run(root: &Path, task: &str, feedback: Option<&str>) -> Result<i32> {
    if task.trim().is_empty() {
        return Err(anyhow!("task must not be empty"));
    }
    let paths = CortexPaths::new(root);
    let cfg = load_runtime_config(&paths)?;
    let store = FeedbackStore::new(paths.feedback_file(&cfg));
    let prior = store.load_all()?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || handler_token.cancel()).context("install Ctrl-C handler")?;

    let generator = CommandGenerator::from_config(&cfg);
    let sink = SessionLog::new(paths.sessions_dir(&cfg));
    let engine = Engine::new(&generator, &sink, &cfg, cancel);

    let mut state = engine.run_task(task, prior);

    if let Some(text) = feedback.map(str::trim).filter(|t| !t.is_empty()) {
        state = record_feedback(state, text, Utc::now());
        save_latest_feedback(&store, &state)?;
    }

    let archive = write_run_archive(&paths.runs_dir(&cfg), &state)?;
    info!(archive = %archive.display(), "run archived");

    Ok(report(&state))
}

fn save_latest_feedback(store: &FeedbackStore, state: &RunState) -> Result<()> {
    let entry = state
        .feedback_history()
        .last()
        .ok_or_else(|| anyhow!("feedback was recorded but history is empty"))?;
    let total = store.append(entry)?;
    info!(total, "feedback saved");
    Ok(())
}

fn report(state: &RunState) -> i32 {
    match state.result() {
        RunResult::Integrated(text) => {
            println!("{text}");
            exit_codes::OK
        }
        RunResult::IntegrationFailed(reason) => {
            eprintln!("integration failed: {reason}");
            exit_codes::INTEGRATION_FAILED
        }
        RunResult::Aborted(error) => {
            eprintln!("run aborted: {error}");
            exit_codes::ABORTED
        }
        RunResult::Incomplete => {
            warn!(run_id = state.run_id(), "run ended before integration");
            eprintln!("run ended before integration");
            exit_codes::ABORTED
        }
    }
}

//! ouro: recursive language model driver
//!
//! Runs a model against a prompt too large for its context window by
//! handing the prompt to the model as a value inside a sandboxed Python
//! REPL, with recursive sub-agents for decomposition.

mod config;
mod view;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use config::Config;
use ouro_driver::models::{
    ENV_API_KEY, ENV_BASE_URL, ENV_FALLBACK_PRIMARY, ENV_FALLBACK_SUB, ENV_PRIMARY_AGENT,
    ENV_SUB_AGENT,
};
use ouro_driver::{
    ChatClient, Driver, DriverConfig, DriverDeps, DriverError, PyEvaluatorConfig,
    PyEvaluatorFactory, resolve_model_names, resolve_proxy_client_config,
};
use ouro_events::{EventSink, SinkConfig};
use view::ViewMode;

/// Environment variables the driver consumes.
const DRIVER_ENV_VARS: &[&str] = &[
    ENV_BASE_URL,
    ENV_API_KEY,
    ENV_PRIMARY_AGENT,
    ENV_SUB_AGENT,
    ENV_FALLBACK_PRIMARY,
    ENV_FALLBACK_SUB,
];

#[derive(Parser)]
#[command(name = "ouro", version, about = "Recursive language model driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run an agent tree over a prompt.
    Run(RunArgs),
    /// Render a run log.
    View(ViewArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// The prompt, inline. Mutually exclusive with --file.
    prompt: Option<String>,

    /// Read the prompt from a file.
    #[arg(long, conflicts_with = "prompt")]
    file: Option<PathBuf>,

    /// Config file path; otherwise ouro.toml is discovered upward.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory run logs are written to.
    #[arg(long, default_value = ".ouro/runs")]
    log_dir: PathBuf,

    /// Write the final result to this file instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Sandbox interpreter binary.
    #[arg(long, default_value = "python3")]
    python: String,
}

#[derive(clap::Args)]
struct ViewArgs {
    /// The run log to render.
    log: PathBuf,

    /// How to render it.
    #[arg(long, value_enum, default_value = "tree")]
    mode: ViewMode,
}

fn collect_env() -> HashMap<String, String> {
    DRIVER_ENV_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect()
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, DriverError> {
    let found = match path {
        Some(path) => Config::from_file(path).map(Some),
        None => match std::env::current_dir() {
            Ok(cwd) => Config::find_and_load_from(&cwd).map(|hit| hit.map(|(config, _)| config)),
            Err(_) => Ok(None),
        },
    };
    match found {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => Err(DriverError::Config(format!("{e:#}"))),
    }
}

fn read_prompt(args: &RunArgs) -> Result<String, DriverError> {
    match (&args.prompt, &args.file) {
        (Some(prompt), None) => Ok(prompt.clone()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|e| DriverError::Usage(format!("cannot read {}: {e}", path.display()))),
        _ => Err(DriverError::Usage(
            "a prompt is required: pass it inline or via --file".to_string(),
        )),
    }
}

fn persist_result(path: &PathBuf, result: &serde_json::Value) -> Result<(), DriverError> {
    let rendered = match result {
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other)
            .map_err(|e| DriverError::Output(e.to_string()))?,
    };
    std::fs::write(path, rendered)
        .map_err(|e| DriverError::Output(format!("cannot write {}: {e}", path.display())))
}

async fn run(args: RunArgs) -> i32 {
    match try_run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    }
}

async fn try_run(args: RunArgs) -> Result<i32, DriverError> {
    let prompt = read_prompt(&args)?;
    let config = load_config(args.config.as_ref())?;
    config.warn_deprecated();

    let env = collect_env();
    let proxy_config = resolve_proxy_client_config(&env)?;
    let api_key = proxy_config.api_key.clone();
    let requested = resolve_model_names(
        config.primary_agent.as_deref(),
        config.sub_agent.as_deref(),
        &env,
    );

    let client = ChatClient::new(proxy_config)?;
    let evaluators = PyEvaluatorFactory::new(
        PyEvaluatorConfig::new().with_interpreter(&args.python),
    );
    let sink = Arc::new(EventSink::new(SinkConfig::new(&args.log_dir)));

    let driver = Driver::new(
        DriverDeps::new(Arc::new(client), Arc::new(evaluators), sink.clone()),
        DriverConfig::new()
            .with_limits(config.limits())
            .with_caps(config.caps())
            .with_requested(requested)
            .with_env(env)
            .with_secrets(vec![api_key]),
    );

    // Race the tree against SIGINT. Dropping the run future kills the
    // sandbox children; the sink is flushed before exiting either way.
    let outcome = tokio::select! {
        outcome = driver.run(&prompt) => outcome,
        _ = tokio::signal::ctrl_c() => {
            if let Err(e) = sink.flush() {
                tracing::warn!(error = %e, "failed to flush event sink");
            }
            if let Some(path) = sink.path() {
                eprintln!("log: {}", path.display());
            }
            return Err(DriverError::Interrupted);
        }
    };

    if let Some(path) = &outcome.log_file {
        eprintln!("log: {}", path.display());
    }

    if let Some(error) = &outcome.error {
        eprintln!("{error}");
        return Ok(outcome.exit_code());
    }

    let result = outcome.result.unwrap_or(serde_json::Value::Null);
    match &args.output {
        Some(path) => persist_result(path, &result)?,
        None => match &result {
            serde_json::Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        },
    }
    Ok(0)
}

fn view_log(args: ViewArgs) -> i32 {
    match view::render(&args.log, args.mode) {
        Ok(rendered) => {
            print!("{rendered}");
            0
        }
        Err(e) => {
            eprintln!("{e:#}");
            1
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).await,
        Command::View(args) => view_log(args),
    };
    ExitCode::from(code.clamp(0, 255) as u8)
}

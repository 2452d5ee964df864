//! `fixloop` command line.
//!
//! `run` drives the full review/fix/execute loop against a local model;
//! `exec` and `check` expose the sandbox and the static checks on their own.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use fixloop::cancel::CancelToken;
use fixloop::core::lint::{LintReport, lint};
use fixloop::core::machine::{RunState, Status};
use fixloop::core::safety::SafetyGate;
use fixloop::core::text::{format_code, truncate_output};
use fixloop::core::types::{ExecutionResult, SafetyVerdict};
use fixloop::exit_codes;
use fixloop::io::config::{AppConfig, DEFAULT_CONFIG_PATH, load_config, write_config};
use fixloop::io::model::{OllamaClient, ServiceUnavailableError};
use fixloop::io::run_log::write_run_record;
use fixloop::io::sandbox::{PythonSandbox, Sandbox};
use fixloop::logging;
use fixloop::orchestrator::Orchestrator;

const DISPLAY_MAX_LINES: usize = 50;
const DISPLAY_MAX_CHARS: usize = 5_000;

#[derive(Parser)]
#[command(
    name = "fixloop",
    version,
    about = "Review, fix and run Python scripts with a local model"
)]
struct Cli {
    /// Config file (defaults to `.fixloop/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Review, fix and execute a script until it runs cleanly.
    Run {
        /// Script path, or `-` for stdin.
        file: PathBuf,
        #[arg(long)]
        max_retries: Option<u32>,
        /// Execution timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Model name to request from the service.
        #[arg(long)]
        model: Option<String>,
        /// Print the terminal run state as JSON.
        #[arg(long)]
        json: bool,
        /// Also write the terminal run state to this directory.
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Execute a script in the sandbox without involving the model.
    Exec {
        file: PathBuf,
        #[arg(long)]
        timeout: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Report the safety verdict and lint findings for a script.
    Check {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write the default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            let code = if err.downcast_ref::<ServiceUnavailableError>().is_some() {
                exit_codes::UNAVAILABLE
            } else {
                exit_codes::INVALID
            };
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    match cli.command {
        Command::Run {
            file,
            max_retries,
            timeout,
            model,
            json,
            record,
        } => {
            let mut cfg = load_config(&config_path)?;
            if let Some(max_retries) = max_retries {
                cfg.max_retries = max_retries;
            }
            if let Some(timeout) = timeout {
                cfg.execution_timeout_secs = timeout;
            }
            if let Some(model) = model {
                cfg.model.name = model;
            }
            cfg.validate()?;
            cmd_run(&cfg, &file, json, record.as_deref())
        }
        Command::Exec {
            file,
            timeout,
            json,
        } => {
            let mut cfg = load_config(&config_path)?;
            if let Some(timeout) = timeout {
                cfg.execution_timeout_secs = timeout;
            }
            cfg.validate()?;
            cmd_exec(&cfg, &file, json)
        }
        Command::Check { file, json } => {
            let cfg = load_config(&config_path)?;
            cmd_check(&cfg, &file, json)
        }
        Command::Init { force } => cmd_init(&config_path, force),
    }
}

fn cmd_run(cfg: &AppConfig, file: &Path, json: bool, record: Option<&Path>) -> Result<i32> {
    let code = read_script(file)?;
    let client = OllamaClient::new(&cfg.model)?;
    client.ping()?;

    let cancel = CancelToken::new();
    cancel.cancel_on_interrupt()?;
    let sandbox = build_sandbox(cfg)?.with_cancel(cancel.clone());
    let orchestrator = Orchestrator::new(client, sandbox, cfg.limits()).with_cancel(cancel);
    let state = orchestrator.run(&code)?;

    if let Some(dir) = record {
        let path = write_run_record(dir, &state)?;
        eprintln!("run record: {}", path.display());
    }
    if json {
        print_json(&state)?;
    } else {
        print_run_summary(&state);
    }
    Ok(match state.status {
        Status::Success => exit_codes::OK,
        _ => exit_codes::FAILED,
    })
}

fn cmd_exec(cfg: &AppConfig, file: &Path, json: bool) -> Result<i32> {
    let code = format_code(&read_script(file)?);
    let sandbox = build_sandbox(cfg)?;
    let result = sandbox.execute(&code, cfg.execution_timeout());
    if json {
        print_json(&result)?;
    } else {
        print_execution(&result);
    }
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

#[derive(Serialize)]
struct CheckReport {
    verdict: SafetyVerdict,
    lint: LintReport,
}

fn cmd_check(cfg: &AppConfig, file: &Path, json: bool) -> Result<i32> {
    let code = format_code(&read_script(file)?);
    let gate = SafetyGate::new(cfg.blocked_imports.clone())?;
    let report = CheckReport {
        verdict: gate.check(&code),
        lint: lint(&code),
    };

    if json {
        print_json(&report)?;
    } else {
        match &report.verdict.reason {
            None => println!("safe"),
            Some(reason) => println!("unsafe: {reason}"),
        }
        for error in &report.lint.errors {
            println!("error: {error}");
        }
        for warning in &report.lint.warnings {
            println!("warning: {warning}");
        }
    }
    Ok(if report.verdict.safe {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &AppConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn build_sandbox(cfg: &AppConfig) -> Result<PythonSandbox> {
    let gate = SafetyGate::new(cfg.blocked_imports.clone())?;
    Ok(PythonSandbox::new(
        gate,
        cfg.interpreter.clone(),
        cfg.output_limit_bytes,
    ))
}

fn read_script(file: &Path) -> Result<String> {
    if file == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read script from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(file).with_context(|| format!("read {}", file.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}

fn print_execution(result: &ExecutionResult) {
    if let Some(output) = &result.output {
        println!("{}", truncate_output(output, DISPLAY_MAX_LINES, DISPLAY_MAX_CHARS));
    }
    if let Some(error) = &result.error {
        eprintln!("{}", truncate_output(error, DISPLAY_MAX_LINES, DISPLAY_MAX_CHARS));
    }
    eprintln!(
        "{} in {:.2}s",
        if result.success { "succeeded" } else { "failed" },
        result.execution_time_secs
    );
}

fn print_run_summary(state: &RunState) {
    match &state.failure {
        None => println!("status: {}", state.status),
        Some(reason) => println!("status: {} ({reason})", state.status),
    }
    println!(
        "attempts: {}  parse failures: {}",
        state.attempt, state.parse_failures
    );
    if let Some(review) = &state.review {
        println!("review ({}): {}", review.severity, review.summary);
        for issue in &review.issues {
            println!("  - {issue}");
        }
    }
    if let Some(fix) = &state.fix_result
        && !fix.explanation.is_empty()
    {
        println!("fix: {}", fix.explanation);
    }
    println!("\n```python\n{}\n```", state.current_code);
    if let Some(result) = &state.execution_result {
        print_execution(result);
    }
}

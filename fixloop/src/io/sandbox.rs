//! Runs a script in a scratch directory after the safety gate approves it.

use std::fs;
use std::process::Command;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::core::safety::SafetyGate;
use crate::core::types::ExecutionResult;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Executes one script with a deadline. Never returns an error: every
/// failure mode is folded into the [`ExecutionResult`].
pub trait Sandbox {
    fn execute(&self, code: &str, timeout: Duration) -> ExecutionResult;
}

impl<T: Sandbox + ?Sized> Sandbox for &T {
    fn execute(&self, code: &str, timeout: Duration) -> ExecutionResult {
        (**self).execute(code, timeout)
    }
}

/// Sandbox backed by a local Python interpreter.
///
/// Each call gets its own temporary directory as working directory; it is
/// removed when the call returns, whatever the outcome.
#[derive(Debug, Clone)]
pub struct PythonSandbox {
    gate: SafetyGate,
    interpreter: Vec<String>,
    output_limit_bytes: usize,
    cancel: Option<CancelToken>,
}

impl PythonSandbox {
    pub fn new(gate: SafetyGate, interpreter: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            gate,
            interpreter,
            output_limit_bytes,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn gate(&self) -> &SafetyGate {
        &self.gate
    }

    fn run_script(&self, code: &str, timeout: Duration) -> Result<CommandOutput> {
        let workdir = tempfile::tempdir().context("create sandbox directory")?;
        let script = workdir.path().join("main.py");
        fs::write(&script, code)
            .with_context(|| format!("write script {}", script.display()))?;

        let (program, args) = self
            .interpreter
            .split_first()
            .context("interpreter command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .arg(&script)
            .current_dir(workdir.path())
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8");

        run_command_with_timeout(cmd, timeout, self.output_limit_bytes, self.cancel.as_ref())
    }
}

impl Sandbox for PythonSandbox {
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64(), code_bytes = code.len()))]
    fn execute(&self, code: &str, timeout: Duration) -> ExecutionResult {
        let verdict = self.gate.check(code);
        if !verdict.safe {
            let reason = verdict.reason.unwrap_or_else(|| "unsafe code".to_string());
            info!(reason = %reason, "script rejected by safety gate");
            return ExecutionResult::blocked(&reason);
        }

        let started = Instant::now();
        let output = match self.run_script(code, timeout) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox execution failed");
                return ExecutionResult::failed(
                    None,
                    format!("Execution failed: {err:#}"),
                    started.elapsed().as_secs_f64(),
                );
            }
        };
        let result = interpret_output(&output, timeout);
        debug!(
            success = result.success,
            elapsed_secs = result.execution_time_secs,
            "script finished"
        );
        result
    }
}

/// Fold raw process output into an [`ExecutionResult`].
fn interpret_output(output: &CommandOutput, timeout: Duration) -> ExecutionResult {
    let elapsed = output.elapsed.as_secs_f64();
    let stdout = output.stdout_text().trim().to_string();
    let stdout = (!stdout.is_empty()).then_some(stdout);

    if output.timed_out {
        return ExecutionResult::failed(
            stdout,
            format!("Execution timed out after {} seconds", format_seconds(timeout)),
            elapsed,
        );
    }
    if output.cancelled {
        return ExecutionResult::failed(stdout, "Execution cancelled".to_string(), elapsed);
    }
    if output.status.success() {
        return ExecutionResult::succeeded(stdout, elapsed);
    }

    let stderr = output.stderr_text().trim().to_string();
    let error = if !stderr.is_empty() {
        stderr
    } else if let Some(code) = output.status.code() {
        format!("Unknown error (exit status {code})")
    } else {
        "Unknown error".to_string()
    };
    ExecutionResult::failed(stdout, error, elapsed)
}

/// Whole seconds print without a fraction; anything finer keeps it.
fn format_seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        duration.as_secs_f64().to_string()
    }
}

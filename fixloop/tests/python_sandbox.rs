//! Sandbox scenarios against a real Python interpreter.
//!
//! Each test checks for `python3` first and returns early when it is missing.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use fixloop::core::safety::SafetyGate;
use fixloop::io::config::DEFAULT_BLOCKED_IMPORTS;
use fixloop::io::sandbox::{PythonSandbox, Sandbox};

fn python_available() -> bool {
    Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn sandbox() -> PythonSandbox {
    let gate = SafetyGate::new(DEFAULT_BLOCKED_IMPORTS.iter().copied()).expect("gate");
    PythonSandbox::new(gate, vec!["python3".to_string()], 100_000)
}

#[test]
fn hello_world_succeeds() {
    if !python_available() {
        return;
    }
    let result = sandbox().execute("print('Hello, World!')", Duration::from_secs(10));
    assert!(result.success, "{result:?}");
    assert_eq!(result.output.as_deref(), Some("Hello, World!"));
    assert_eq!(result.error, None);
    assert!(!result.blocked_import_detected);
}

#[test]
fn zero_division_is_reported() {
    if !python_available() {
        return;
    }
    let result = sandbox().execute("x = 1/0", Duration::from_secs(10));
    assert!(!result.success);
    assert!(
        result.error.as_deref().unwrap_or("").contains("ZeroDivisionError"),
        "{result:?}"
    );
}

#[test]
fn blocked_import_never_runs() {
    let result = sandbox().execute("import os\nprint(os.getcwd())", Duration::from_secs(10));
    assert!(!result.success);
    assert!(result.blocked_import_detected);
    assert_eq!(result.execution_time_secs, 0.0);
    assert_eq!(
        result.error.as_deref(),
        Some("Security Error: Blocked import(s) detected: os")
    );
}

#[test]
fn infinite_loop_is_killed_near_the_deadline() {
    if !python_available() {
        return;
    }
    let started = Instant::now();
    let result = sandbox().execute("while True:\n    pass", Duration::from_secs(1));
    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("Execution timed out after 1 seconds")
    );
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn silent_script_has_no_output() {
    if !python_available() {
        return;
    }
    let result = sandbox().execute("x = 41 + 1", Duration::from_secs(10));
    assert!(result.success, "{result:?}");
    assert_eq!(result.output, None);
}

#[test]
fn script_runs_in_its_own_scratch_directory() {
    if !python_available() {
        return;
    }
    let code = "open('scratch.txt', 'w').write('x')\nprint(open('scratch.txt').read())";
    let first = sandbox().execute(code, Duration::from_secs(10));
    assert!(first.success, "{first:?}");
    assert_eq!(first.output.as_deref(), Some("x"));
    assert!(!Path::new("scratch.txt").exists());
}

/// Directory holding the script, read from the first line it printed.
fn script_dir(output: Option<&str>) -> PathBuf {
    let script = output
        .and_then(|out| out.lines().next())
        .expect("script printed its path");
    Path::new(script)
        .parent()
        .expect("script path has a parent")
        .to_path_buf()
}

#[test]
fn scratch_directory_is_gone_after_success() {
    if !python_available() {
        return;
    }
    let result = sandbox().execute("print(__file__)", Duration::from_secs(10));
    assert!(result.success, "{result:?}");
    let dir = script_dir(result.output.as_deref());
    assert!(!dir.exists(), "{} outlived the run", dir.display());
}

#[test]
fn scratch_directory_is_gone_after_a_failing_exit() {
    if !python_available() {
        return;
    }
    let code = "print(__file__, flush=True)\nraise SystemExit(3)";
    let result = sandbox().execute(code, Duration::from_secs(10));
    assert!(!result.success);
    let dir = script_dir(result.output.as_deref());
    assert!(!dir.exists(), "{} outlived the run", dir.display());
}

#[test]
fn scratch_directory_is_gone_after_a_timeout() {
    if !python_available() {
        return;
    }
    let code = "print(__file__, flush=True)\nwhile True:\n    pass";
    let result = sandbox().execute(code, Duration::from_millis(1500));
    assert_eq!(
        result.error.as_deref(),
        Some("Execution timed out after 1.5 seconds")
    );
    let dir = script_dir(result.output.as_deref());
    assert!(!dir.exists(), "{} outlived the run", dir.display());
}

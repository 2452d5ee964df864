//! Running child processes with a deadline, cancellation and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often a waiting child is checked for cancellation.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// How long output readers may keep draining once the process group is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

type StreamResult = Result<(Vec<u8>, usize)>;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    /// Stdout as lossy UTF-8 plus a notice when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    /// Stderr as lossy UTF-8 plus a notice when bytes were dropped.
    pub fn stderr_text(&self) -> String {
        with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]"));
    }
    text
}

/// Run a command until it exits, the timeout passes, or `cancel` fires.
///
/// The child leads its own process group. Output is read concurrently while
/// it runs so a chatty child cannot block on a full pipe. `output_limit_bytes`
/// bounds what is kept per stream; the rest is drained and counted.
///
/// Once the child has exited or been stopped, the whole group is killed so
/// background descendants neither outlive the call nor hold the pipes open.
/// Readers get [`READER_GRACE`] to finish after that; whatever they have not
/// delivered by then is dropped. `elapsed` covers the whole call.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs_f64(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: Option<&CancelToken>,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            timed_out = true;
        } else if cancel.is_some_and(CancelToken::is_cancelled) {
            cancelled = true;
        } else {
            let slice = if cancel.is_some() {
                remaining.min(POLL_SLICE)
            } else {
                remaining
            };
            match child.wait_timeout(slice).context("wait for command")? {
                Some(status) => break status,
                None => continue,
            }
        }

        warn!(
            timeout_secs = timeout.as_secs_f64(),
            timed_out, cancelled, "stopping command, killing process group"
        );
        kill_process_group(&mut child).context("kill command")?;
        break child.wait().context("wait command after kill")?;
    };

    // Sweep descendants left running by a child that exited on its own.
    if !timed_out
        && !cancelled
        && let Err(err) = kill_process_group(&mut child)
    {
        warn!(err = %format!("{err:#}"), "failed to reap process group");
    }

    let (stdout, stdout_truncated) = collect_output(&stdout_rx, "stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, "stderr")?;
    let elapsed = started.elapsed();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, elapsed_ms = elapsed.as_millis(), "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
        elapsed,
    })
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL every process in the child's group. A group that is already empty
/// is not an error.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(err).context("signal process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) -> Result<()> {
    match child.kill() {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
        Err(err) => Err(err).context("kill child"),
    }
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver may have given up waiting; nothing to report then.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn collect_output(rx: &Receiver<StreamResult>, label: &str) -> StreamResult {
    match rx.recv_timeout(READER_GRACE) {
        Ok(result) => result.with_context(|| format!("read {label}")),
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream = label, "output pipe still held open, abandoning reader");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{label} reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

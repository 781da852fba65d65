//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;

/// How often a waiting child is checked for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output readers may keep running once the child is gone.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

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
}

impl CommandOutput {
    pub fn stderr_excerpt(&self, max_bytes: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let trimmed = text.trim();
        if trimmed.len() <= max_bytes {
            return trimmed.to_string();
        }
        let mut cut = max_bytes;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Stdin is written and output is read on helper threads while the child runs.
/// `output_limit_bytes` bounds the amount of stdout/stderr stored in memory
/// (bytes beyond this are discarded while still draining the pipe).
///
/// On unix the child leads its own process group. The whole group is killed
/// when `timeout` elapses or `cancel` fires, and any stragglers are killed once
/// the child itself has exited. Output still open after [`OUTPUT_GRACE`] is
/// dropped, so helpers that escaped the group cannot hold the call open.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancelToken,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    own_process_group(&mut cmd);

    debug!("spawning child process");
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

    if let Some(input) = stdin {
        let child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        spawn_writer(child_stdin, input.to_vec());
    }

    let (status, timed_out, cancelled) = wait_with_deadline(&mut child, timeout, cancel)?;
    kill_process_group(&child);

    let (stdout, stdout_truncated) = collect_output(&stdout_rx, "stdout").context("join stdout")?;
    let (stderr, stderr_truncated) = collect_output(&stderr_rx, "stderr").context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(ExitStatus, bool, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            warn!("command cancelled, killing");
            let status = kill_and_wait(child)?;
            return Ok((status, false, true));
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            let status = kill_and_wait(child)?;
            return Ok((status, true, false));
        }
        let slice = remaining.min(CANCEL_POLL_INTERVAL);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            return Ok((status, false, false));
        }
    }
}

fn kill_and_wait(child: &mut Child) -> Result<ExitStatus> {
    kill_process_group(child);
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// SIGKILL every process left in the child's group.
#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_process_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg takes plain integers. The group id is the child's pid,
    // which leads its own group through `process_group(0)`.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(err = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the caller stopped waiting for this stream.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

fn spawn_writer<W: Write + Send + 'static>(mut writer: W, input: Vec<u8>) {
    thread::spawn(move || {
        // A child that exits without reading stdin closes the pipe; that is not our failure.
        if let Err(e) = writer.write_all(&input) {
            warn!(err = %e, "child closed stdin early");
        }
    });
}

fn collect_output(rx: &Receiver<StreamResult>, stream: &str) -> StreamResult {
    match rx.recv_timeout(OUTPUT_GRACE) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still held open after the child exited, dropping output");
            Ok((Vec::new(), 0))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
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

// src/sandbox/stream.rs

//! Streaming child process runner
//!
//! Runs a command with both output pipes read by their own thread. Lines
//! arrive over a channel, are handed to the caller as they come and are
//! kept for the failure log. Between lines the loop polls the cancellation
//! token; on cancellation the child's whole process group is terminated.

use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Time allowed for pipes to drain after the child exits
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Time allowed between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_secs(5);

/// Exit code and combined output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

fn forward_lines<R: Read + Send + 'static>(pipe: R, tx: Sender<String>) {
    thread::spawn(move || {
        let reader = BufReader::new(pipe);
        for line in reader.lines().map_while(std::result::Result::ok) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Signal the child's process group
fn signal_group(child: &Child, signal: Signal) {
    if let Ok(raw) = i32::try_from(child.id()) {
        if let Err(e) = killpg(Pid::from_raw(raw), signal) {
            debug!("killpg({}, {:?}) failed: {}", raw, signal, e);
        }
    }
}

/// SIGTERM the process group, then SIGKILL if it lingers
fn terminate(child: &mut Child) {
    signal_group(child, Signal::SIGTERM);

    match child.wait_timeout(TERM_GRACE) {
        Ok(Some(_)) => return,
        Ok(None) => warn!("Child {} ignored SIGTERM, killing", child.id()),
        Err(e) => warn!("Waiting for child {} failed: {}", child.id(), e),
    }

    signal_group(child, Signal::SIGKILL);
    if let Err(e) = child.kill() {
        warn!("Failed to kill child {}: {}", child.id(), e);
    }
    if let Err(e) = child.wait() {
        warn!("Failed to reap child {}: {}", child.id(), e);
    }
}

/// Run `cmd`, passing each output line to `on_line`
///
/// Returns `Err(Cancelled)` if the token fires before the command ends.
/// A non-zero exit is not an error here; callers inspect the exit code.
pub fn run_streaming(
    mut cmd: Command,
    cancel: &CancellationToken,
    on_line: &mut dyn FnMut(&str),
) -> Result<CommandOutput> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ToolNotFound(program.clone())
        } else {
            Error::CommandFailed(format!("Failed to spawn {}: {}", program, e))
        }
    })?;

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        forward_lines(stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(stderr, tx.clone());
    }
    drop(tx);

    let mut output = String::new();
    let mut exited: Option<(ExitStatus, Instant)> = None;

    loop {
        if cancel.is_cancelled() {
            warn!("Cancelling {}", program);
            terminate(&mut child);
            return Err(Error::Cancelled);
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                on_line(&line);
                output.push_str(&line);
                output.push('\n');
            }
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => match exited {
                // Background processes may hold the pipes open
                Some((_, at)) if at.elapsed() > DRAIN_GRACE => break,
                Some(_) => {}
                None => {
                    if let Some(status) = child.try_wait()? {
                        exited = Some((status, Instant::now()));
                    }
                }
            },
        }
    }

    let status = match exited {
        Some((status, _)) => status,
        None => child.wait()?,
    };

    Ok(CommandOutput {
        exit_code: exit_code(status),
        output,
    })
}

/// Run a short command to completion, capturing output without streaming
pub fn run_quiet(cmd: Command, cancel: &CancellationToken) -> Result<CommandOutput> {
    run_streaming(cmd, cancel, &mut |line: &str| debug!("{}", line))
}

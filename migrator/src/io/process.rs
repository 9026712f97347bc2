//! Child process plumbing for long-lived interactive backends.
//!
//! stdout and stderr are each drained by a reader thread into one channel, so
//! diagnostics and protocol text arrive as a single line stream and the pipes
//! never fill up and block the child.

use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, instrument, trace};
use wait_timeout::ChildExt;

enum StreamEvent {
    Line(String),
    Closed,
}

/// Result of waiting for the next output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    Line(String),
    /// Nothing arrived within the wait.
    Idle,
    /// Both output streams reached EOF.
    Closed,
}

/// A spawned child with piped stdin and merged, line-buffered output.
pub struct InteractiveChild {
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<StreamEvent>,
    open_streams: usize,
}

impl std::fmt::Debug for InteractiveChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveChild")
            .field("pid", &self.child.id())
            .field("open_streams", &self.open_streams)
            .finish()
    }
}

/// Spawn `program args..` with stdin piped and stdout/stderr merged.
#[instrument(skip_all, fields(program = %program))]
pub fn spawn_interactive(program: &str, args: &[&str]) -> std::io::Result<InteractiveChild> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!("spawning interactive child");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e);
        }
    };

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| std::io::Error::other("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("stderr was not piped"))?;

    let (tx, rx) = mpsc::channel();
    let stderr_tx = tx.clone();
    thread::spawn(move || pump_lines(stdout, tx, "stdout"));
    thread::spawn(move || pump_lines(stderr, stderr_tx, "stderr"));

    Ok(InteractiveChild {
        child,
        stdin: Some(stdin),
        events: rx,
        open_streams: 2,
    })
}

impl InteractiveChild {
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Write `line` plus a newline and flush. The write completes before
    /// this returns.
    pub fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(line.as_bytes())?;
        stdin.write_all(b"\n")?;
        stdin.flush()
    }

    /// Drop our end of stdin so the child sees EOF.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Block for at most `wait` until the next merged output line.
    pub fn poll_line(&mut self, wait: Duration) -> Poll {
        loop {
            if self.open_streams == 0 {
                return Poll::Closed;
            }
            match self.events.recv_timeout(wait) {
                Ok(StreamEvent::Line(line)) => return Poll::Line(line),
                Ok(StreamEvent::Closed) => self.open_streams -= 1,
                Err(RecvTimeoutError::Timeout) => return Poll::Idle,
                Err(RecvTimeoutError::Disconnected) => {
                    self.open_streams = 0;
                    return Poll::Closed;
                }
            }
        }
    }

    /// Non-blocking exit check.
    pub fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait up to `timeout` for the child to exit.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
        self.child.wait_timeout(timeout)
    }

    /// Kill the child (if still running) and reap it.
    pub fn kill(&mut self) -> std::io::Result<ExitStatus> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }
        self.child.kill()?;
        self.child.wait()
    }
}

fn pump_lines<R: Read>(reader: R, tx: Sender<StreamEvent>, stream: &'static str) {
    let mut buf_reader = BufReader::new(reader);
    loop {
        let mut line = Vec::new();
        match buf_reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                trace!(stream, line = %text, "child output");
                if tx.send(StreamEvent::Line(text)).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(stream, err = %e, "stopped reading child output");
                break;
            }
        }
    }
    // Receiver may already be gone when the session was dropped.
    let _ = tx.send(StreamEvent::Closed);
}

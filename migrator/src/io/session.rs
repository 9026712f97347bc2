//! Line-oriented protocol adapter for an interactive shell backend.
//!
//! The backend offers no message framing. A session launches it with the
//! connection string, waits for the backend's ready banner, then feeds it one
//! command at a time and classifies the lines that come back:
//!
//! ```text
//! NotStarted -> Launching -> AwaitingReady -> Ready <-> Busy
//!                                  \            \        \
//!                                   +------------+--------+--> Terminated
//! ```
//!
//! Two response classifiers exist. [`SuccessDetection::Sentinel`] treats the
//! first line as the verdict (`true` means success) and drains whatever
//! follows a failure; background output that lands first is misread as an
//! error. [`SuccessDetection::Correlated`] follows every command with an echo
//! of a unique token and collects everything up to the echo, so stray lines
//! cannot be mistaken for the verdict.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::core::backend::{BackendSpec, EXIT_COMMAND, SUCCESS_SENTINEL, echo_command};
use crate::error::EngineError;
use crate::io::process::{InteractiveChild, Poll, spawn_interactive};

/// Lifecycle of one backend process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Launching,
    AwaitingReady,
    Ready,
    Busy,
    Terminated,
}

/// How a command's response is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuccessDetection {
    /// First line must be the success sentinel.
    Sentinel,
    /// Lines up to an echoed per-command token must include the success
    /// sentinel.
    #[default]
    Correlated,
}

/// Timing and classification knobs for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// `None` waits for the ready banner indefinitely.
    pub ready_timeout: Option<Duration>,
    /// `None` waits for a command response indefinitely.
    pub command_timeout: Option<Duration>,
    /// Upper bound on each blocking wait for output.
    pub poll_interval: Duration,
    /// Quiet period that ends error-output draining.
    pub drain_window: Duration,
    /// How long to wait for the backend to exit after `exit`.
    pub shutdown_timeout: Duration,
    pub success_detection: SuccessDetection,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ready_timeout: Some(Duration::from_secs(60)),
            command_timeout: None,
            poll_interval: Duration::from_millis(50),
            drain_window: Duration::from_millis(100),
            shutdown_timeout: Duration::from_secs(10),
            success_detection: SuccessDetection::default(),
        }
    }
}

/// One backend process, exclusively owned by its caller.
#[derive(Debug)]
pub struct ShellSession {
    spec: BackendSpec,
    options: SessionOptions,
    state: SessionState,
    child: Option<InteractiveChild>,
    next_token: u64,
}

impl ShellSession {
    pub fn new(spec: BackendSpec, options: SessionOptions) -> Self {
        Self {
            spec,
            options,
            state: SessionState::NotStarted,
            child: None,
            next_token: 0,
        }
    }

    /// Spawn the backend and complete the ready handshake.
    pub fn open(
        spec: BackendSpec,
        options: SessionOptions,
        connection: &str,
    ) -> Result<Self, EngineError> {
        let mut session = Self::new(spec, options);
        session.launch(connection)?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    #[instrument(skip_all, fields(binary = %self.spec.binary))]
    pub fn launch(&mut self, connection: &str) -> Result<(), EngineError> {
        if self.state != SessionState::NotStarted {
            return Err(EngineError::Launch(format!(
                "session already launched (state {:?})",
                self.state
            )));
        }
        self.state = SessionState::Launching;
        let child = spawn_interactive(&self.spec.binary, &[connection]).map_err(|err| {
            self.state = SessionState::Terminated;
            EngineError::Launch(format!("spawn {}: {err}", self.spec.binary))
        })?;
        debug!(pid = child.id(), "backend spawned");
        self.child = Some(child);
        self.state = SessionState::AwaitingReady;
        self.await_ready()
    }

    fn await_ready(&mut self) -> Result<(), EngineError> {
        let deadline = self.options.ready_timeout.map(|t| Instant::now() + t);
        loop {
            let Some(child) = self.child.as_mut() else {
                return Err(self.fail_launch("backend process missing"));
            };
            match child.poll_line(self.options.poll_interval) {
                Poll::Line(line) => {
                    info!(line = %line, "backend");
                    if line.contains(&self.spec.ready_sentinel) {
                        self.state = SessionState::Ready;
                        debug!("backend ready");
                        return Ok(());
                    }
                }
                Poll::Idle => {
                    if let Ok(Some(status)) = child.try_exit_status() {
                        return Err(self.fail_launch(&format!(
                            "backend exited with {status} before it was ready"
                        )));
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        return Err(self.fail_launch("timed out waiting for ready banner"));
                    }
                }
                Poll::Closed => {
                    return Err(self.fail_launch("backend closed its output before it was ready"));
                }
            }
        }
    }

    fn fail_launch(&mut self, reason: &str) -> EngineError {
        let status = self.terminate();
        error!(reason, status = ?status, "backend startup failed");
        EngineError::Launch(format!("{} startup failed: {reason}", self.spec.binary))
    }

    /// Send one command and wait for the backend's verdict.
    #[instrument(skip_all, fields(command = %command))]
    pub fn submit(&mut self, command: &str) -> Result<(), EngineError> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Terminated => {
                return Err(EngineError::Protocol(
                    "command submitted to a terminated session".to_string(),
                ));
            }
            other => {
                return Err(EngineError::Protocol(format!(
                    "command submitted while session is {other:?}"
                )));
            }
        }

        let deadline = self.options.command_timeout.map(|t| Instant::now() + t);
        match self.options.success_detection {
            SuccessDetection::Sentinel => {
                self.send(&[command.to_string()])?;
                self.await_first_line_verdict(command, deadline)
            }
            SuccessDetection::Correlated => {
                let token = self.take_token();
                self.send(&[command.to_string(), echo_command(&token)])?;
                self.await_correlated_verdict(command, &token, deadline)
            }
        }
    }

    fn send(&mut self, lines: &[String]) -> Result<(), EngineError> {
        let Some(child) = self.child.as_mut() else {
            self.state = SessionState::Terminated;
            return Err(EngineError::Protocol("backend process missing".to_string()));
        };
        self.state = SessionState::Busy;
        for line in lines {
            debug!(line = %line, "sending command");
            if let Err(err) = child.write_line(line) {
                let status = self.terminate();
                return Err(EngineError::Protocol(format!(
                    "write to backend failed ({err}); backend status {status:?}"
                )));
            }
        }
        Ok(())
    }

    fn await_first_line_verdict(
        &mut self,
        command: &str,
        deadline: Option<Instant>,
    ) -> Result<(), EngineError> {
        let first = self.next_line(deadline)?;
        if first.trim() == SUCCESS_SENTINEL {
            self.state = SessionState::Ready;
            return Ok(());
        }

        error!(line = %first, "backend");
        let mut lines = vec![first];
        lines.extend(self.drain());
        if self.backend_exited() {
            let status = self.terminate();
            return Err(EngineError::Protocol(format!(
                "backend exited while a command was running (status {status:?}): {}",
                lines.join(" | ")
            )));
        }
        self.state = SessionState::Ready;
        Err(EngineError::Command {
            command: command.to_string(),
            lines,
        })
    }

    fn await_correlated_verdict(
        &mut self,
        command: &str,
        token: &str,
        deadline: Option<Instant>,
    ) -> Result<(), EngineError> {
        let mut succeeded = false;
        let mut lines = Vec::new();
        loop {
            let line = self.next_line(deadline)?;
            let trimmed = line.trim();
            if trimmed.ends_with(token) {
                break;
            }
            if !succeeded && trimmed == SUCCESS_SENTINEL {
                succeeded = true;
                continue;
            }
            lines.push(line);
        }
        self.state = SessionState::Ready;

        if succeeded {
            for line in &lines {
                debug!(line = %line, "backend");
            }
            return Ok(());
        }
        for line in &lines {
            error!(line = %line, "backend");
        }
        Err(EngineError::Command {
            command: command.to_string(),
            lines,
        })
    }

    /// Next output line, failing if the backend dies or the deadline passes.
    fn next_line(&mut self, deadline: Option<Instant>) -> Result<String, EngineError> {
        loop {
            let Some(child) = self.child.as_mut() else {
                self.state = SessionState::Terminated;
                return Err(EngineError::Protocol("backend process missing".to_string()));
            };
            match child.poll_line(self.options.poll_interval) {
                Poll::Line(line) => return Ok(line),
                Poll::Idle => {
                    if let Ok(Some(status)) = child.try_exit_status() {
                        self.terminate();
                        return Err(EngineError::Protocol(format!(
                            "backend exited with {status} while a command was running"
                        )));
                    }
                    if deadline.is_some_and(|d| Instant::now() >= d) {
                        warn!("backend response timed out, killing");
                        self.terminate();
                        return Err(EngineError::Protocol(
                            "timed out waiting for backend response".to_string(),
                        ));
                    }
                }
                Poll::Closed => {
                    let status = self.terminate();
                    return Err(EngineError::Protocol(format!(
                        "backend closed its output while a command was running (status {status:?})"
                    )));
                }
            }
        }
    }

    /// Collect lines until the backend stays quiet for one drain window.
    fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let Some(child) = self.child.as_mut() else {
                return lines;
            };
            match child.poll_line(self.options.drain_window) {
                Poll::Line(line) => {
                    error!(line = %line, "backend");
                    lines.push(line);
                }
                Poll::Idle => return lines,
                Poll::Closed => {
                    self.terminate();
                    return lines;
                }
            }
        }
    }

    /// True once the backend is gone, whether drained to EOF or exited.
    fn backend_exited(&mut self) -> bool {
        if self.state == SessionState::Terminated {
            return true;
        }
        match self.child.as_mut() {
            Some(child) => matches!(child.try_exit_status(), Ok(Some(_))),
            None => true,
        }
    }

    fn take_token(&mut self) -> String {
        self.next_token += 1;
        format!("__migrator_ack_{}_{}__", std::process::id(), self.next_token)
    }

    /// Ask the backend to exit, killing it if it does not within the
    /// shutdown timeout. Idempotent.
    #[instrument(skip_all, fields(binary = %self.spec.binary))]
    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        let Some(mut child) = self.child.take() else {
            self.state = SessionState::Terminated;
            return Ok(());
        };
        self.state = SessionState::Terminated;

        if let Err(err) = child.write_line(EXIT_COMMAND) {
            debug!(err = %err, "backend stdin already closed");
        }
        child.close_stdin();

        match child.wait_for_exit(self.options.shutdown_timeout) {
            Ok(Some(status)) => {
                debug!(status = %status, "backend exited");
                Ok(())
            }
            Ok(None) => {
                warn!(
                    timeout_secs = self.options.shutdown_timeout.as_secs(),
                    "backend did not exit, killing"
                );
                child
                    .kill()
                    .map(|_| ())
                    .map_err(|err| EngineError::Protocol(format!("kill backend: {err}")))
            }
            Err(err) => Err(EngineError::Protocol(format!("wait for backend exit: {err}"))),
        }
    }

    /// Kill and reap the backend without ceremony.
    fn terminate(&mut self) -> Option<std::process::ExitStatus> {
        self.state = SessionState::Terminated;
        let mut child = self.child.take()?;
        child.close_stdin();
        match child.kill() {
            Ok(status) => Some(status),
            Err(err) => {
                warn!(err = %err, "failed to kill backend");
                None
            }
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.child.is_some()
            && let Err(err) = self.shutdown()
        {
            warn!(err = %err, "backend shutdown on drop failed");
        }
    }
}

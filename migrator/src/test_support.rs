//! Test-only fakes and builders for changesets, ledgers and executors.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::core::backend::load_command;
use crate::core::types::{Changeset, ChangesetId, ExecutionRecord, ScriptCommand};
use crate::error::EngineError;
use crate::io::executor::{ExecutorFactory, ScriptExecutor};
use crate::io::ledger::ExecutionLedger;

/// Script body marker that makes scripted executors report a failure.
pub const FAIL_MARKER: &str = "FAIL";

/// Create a deterministic changeset with one command and default flags.
pub fn changeset(author: &str, change_id: &str) -> Changeset {
    Changeset {
        id: ChangesetId::new(author, change_id),
        commands: vec![ScriptCommand::new(format!("// {author}:{change_id}"))],
        contexts: Default::default(),
        run_always: false,
        fail_on_error: true,
        source_label: "changelog.toml".to_string(),
    }
}

pub fn with_contexts(mut changeset: Changeset, contexts: &[&str]) -> Changeset {
    changeset.contexts = contexts.iter().map(|c| c.to_string()).collect();
    changeset
}

pub fn with_scripts(mut changeset: Changeset, bodies: &[&str]) -> Changeset {
    changeset.commands = bodies.iter().map(|b| ScriptCommand::new(*b)).collect();
    changeset
}

/// A changeset whose only command fails under scripted executors.
pub fn failing(author: &str, change_id: &str, fail_on_error: bool) -> Changeset {
    let mut cs = with_scripts(changeset(author, change_id), &[FAIL_MARKER]);
    cs.fail_on_error = fail_on_error;
    cs
}

/// In-memory append-only ledger.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Vec<ExecutionRecord>,
}

impl MemoryLedger {
    pub fn records(&self) -> &[ExecutionRecord] {
        &self.records
    }

    pub fn count_for(&self, id: &ChangesetId) -> usize {
        self.records.iter().filter(|r| r.id() == *id).count()
    }
}

impl ExecutionLedger for MemoryLedger {
    fn was_executed(&self, id: &ChangesetId) -> Result<bool, EngineError> {
        Ok(self.records.iter().any(|r| r.id() == *id))
    }

    fn record(&mut self, record: &ExecutionRecord) -> Result<(), EngineError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Predetermined result for one `run_script` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptVerdict {
    Success,
    /// Backend reports an error line.
    Failure(String),
    /// Backend process dies.
    Died,
}

#[derive(Debug, Default)]
struct ScriptedState {
    verdicts: VecDeque<ScriptVerdict>,
    opened: usize,
    shutdowns: usize,
    bodies: Vec<String>,
    paths: Vec<PathBuf>,
}

/// Factory for executors that never spawn a process.
///
/// Queued verdicts are consumed first. Once the queue is empty, a script fails
/// if its body contains [`FAIL_MARKER`] and succeeds otherwise.
#[derive(Debug, Default)]
pub struct ScriptedExecutorFactory {
    state: Rc<RefCell<ScriptedState>>,
    fail_launch: bool,
}

impl ScriptedExecutorFactory {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with_verdicts(verdicts: Vec<ScriptVerdict>) -> Self {
        let factory = Self::default();
        factory.state.borrow_mut().verdicts = verdicts.into();
        factory
    }

    pub fn failing_launch() -> Self {
        Self {
            fail_launch: true,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.state.borrow().opened
    }

    pub fn shutdowns(&self) -> usize {
        self.state.borrow().shutdowns
    }

    /// Script bodies as read from the staged files, in run order.
    pub fn scripts_run(&self) -> Vec<String> {
        self.state.borrow().bodies.clone()
    }

    /// Staged file paths handed to the executor, in run order.
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.state.borrow().paths.clone()
    }
}

impl ExecutorFactory for ScriptedExecutorFactory {
    type Executor = ScriptedExecutor;

    fn open(&self) -> Result<ScriptedExecutor, EngineError> {
        if self.fail_launch {
            return Err(EngineError::Launch("scripted launch failure".to_string()));
        }
        self.state.borrow_mut().opened += 1;
        Ok(ScriptedExecutor {
            state: Rc::clone(&self.state),
            terminated: false,
        })
    }
}

#[derive(Debug)]
pub struct ScriptedExecutor {
    state: Rc<RefCell<ScriptedState>>,
    terminated: bool,
}

impl ScriptExecutor for ScriptedExecutor {
    fn run_script(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.terminated {
            return Err(EngineError::Protocol(
                "command submitted to a terminated session".to_string(),
            ));
        }
        let body = fs::read_to_string(path)
            .map_err(|err| EngineError::Protocol(format!("staged file unreadable: {err}")))?;

        let mut state = self.state.borrow_mut();
        state.paths.push(path.to_path_buf());
        state.bodies.push(body.clone());
        let verdict = state.verdicts.pop_front().unwrap_or_else(|| {
            if body.contains(FAIL_MARKER) {
                ScriptVerdict::Failure(format!("uncaught exception in {body}"))
            } else {
                ScriptVerdict::Success
            }
        });

        match verdict {
            ScriptVerdict::Success => Ok(()),
            ScriptVerdict::Failure(line) => Err(EngineError::Command {
                command: load_command(&path.to_string_lossy()),
                lines: vec![line],
            }),
            ScriptVerdict::Died => {
                self.terminated = true;
                Err(EngineError::Protocol(
                    "backend exited while a command was running".to_string(),
                ))
            }
        }
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        self.terminated = true;
        self.state.borrow_mut().shutdowns += 1;
        Ok(())
    }
}

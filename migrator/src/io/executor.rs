//! Script executor abstraction.
//!
//! The [`ScriptExecutor`] trait decouples the apply loop from the actual
//! backend (an interactive shell session). Tests use scripted executors that
//! return predetermined verdicts without spawning processes.

use std::path::Path;

use tracing::instrument;

use crate::core::backend::{BackendSpec, load_command};
use crate::error::EngineError;
use crate::io::session::{SessionOptions, ShellSession};

/// Runs staged script files against the target store.
pub trait ScriptExecutor {
    /// Evaluate the script at `path`. `Command` errors are policy-gated by
    /// the caller; anything else is fatal.
    fn run_script(&mut self, path: &Path) -> Result<(), EngineError>;

    /// Release the backend. Called once when the run ends.
    fn shutdown(&mut self) -> Result<(), EngineError>;
}

/// Opens executors on demand so that runs with nothing to do never launch a
/// backend.
pub trait ExecutorFactory {
    type Executor: ScriptExecutor;

    fn open(&self) -> Result<Self::Executor, EngineError>;
}

impl ScriptExecutor for ShellSession {
    fn run_script(&mut self, path: &Path) -> Result<(), EngineError> {
        self.submit(&load_command(&path.to_string_lossy()))
    }

    fn shutdown(&mut self) -> Result<(), EngineError> {
        ShellSession::shutdown(self)
    }
}

/// Launches a [`ShellSession`] against one connection string.
#[derive(Debug, Clone)]
pub struct ShellSessionFactory {
    pub spec: BackendSpec,
    pub options: SessionOptions,
    pub connection: String,
}

impl ExecutorFactory for ShellSessionFactory {
    type Executor = ShellSession;

    #[instrument(skip_all, fields(binary = %self.spec.binary))]
    fn open(&self) -> Result<ShellSession, EngineError> {
        ShellSession::open(self.spec.clone(), self.options.clone(), &self.connection)
    }
}

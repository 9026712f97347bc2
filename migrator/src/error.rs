//! Typed failures surfaced by the changeset engine.
//!
//! Only `Command` and `Staging` are gated by a changeset's `fail_on_error`
//! flag; every other variant aborts the run.

use thiserror::Error;

use crate::core::types::ChangesetId;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Backend binary missing, or it exited before emitting its ready banner.
    #[error("backend launch failed: {0}")]
    Launch(String),

    /// Backend died mid-session, timed out, or a command was sent to a
    /// terminated session.
    #[error("backend protocol failure: {0}")]
    Protocol(String),

    /// Backend reported a non-success result for a submitted command.
    #[error("command `{command}` failed: {}", lines.join(" | "))]
    Command { command: String, lines: Vec<String> },

    /// Script body could not be written to a staged file.
    #[error("staging script for {id} failed: {source}")]
    Staging {
        id: ChangesetId,
        #[source]
        source: std::io::Error,
    },

    /// Changelog is structurally invalid or declares duplicate identities.
    #[error("changelog validation failed:\n- {}", .0.join("\n- "))]
    Validation(Vec<String>),

    /// Changelog could not be read or parsed.
    #[error("changelog source error: {0:#}")]
    Source(anyhow::Error),

    /// Ledger store could not be read or appended to.
    #[error("ledger error: {0:#}")]
    Ledger(anyhow::Error),
}

impl EngineError {
    /// True when the owning changeset's `fail_on_error` decides whether the
    /// run continues.
    pub fn is_policy_gated(&self) -> bool {
        matches!(self, Self::Command { .. } | Self::Staging { .. })
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }
}

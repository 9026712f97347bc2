//! Shared deterministic types for changeset execution.
//!
//! Changesets are produced once per run by a source and never mutated by the
//! runner afterwards.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a changeset: unique across the whole changelog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChangesetId {
    pub author: String,
    pub change_id: String,
}

impl ChangesetId {
    pub fn new(author: impl Into<String>, change_id: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            change_id: change_id.into(),
        }
    }
}

impl fmt::Display for ChangesetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author, self.change_id)
    }
}

/// Opaque script body executed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCommand {
    pub body: String,
}

impl ScriptCommand {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

/// One idempotent unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub id: ChangesetId,
    /// Executed in order within one changeset.
    pub commands: Vec<ScriptCommand>,
    /// Empty means the changeset applies in every context.
    pub contexts: BTreeSet<String>,
    pub run_always: bool,
    pub fail_on_error: bool,
    /// Changelog file the changeset was declared in; used for staging names
    /// and recorded in the ledger for audit.
    pub source_label: String,
}

/// Ledger entry written once per execution attempt that counts as executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub author: String,
    pub change_id: String,
    pub source: String,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn for_changeset(changeset: &Changeset, executed_at: DateTime<Utc>) -> Self {
        Self {
            author: changeset.id.author.clone(),
            change_id: changeset.id.change_id.clone(),
            source: changeset.source_label.clone(),
            executed_at,
        }
    }

    pub fn id(&self) -> ChangesetId {
        ChangesetId::new(&self.author, &self.change_id)
    }
}

/// Why the runner did not execute a changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Requested context does not match the changeset's contexts.
    Context,
    /// Ledger already holds a record and `run_always` is false.
    AlreadyExecuted,
}

/// Per-changeset result of one runner pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ChangesetOutcome {
    Executed,
    Skipped { reason: SkipReason },
    /// A command failed under `fail_on_error = false`; the changeset was still
    /// recorded in the ledger.
    FailedRecorded { error: String },
}

/// Summary of a completed runner pass, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub outcomes: Vec<(ChangesetId, ChangesetOutcome)>,
}

impl RunSummary {
    pub fn executed(&self) -> usize {
        self.count(|o| matches!(o, ChangesetOutcome::Executed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, ChangesetOutcome::Skipped { .. }))
    }

    pub fn failed_recorded(&self) -> usize {
        self.count(|o| matches!(o, ChangesetOutcome::FailedRecorded { .. }))
    }

    pub fn outcome_of(&self, id: &ChangesetId) -> Option<&ChangesetOutcome> {
        self.outcomes
            .iter()
            .find(|(candidate, _)| candidate == id)
            .map(|(_, outcome)| outcome)
    }

    fn count(&self, pred: impl Fn(&ChangesetOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

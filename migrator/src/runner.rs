//! The changeset apply loop.
//!
//! Changesets are applied strictly in source order. For each one the runner
//! checks context, consults the ledger, stages and runs every command through
//! one lazily opened executor, then records the outcome. The ledger is read
//! and written per changeset, never per command, so a crash between commands
//! can leave partial effects without a record.

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};

use crate::core::context::applies_in_context;
use crate::core::types::{
    Changeset, ChangesetOutcome, ExecutionRecord, RunSummary, SkipReason,
};
use crate::error::EngineError;
use crate::io::executor::{ExecutorFactory, ScriptExecutor};
use crate::io::ledger::ExecutionLedger;
use crate::io::staging::{StagingArea, name_hint};

/// Applies changesets against one ledger through executors from `factory`.
pub struct ChangesetRunner<'a, L, F> {
    ledger: &'a mut L,
    factory: &'a F,
    staging: &'a StagingArea,
}

impl<'a, L, F> ChangesetRunner<'a, L, F>
where
    L: ExecutionLedger,
    F: ExecutorFactory,
{
    pub fn new(ledger: &'a mut L, factory: &'a F, staging: &'a StagingArea) -> Self {
        Self {
            ledger,
            factory,
            staging,
        }
    }

    /// Apply `changesets` in order under `requested_context`.
    ///
    /// Returns the per-changeset outcomes, or the first fatal error. Records
    /// written before a fatal error stand.
    #[instrument(
        skip_all,
        fields(
            changesets = changesets.len(),
            context = ?requested_context,
            staging = %self.staging.dir().display()
        )
    )]
    pub fn execute(
        &mut self,
        changesets: &[Changeset],
        requested_context: Option<&str>,
    ) -> Result<RunSummary, EngineError> {
        let mut executor: Option<F::Executor> = None;
        let result = self.apply_all(changesets, requested_context, &mut executor);

        if let Some(mut executor) = executor
            && let Err(err) = executor.shutdown()
        {
            warn!(err = %err, "executor shutdown failed");
        }

        if let Ok(summary) = &result {
            info!(
                executed = summary.executed(),
                skipped = summary.skipped(),
                failed_recorded = summary.failed_recorded(),
                "run complete"
            );
        }
        result
    }

    fn apply_all(
        &mut self,
        changesets: &[Changeset],
        requested_context: Option<&str>,
        executor: &mut Option<F::Executor>,
    ) -> Result<RunSummary, EngineError> {
        let mut summary = RunSummary::default();

        for changeset in changesets {
            let id = &changeset.id;

            if !applies_in_context(changeset, requested_context) {
                info!(
                    author = %id.author,
                    change_id = %id.change_id,
                    context = ?requested_context,
                    "changeset not applicable in requested context"
                );
                summary.outcomes.push((
                    id.clone(),
                    ChangesetOutcome::Skipped {
                        reason: SkipReason::Context,
                    },
                ));
                continue;
            }

            if !changeset.run_always && self.ledger.was_executed(id)? {
                info!(author = %id.author, change_id = %id.change_id, "changeset already executed");
                summary.outcomes.push((
                    id.clone(),
                    ChangesetOutcome::Skipped {
                        reason: SkipReason::AlreadyExecuted,
                    },
                ));
                continue;
            }

            let outcome = match self.apply_changeset(changeset, executor) {
                Ok(()) => {
                    info!(author = %id.author, change_id = %id.change_id, "changeset executed");
                    ChangesetOutcome::Executed
                }
                Err(err) if err.is_policy_gated() && !changeset.fail_on_error => {
                    warn!(
                        author = %id.author,
                        change_id = %id.change_id,
                        err = %err,
                        "changeset failed but fail_on_error is false; recording it as executed"
                    );
                    ChangesetOutcome::FailedRecorded {
                        error: err.to_string(),
                    }
                }
                Err(err) => {
                    error!(
                        author = %id.author,
                        change_id = %id.change_id,
                        err = %err,
                        "changeset failed; aborting run"
                    );
                    return Err(err);
                }
            };

            self.ledger
                .record(&ExecutionRecord::for_changeset(changeset, Utc::now()))?;
            summary.outcomes.push((id.clone(), outcome));
        }

        Ok(summary)
    }

    /// Stage and run each command in order, stopping at the first failure.
    fn apply_changeset(
        &self,
        changeset: &Changeset,
        executor: &mut Option<F::Executor>,
    ) -> Result<(), EngineError> {
        let hint = name_hint(&changeset.source_label, &changeset.id.change_id);

        for (idx, command) in changeset.commands.iter().enumerate() {
            if executor.is_none() {
                *executor = Some(self.factory.open()?);
            }
            let Some(exec) = executor.as_mut() else {
                return Err(EngineError::Protocol("executor unavailable".to_string()));
            };

            let staged = self
                .staging
                .stage(&command.body, &hint)
                .map_err(|source| EngineError::Staging {
                    id: changeset.id.clone(),
                    source,
                })?;
            debug!(command = idx, path = %staged.path().display(), "running staged script");
            let result = exec.run_script(staged.path());
            staged.release();
            result?;
        }
        Ok(())
    }
}

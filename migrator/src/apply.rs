//! Orchestration for `migrator apply` and `migrator verify`.
//!
//! Loads the changelog from a source, validates it as a whole, and only then
//! hands it to the runner, so an invalid changelog never launches a backend
//! or touches the ledger.

use tracing::{debug, instrument, trace};

use crate::core::invariants::ChangesetValidator;
use crate::core::types::{Changeset, RunSummary};
use crate::error::EngineError;
use crate::io::changelog::ChangesetSource;
use crate::io::executor::ExecutorFactory;
use crate::io::ledger::ExecutionLedger;
use crate::io::staging::StagingArea;
use crate::runner::ChangesetRunner;

/// Collaborators for one apply run.
pub struct ApplyPlan<'a, S, V, L, F> {
    pub source: &'a S,
    pub validator: &'a V,
    pub ledger: &'a mut L,
    pub factory: &'a F,
    pub staging: &'a StagingArea,
}

/// Load, validate, and apply every eligible changeset.
#[instrument(skip_all, fields(context = ?requested_context))]
pub fn apply_changelog<S, V, L, F>(
    plan: ApplyPlan<'_, S, V, L, F>,
    requested_context: Option<&str>,
) -> Result<RunSummary, EngineError>
where
    S: ChangesetSource,
    V: ChangesetValidator,
    L: ExecutionLedger,
    F: ExecutorFactory,
{
    let changesets = verify_changelog(plan.source, plan.validator)?;
    ChangesetRunner::new(plan.ledger, plan.factory, plan.staging)
        .execute(&changesets, requested_context)
}

/// Load and validate without executing anything.
pub fn verify_changelog<S, V>(source: &S, validator: &V) -> Result<Vec<Changeset>, EngineError>
where
    S: ChangesetSource,
    V: ChangesetValidator,
{
    let changesets = source.list_changesets()?;
    trace_changesets(&changesets);
    validator.validate(&changesets)?;
    debug!(count = changesets.len(), "changelog valid");
    Ok(changesets)
}

fn trace_changesets(changesets: &[Changeset]) {
    for changeset in changesets {
        trace!(
            author = %changeset.id.author,
            change_id = %changeset.id.change_id,
            source = %changeset.source_label,
            contexts = ?changeset.contexts,
            run_always = changeset.run_always,
            fail_on_error = changeset.fail_on_error,
            "changeset"
        );
        for command in &changeset.commands {
            trace!(body = %command.body, "script");
        }
    }
}

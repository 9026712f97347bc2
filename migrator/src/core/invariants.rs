//! Changelog invariants checked before anything executes.

use std::collections::HashMap;

use crate::core::types::{Changeset, ChangesetId};
use crate::error::EngineError;

/// Pre-execution check over the ordered changeset list.
pub trait ChangesetValidator {
    fn validate(&self, changesets: &[Changeset]) -> Result<(), EngineError>;
}

/// Rejects duplicate `(author, change_id)` pairs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultChangesetValidator;

impl ChangesetValidator for DefaultChangesetValidator {
    fn validate(&self, changesets: &[Changeset]) -> Result<(), EngineError> {
        let errors = validate_invariants(changesets);
        if errors.is_empty() {
            return Ok(());
        }
        Err(EngineError::Validation(errors))
    }
}

/// Check changelog invariants:
/// - No duplicate `(author, change_id)` identity
/// - Non-empty author and change id
///
/// Duplicates are reported once per extra occurrence, naming both sources.
pub fn validate_invariants(changesets: &[Changeset]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen: HashMap<&ChangesetId, &str> = HashMap::new();

    for changeset in changesets {
        if changeset.id.author.trim().is_empty() {
            errors.push(format!(
                "{}: changeset '{}' has an empty author",
                changeset.source_label, changeset.id.change_id
            ));
        }
        if changeset.id.change_id.trim().is_empty() {
            errors.push(format!(
                "{}: changeset by '{}' has an empty id",
                changeset.source_label, changeset.id.author
            ));
        }
        if let Some(first) = seen.insert(&changeset.id, &changeset.source_label) {
            errors.push(format!(
                "duplicate changeset {} in {} (first declared in {})",
                changeset.id, changeset.source_label, first
            ));
        }
    }

    errors
}

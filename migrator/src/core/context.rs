//! Context gating for changesets.

use crate::core::types::Changeset;

/// True if `changeset` may run under `requested`.
///
/// Unconstrained changesets always apply. Constrained ones apply only when a
/// non-empty requested context is one of their labels.
pub fn applies_in_context(changeset: &Changeset, requested: Option<&str>) -> bool {
    if changeset.contexts.is_empty() {
        return true;
    }
    match requested.map(str::trim) {
        Some(label) if !label.is_empty() => changeset.contexts.contains(label),
        _ => false,
    }
}

//! Stable exit codes for migrator CLI commands.

/// Command succeeded (including runs that recorded fail-soft failures).
pub const OK: i32 = 0;
/// Invalid input: config, changelog, or changeset validation errors.
pub const INVALID: i32 = 1;
/// Run aborted by a fatal engine error (launch, protocol, fail-fast command).
pub const FAILED: i32 = 2;

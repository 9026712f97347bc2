//! Versioned changeset runner driving an interactive shell backend.
//!
//! Changesets are idempotent, ordered units of script work identified by
//! `(author, change_id)`. The engine applies each eligible changeset once,
//! tracking executions in a ledger so repeated runs are safe. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (types, context gating,
//!   changelog invariants, backend variants). No I/O.
//! - **[`io`]**: Side-effecting operations (config, changelog files, ledger,
//!   script staging, the interactive backend session).
//!
//! Orchestration modules ([`runner`], [`apply`]) coordinate core logic with
//! I/O to implement CLI commands.

pub mod apply;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod runner;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

//! I/O adapters for the engine.

pub mod changelog;
pub mod config;
pub mod executor;
pub mod ledger;
pub mod process;
pub mod session;
pub mod staging;

//! Execution ledger: which changesets have already run.
//!
//! The runner only needs two operations, so the persisted store sits behind
//! [`ExecutionLedger`]. [`JsonlLedger`] keeps one JSON record per line in an
//! append-only file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::{ChangesetId, ExecutionRecord};
use crate::error::EngineError;

/// Read/append contract for execution bookkeeping.
pub trait ExecutionLedger {
    fn was_executed(&self, id: &ChangesetId) -> Result<bool, EngineError>;

    /// Append one record. Never updates or removes existing records.
    fn record(&mut self, record: &ExecutionRecord) -> Result<(), EngineError>;
}

/// Append-only JSON-lines ledger file. A missing file is an empty ledger.
#[derive(Debug, Clone)]
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records in append order.
    pub fn records(&self) -> Result<Vec<ExecutionRecord>> {
        load_records(&self.path)
    }
}

impl ExecutionLedger for JsonlLedger {
    fn was_executed(&self, id: &ChangesetId) -> Result<bool, EngineError> {
        let records = load_records(&self.path).map_err(EngineError::Ledger)?;
        Ok(records.iter().any(|record| record.id() == *id))
    }

    fn record(&mut self, record: &ExecutionRecord) -> Result<(), EngineError> {
        append_record(&self.path, record).map_err(EngineError::Ledger)
    }
}

fn load_records(path: &Path) -> Result<Vec<ExecutionRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read ledger {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse ledger {} line {}", path.display(), idx + 1))
        })
        .collect()
}

fn append_record(path: &Path, record: &ExecutionRecord) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create ledger dir {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize ledger record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open ledger {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append ledger {}", path.display()))?;
    file.sync_data()
        .with_context(|| format!("sync ledger {}", path.display()))?;
    debug!(
        path = %path.display(),
        author = %record.author,
        change_id = %record.change_id,
        "ledger record appended"
    );
    Ok(())
}

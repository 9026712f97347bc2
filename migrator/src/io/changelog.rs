//! TOML changelog source.
//!
//! A changelog file holds `[[changeset]]` tables and may pull in other files
//! through `include`. Changesets declared in a file come first, followed by
//! the included files in listing order (recursively). A file that declares
//! neither key is rejected; `changeset = []` is a valid, empty changelog.
//!
//! ```toml
//! include = ["users.toml"]
//!
//! [[changeset]]
//! author = "mlysaght"
//! id = "ChangeSet-1"
//! contexts = ["users"]
//! fail_on_error = false
//! scripts = ["db.organization.insertOne({ name: 'Acme' });"]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::types::{Changeset, ChangesetId, ScriptCommand};
use crate::error::EngineError;

/// Produces the ordered changeset list for one run.
pub trait ChangesetSource {
    fn list_changesets(&self) -> Result<Vec<Changeset>, EngineError>;
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangelogFile {
    include: Option<Vec<String>>,
    changeset: Option<Vec<ChangesetEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChangesetEntry {
    author: String,
    id: String,
    #[serde(default)]
    contexts: Vec<String>,
    #[serde(default)]
    run_always: bool,
    #[serde(default = "default_fail_on_error")]
    fail_on_error: bool,
    #[serde(default)]
    scripts: Vec<String>,
}

fn default_fail_on_error() -> bool {
    true
}

/// Reads changesets from a root changelog file and its includes.
#[derive(Debug, Clone)]
pub struct TomlChangelogSource {
    root: PathBuf,
}

impl TomlChangelogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ChangesetSource for TomlChangelogSource {
    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn list_changesets(&self) -> Result<Vec<Changeset>, EngineError> {
        let base = self
            .root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let mut changesets = Vec::new();
        let mut visiting = Vec::new();
        read_changelog(&self.root, &base, &mut visiting, &mut changesets)?;
        debug!(count = changesets.len(), "changelog loaded");
        Ok(changesets)
    }
}

fn read_changelog(
    path: &Path,
    base: &Path,
    visiting: &mut Vec<PathBuf>,
    out: &mut Vec<Changeset>,
) -> Result<(), EngineError> {
    let label = source_label(path, base);
    let canonical = fs::canonicalize(path)
        .with_context(|| format!("resolve changelog {}", path.display()))
        .map_err(EngineError::Source)?;
    if visiting.contains(&canonical) {
        return Err(EngineError::validation(format!(
            "{label}: include cycle detected"
        )));
    }

    let file = parse_file(path).map_err(EngineError::Source)?;
    if file.include.is_none() && file.changeset.is_none() {
        return Err(EngineError::validation(format!(
            "{label}: changelog declares no changesets"
        )));
    }

    for entry in file.changeset.unwrap_or_default() {
        out.push(entry.into_changeset(&label));
    }

    visiting.push(canonical);
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    for include in file.include.unwrap_or_default() {
        read_changelog(&dir.join(include), base, visiting, out)?;
    }
    visiting.pop();
    Ok(())
}

fn parse_file(path: &Path) -> Result<ChangelogFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read changelog {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse changelog {}", path.display()))
}

fn source_label(path: &Path, base: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

impl ChangesetEntry {
    fn into_changeset(self, label: &str) -> Changeset {
        let contexts: BTreeSet<String> = self
            .contexts
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Changeset {
            id: ChangesetId::new(self.author, self.id),
            commands: self.scripts.into_iter().map(ScriptCommand::new).collect(),
            contexts,
            run_always: self.run_always,
            fail_on_error: self.fail_on_error,
            source_label: label.to_string(),
        }
    }
}

//! Script staging: write script bodies to uniquely named temp files so the
//! backend can `load()` them by path.
//!
//! A [`StagedScript`] removes its file when released or dropped, so every exit
//! path out of command execution cleans up. Deletion failures are logged and
//! otherwise ignored.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tempfile::{Builder, TempPath};
use tracing::{debug, warn};

static UNSAFE_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

const STAGED_SUFFIX: &str = ".js";

/// Directory that staged scripts are written into.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Stage into the system temp directory.
    pub fn system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `body` verbatim to a fresh file whose name starts with `name_hint`.
    pub fn stage(&self, body: &str, name_hint: &str) -> std::io::Result<StagedScript> {
        let prefix = format!("{}.", sanitize(name_hint));
        let mut file = Builder::new()
            .prefix(&prefix)
            .suffix(STAGED_SUFFIX)
            .tempfile_in(&self.dir)?;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        let path = file.into_temp_path();
        debug!(path = %path.display(), bytes = body.len(), "staged script");
        Ok(StagedScript { path: Some(path) })
    }
}

/// Name hint for a changeset's staged scripts: source label without its
/// extension, then the change id.
pub fn name_hint(source_label: &str, change_id: &str) -> String {
    let stem = Path::new(source_label)
        .with_extension("")
        .to_string_lossy()
        .into_owned();
    format!("{stem}.{change_id}")
}

fn sanitize(raw: &str) -> String {
    let cleaned = UNSAFE_NAME_CHARS.replace_all(raw, "_");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        "changeset".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A staged script file, deleted on release or drop.
#[derive(Debug)]
pub struct StagedScript {
    path: Option<TempPath>,
}

impl StagedScript {
    pub fn path(&self) -> &Path {
        match &self.path {
            Some(path) => &**path,
            None => Path::new(""),
        }
    }

    /// Delete the staged file now.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for StagedScript {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        let staged_path = path.to_path_buf();
        match path.close() {
            Ok(()) => debug!(path = %staged_path.display(), "released staged script"),
            Err(err) => warn!(
                path = %staged_path.display(),
                err = %err,
                "failed to delete staged script"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entries(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").path())
            .collect()
    }

    #[test]
    fn stage_writes_body_verbatim() {
        let temp = tempfile::tempdir().expect("tempdir");
        let area = StagingArea::new(temp.path());
        let body = "db.user.insert({name: \"a\"});\nprint('x');\n";

        let staged = area.stage(body, "changelog/users.1").expect("stage");
        assert_eq!(fs::read_to_string(staged.path()).expect("read"), body);

        let name = staged
            .path()
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .into_owned();
        assert!(name.starts_with("changelog_users.1."), "{name}");
        assert!(name.ends_with(".js"), "{name}");
    }

    #[test]
    fn release_and_drop_remove_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let area = StagingArea::new(temp.path());

        let released = area.stage("a", "x.1").expect("stage");
        released.release();
        {
            let _dropped = area.stage("b", "x.2").expect("stage");
        }
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn repeated_hints_get_distinct_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let area = StagingArea::new(temp.path());
        let first = area.stage("a", "same.1").expect("stage");
        let second = area.stage("b", "same.1").expect("stage");
        assert_ne!(first.path(), second.path());
    }

    #[test]
    fn stage_into_missing_dir_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let area = StagingArea::new(temp.path().join("missing"));
        assert!(area.stage("a", "x.1").is_err());
    }

    #[test]
    fn name_hint_strips_extension() {
        assert_eq!(name_hint("changelog/users.toml", "7"), "changelog/users.7");
        assert_eq!(name_hint("plain", "ChangeSet-1"), "plain.ChangeSet-1");
    }

    #[test]
    fn sanitize_falls_back_for_empty_names() {
        assert_eq!(sanitize("../"), "changeset");
        assert_eq!(sanitize("a b/c"), "a_b_c");
    }
}

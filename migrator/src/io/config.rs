//! Migrator configuration (`migrator.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backend::{Backend, BackendSpec};
use crate::io::session::{SessionOptions, SuccessDetection};
use crate::io::staging::StagingArea;

/// Migrator configuration (TOML).
///
/// Missing fields take the defaults below; a missing file is the default
/// configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MigratorConfig {
    /// Interactive shell client to drive.
    pub backend: Backend,

    /// Path to the backend executable, if not the backend's default name.
    pub binary: Option<String>,

    /// Ready-banner wait in seconds. `0` waits forever.
    pub ready_timeout_secs: u64,

    /// Per-command response wait in seconds. `0` waits forever.
    pub command_timeout_secs: u64,

    pub poll_interval_ms: u64,

    /// Quiet period that ends error-output collection after a failure.
    pub drain_window_ms: u64,

    pub shutdown_timeout_secs: u64,

    pub success_detection: SuccessDetection,

    /// Where staged scripts are written. Defaults to the system temp dir.
    pub staging_dir: Option<PathBuf>,

    pub ledger_path: PathBuf,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Mongosh,
            binary: None,
            ready_timeout_secs: 60,
            command_timeout_secs: 0,
            poll_interval_ms: 50,
            drain_window_ms: 100,
            shutdown_timeout_secs: 10,
            success_detection: SuccessDetection::Correlated,
            staging_dir: None,
            ledger_path: PathBuf::from(".migrator/ledger.jsonl"),
        }
    }
}

impl MigratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.drain_window_ms == 0 {
            return Err(anyhow!("drain_window_ms must be > 0"));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(anyhow!("shutdown_timeout_secs must be > 0"));
        }
        if let Some(binary) = &self.binary
            && binary.trim().is_empty()
        {
            return Err(anyhow!("binary must not be empty when set"));
        }
        if self.ledger_path.as_os_str().is_empty() {
            return Err(anyhow!("ledger_path must not be empty"));
        }
        Ok(())
    }

    pub fn backend_spec(&self) -> BackendSpec {
        self.backend.spec(self.binary.as_deref())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ready_timeout: optional_secs(self.ready_timeout_secs),
            command_timeout: optional_secs(self.command_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            drain_window: Duration::from_millis(self.drain_window_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            success_detection: self.success_detection,
        }
    }

    pub fn staging_area(&self) -> StagingArea {
        match &self.staging_dir {
            Some(dir) => StagingArea::new(dir),
            None => StagingArea::system_temp(),
        }
    }
}

fn optional_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MigratorConfig::default()`.
pub fn load_config(path: &Path) -> Result<MigratorConfig> {
    if !path.exists() {
        let cfg = MigratorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: MigratorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

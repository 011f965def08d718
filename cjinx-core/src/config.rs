//! The `cjinx.toml` settings file.
//!
//! ```toml
//! [paths]
//! database_file = "/var/lib/cjinx/records.json"
//! log_dir = "/var/log/cjinx"
//!
//! [io]
//! backend = "dd"
//! drop_cache = true
//! ```

use crate::audit::{AuditLog, AUDIT_LOG_NAME};
use crate::cache::{CacheInvalidator, DdCacheInvalidator, NoopCache};
use crate::device::{BlockDevice, DdDevice, FileDevice};
use crate::engine::Engine;
use crate::extent::CommandResolver;
use crate::store::JsonRecordStore;
use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "cjinx.toml";
pub const CONFIG_ENV: &str = "CJINX_CONFIG";
pub const DEBUG_LOG_NAME: &str = "cj_debug.log";
pub const SCRATCH_BLOCK_NAME: &str = "cj.datablock";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoBackend {
    #[default]
    Dd,
    Native,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub database_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IoConfig {
    #[serde(default)]
    pub backend: IoBackend,
    #[serde(default = "default_true")]
    pub drop_cache: bool,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self { backend: IoBackend::Dd, drop_cache: true }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub io: IoConfig,
}

impl Config {
    pub fn from_toml_str(src: &str) -> Result<Self> {
        toml::from_str(src).context("parse config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&src).with_context(|| format!("in {}", path.display()))
    }

    /// Replace `paths.database_file`, e.g. from the command line.
    pub fn with_database_file(mut self, db: Option<PathBuf>) -> Self {
        if let Some(db) = db {
            self.paths.database_file = Some(db);
        }
        self
    }

    pub fn database_file(&self) -> Result<&Path> {
        match self.paths.database_file.as_deref() {
            Some(p) if !p.as_os_str().is_empty() => Ok(p),
            _ => bail!("paths.database_file is not set"),
        }
    }

    pub fn log_dir(&self) -> Result<&Path> {
        match self.paths.log_dir.as_deref() {
            Some(p) if !p.as_os_str().is_empty() => Ok(p),
            _ => bail!("paths.log_dir is not set"),
        }
    }

    /// Both required settings present and the log directory exists.
    pub fn validate(&self) -> Result<()> {
        self.database_file()?;
        let log_dir = self.log_dir()?;
        if !log_dir.is_dir() {
            bail!("log_dir {} doesn't exist", log_dir.display());
        }
        Ok(())
    }

    pub fn audit_log_path(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join(AUDIT_LOG_NAME))
    }

    pub fn debug_log_path(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join(DEBUG_LOG_NAME))
    }

    pub fn scratch_path(&self) -> Result<PathBuf> {
        Ok(self.log_dir()?.join(SCRATCH_BLOCK_NAME))
    }

    /// Wire the production engine described by this config.
    pub fn open_engine(&self, rng: StdRng) -> Result<Engine> {
        self.validate()?;
        let db = self.database_file()?;
        let store = JsonRecordStore::open(db)
            .with_context(|| format!("open record store {}", db.display()))?;
        let audit_path = self.audit_log_path()?;
        let audit = AuditLog::open(&audit_path)
            .with_context(|| format!("open audit log {}", audit_path.display()))?;
        let device: Box<dyn BlockDevice> = match self.io.backend {
            IoBackend::Dd => Box::new(DdDevice::new(self.scratch_path()?)),
            IoBackend::Native => Box::new(FileDevice),
        };
        let cache: Box<dyn CacheInvalidator> =
            if self.io.drop_cache { Box::new(DdCacheInvalidator::default()) } else { Box::new(NoopCache) };
        Ok(Engine::new(CommandResolver::default(), device, cache, store, audit, rng))
    }
}

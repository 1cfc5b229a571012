//! JSON-backed configuration store.
//!
//! Holds the in-memory `SessionConfig` and optionally mirrors it to a file.
//! Writes go through a temp file and a rename so a crash never leaves a
//! truncated config behind.

use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::SessionConfig;
use crate::error::{Error, Result};

pub struct ConfigStore {
    path: Option<PathBuf>,
    config: RwLock<SessionConfig>,
}

impl ConfigStore {
    /// A store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: RwLock::new(SessionConfig::default()),
        }
    }

    /// A store with no backing file; `load` keeps the in-memory value.
    pub fn in_memory(config: SessionConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of the current in-memory configuration.
    pub fn config(&self) -> SessionConfig {
        self.config.read().clone()
    }

    pub fn set_config(&self, config: SessionConfig) {
        *self.config.write() = config;
    }

    /// Replace the in-memory configuration with the file's contents.
    pub fn load(&self) -> Result<SessionConfig> {
        let Some(path) = &self.path else {
            debug!("config store has no backing file; keeping in-memory config");
            return Ok(self.config());
        };
        let bytes = fs::read(path)?;
        let config: SessionConfig = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded configuration {:?} ({} worker(s)) from {}",
            config.name,
            config.workers.len(),
            path.display()
        );
        *self.config.write() = config.clone();
        Ok(config)
    }

    /// Write the in-memory configuration to the backing file.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Err(Error::IllegalArgument(
                "config store has no backing file".into(),
            ));
        };
        let json = serde_json::to_vec_pretty(&*self.config.read())?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json)?;
        fs::rename(&tmp, path)?;
        info!("Saved configuration to {}", path.display());
        Ok(())
    }
}

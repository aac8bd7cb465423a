//! Durable config-snapshot file.
//!
//! The snapshot's existence doubles as the crash-recovery marker for the
//! config swap protocol: present at run start means a previous run never
//! restored, so the target is assumed to still carry the temporary config.
//! JSON on purpose: an operator must be able to apply it by hand when the
//! automated restore fails.

use std::fs;
use std::path::{Path, PathBuf};

use crate::data::FieldBag;
use crate::error::MigrateError;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<FieldBag, MigrateError> {
        let raw = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, config: &FieldBag) -> Result<(), MigrateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(config)?;
        fs::write(&self.path, raw)?;
        Ok(())
    }

    pub fn remove(&self) -> Result<(), MigrateError> {
        fs::remove_file(&self.path)?;
        Ok(())
    }
}

//! JSON file store.
//!
//! One document per slot: `<dir>/<name>.json`. Saves go through
//! `<name>.json.tmp` and a rename, so a crash leaves either the old or the
//! new document, never a torn one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::ports::store::decode_slot;
use crate::ports::{PersistentStore, StoreError};
use crate::queue::QueuedArtifact;

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
    name: String,
}

impl JsonFileStore {
    /// Use slot `name` under `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>, name: impl Into<String>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            name: name.into(),
        })
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.json.tmp", self.name))
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), StoreError> {
        File::open(&self.dir)?.sync_all()?;
        Ok(())
    }

    // NTFS journals metadata; there is no directory handle to fsync.
    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl PersistentStore for JsonFileStore {
    fn load(&self) -> Result<Vec<QueuedArtifact>, StoreError> {
        let path = self.path();
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(decode_slot(&raw, &self.name)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            // Non-UTF-8 bytes are corruption, not an unreadable store.
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                warn!(slot = %self.name, error = %err, "persisted queue is not UTF-8, starting empty");
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, artifacts: &[QueuedArtifact]) -> Result<(), StoreError> {
        let data = serde_json::to_vec(artifacts)?;
        let temp = self.temp_path();

        let mut file = File::create(&temp)?;
        file.write_all(&data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, self.path())?;
        self.sync_dir()?;

        debug!(slot = %self.name, artifacts = artifacts.len(), bytes = data.len(), "queue saved");
        Ok(())
    }
}

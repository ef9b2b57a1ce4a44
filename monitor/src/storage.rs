//! Durable storage for the player roster

use crate::presence::PlayerMap;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Well-known key the roster document is stored under.
pub const PRESENCE_KEY: &str = "players";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed roster document {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Key-value style persistence of the whole roster
pub trait PresenceStore {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> Result<Option<PlayerMap>, StorageError>;

    fn save(&self, players: &PlayerMap) -> Result<(), StorageError>;
}

/// Stores the roster as `<dir>/players.json`
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{PRESENCE_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl PresenceStore for JsonFileStore {
    fn load(&self) -> Result<Option<PlayerMap>, StorageError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StorageError::Json {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, players: &PlayerMap) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(players).map_err(|source| StorageError::Json {
            path: self.path.clone(),
            source,
        })?;

        // Write next to the target and rename so readers never see half a file.
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, data).map_err(|e| self.io_error(e))?;
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;

        debug!("Saved {} player records to {}", players.len(), self.path.display());
        Ok(())
    }
}

//! Durable storage of the [`State`].

mod document;

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::state::State;
use document::StateDocument;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed state document: {0}")]
    Malformed(String),
}

/// Whole-snapshot storage of the keeper state.
///
/// Calls are synchronous and made while holding the state lock, so
/// implementations receive snapshots one at a time.
pub trait StateStore: Send + Sync + 'static {
    /// Loads the last saved state, empty state if nothing was saved yet.
    fn load(&self) -> Result<State, StoreError>;

    /// Replaces the saved state.
    fn save(&self, state: &State) -> Result<(), StoreError>;
}

/// Stores the state as a single JSON document on the local filesystem.
///
/// Snapshots are written to a sibling temporary file first and renamed
/// over the document once flushed to disk, so a crash never leaves a
/// partially written state.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_path = path.clone().into_os_string();
        tmp_path.push(".tmp");
        Self {
            path,
            tmp_path: tmp_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<State, StoreError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(State::default()),
            Err(err) => return Err(err.into()),
        };
        let doc: StateDocument = serde_json::from_slice(&content)?;
        doc.try_into()
    }

    fn save(&self, state: &State) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(&StateDocument::from(state))?;
        let mut file = fs::File::create(&self.tmp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

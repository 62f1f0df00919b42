// Module: Loader
// Reads saved test files from disk for the CLI and gate-checks them before
// anything is sent to the backend.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::errors::ErrorCode;
use crate::protocol::SavedTest;
use crate::validation;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read test file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse test file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("test '{name}' has no steps")]
    Empty { name: String },

    #[error("test '{name}' has incomplete steps at positions {indices:?}")]
    Incomplete { name: String, indices: Vec<usize> },
}

impl LoadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LoadError::Read { .. } | LoadError::Parse { .. } => ErrorCode::INVALID_TEST_FILE,
            LoadError::Empty { .. } => ErrorCode::EMPTY_SEQUENCE,
            LoadError::Incomplete { .. } => ErrorCode::INCOMPLETE_SEQUENCE,
        }
    }
}

/// Loads a saved test and rejects it early when it could not execute:
/// better a clear error here than a backend round-trip that fails.
pub fn load_saved_test<P: AsRef<Path>>(path: P) -> Result<SavedTest, LoadError> {
    let path_ref = path.as_ref();
    let display = path_ref.display().to_string();

    let content = fs::read_to_string(path_ref).map_err(|source| LoadError::Read {
        path: display.clone(),
        source,
    })?;

    let test: SavedTest = serde_json::from_str(&content).map_err(|source| LoadError::Parse {
        path: display,
        source,
    })?;

    if test.sequence.is_empty() {
        return Err(LoadError::Empty { name: test.name });
    }
    let incomplete = validation::incomplete_indices(&test.sequence);
    if !incomplete.is_empty() {
        return Err(LoadError::Incomplete {
            name: test.name,
            indices: incomplete,
        });
    }

    Ok(test)
}

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the prompt library core.
///
/// Malformed metadata is never an error here: it degrades to defaulted
/// metadata plus a recorded validation error on the prompt itself.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Temp-write-then-rename failed; the destination is left untouched.
    #[error("Failed to write {path} atomically: {source}")]
    AtomicWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("A prompt named {name:?} already exists at {path}")]
    DuplicateName { name: String, path: PathBuf },

    #[error("Invalid prompt name: {0:?}")]
    InvalidName(String),

    #[error("{path} is outside the prompt library root")]
    OutsideRoot { path: PathBuf },

    #[error("Failed to serialize metadata: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        source: globset::Error,
    },

    #[error("Prompt manager is not initialized")]
    NotInitialized,
}

impl PromptError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PromptError::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures that only affect a single file (skipped, not fatal).
    pub fn is_transient(&self) -> bool {
        matches!(self, PromptError::Io { .. })
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;

use crate::utils::encoding::DecodeError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while building or querying an index
#[derive(Error, Debug)]
pub enum LexdexError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt segment {}: {detail}", path.display())]
    CorruptSegment { path: PathBuf, detail: String },

    #[error("Corrupt index file: {0}")]
    CorruptIndex(String),

    #[error("Query syntax error at offset {position}: {message}")]
    QuerySyntax { position: usize, message: String },

    #[error("Build aborted")]
    Aborted,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for lexdex operations
pub type Result<T> = std::result::Result<T, LexdexError>;

impl LexdexError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        LexdexError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt_segment(path: impl AsRef<Path>, detail: impl Into<String>) -> Self {
        LexdexError::CorruptSegment {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        LexdexError::QuerySyntax {
            position,
            message: message.into(),
        }
    }

    /// Errors that invalidate the whole build rather than one unit of work
    pub fn is_fatal_for_build(&self) -> bool {
        matches!(
            self,
            LexdexError::CorruptIndex(_) | LexdexError::Aborted | LexdexError::Config(_)
        )
    }
}

impl From<DecodeError> for LexdexError {
    fn from(err: DecodeError) -> Self {
        LexdexError::CorruptIndex(err.to_string())
    }
}

/// Attach a path to `io::Result` values
pub trait IoContext<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| LexdexError::io(path, e))
    }
}

//! Error types shared across the engine.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContentError>;

#[derive(Debug, Error)]
pub enum ContentError {
    /// The origin answered with a non-success status
    #[error("origin returned {status} for {url}")]
    Transport {
        status: reqwest::StatusCode,
        url: String,
    },

    #[error("connection failed: {0}")]
    Connection(#[from] reqwest::Error),

    /// The origin answered, but not with what we asked for
    #[error("malformed origin response: {0}")]
    MalformedResponse(String),

    #[error("archive extraction failed: {0}")]
    Extraction(String),

    #[error("no catalog installed for the default source")]
    MissingDefaultSource,

    /// A downloaded package targets a schema generation this build cannot read
    #[error("package schema version {found} does not match supported version {expected}")]
    SchemaVersionMismatch { expected: i64, found: i64 },

    /// A write raced with an uninstall that already removed the target
    #[error("target removed before write completed: {0}")]
    StaleWrite(PathBuf),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ContentError {
    pub(crate) fn missing_payload(path: &Path) -> Self {
        ContentError::Extraction(format!("archive did not contain {}", path.display()))
    }
}

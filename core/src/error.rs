use std::path::PathBuf;
use thiserror::Error;

use crate::fingerprint::Fingerprint;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to open history store at {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("item {0} not found")]
    NotFound(i64),

    #[error("an item with fingerprint {0} already exists")]
    DuplicateFingerprint(Fingerprint),

    #[error("fingerprint prefix {0:?} matches more than one item")]
    AmbiguousPrefix(String),

    #[error("invalid fingerprint prefix {0:?}")]
    InvalidPrefix(String),

    #[error("stored payload of item {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
}

#[derive(Error, Debug)]
pub enum ClipboardError {
    #[error("clipboard access failed: {0}")]
    Access(String),

    #[error("failed to write to clipboard: {0}")]
    Write(String),

    #[error("unsupported clipboard format: {0}")]
    Unsupported(String),
}

use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum FindexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("access denied for root {root}: {reason}")]
    AccessDenied { root: String, reason: String },

    #[error("transient IO failure: {0}")]
    TransientIo(String),

    #[error("watcher event overflow for root: {0}")]
    OverflowGap(String),

    #[error("query parse error: {0}")]
    MalformedQuery(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("unknown root: {0:?}")]
    UnknownRoot(crate::types::RootId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, FindexError>;

/// Canonicalizes a path, returning the original if canonicalization fails.
pub fn canonicalize_existing_path(path: PathBuf) -> PathBuf {
    fs::canonicalize(&path).unwrap_or(path)
}

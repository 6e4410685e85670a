use std::io;

use thiserror::Error;

/// Failures reported by a [`crate::store::DocumentStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {path}")]
    NotFound { path: String },

    #[error("access denied: {path}")]
    AccessDenied { path: String },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn from_io(path: &str, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound {
                path: path.to_string(),
            },
            io::ErrorKind::PermissionDenied => Self::AccessDenied {
                path: path.to_string(),
            },
            _ => Self::Io {
                path: path.to_string(),
                source,
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no document is open (called {operation})")]
    NotOpen { operation: &'static str },

    #[error("the open document has no path to save to")]
    MissingPath,

    #[error("metadata key {key:?} is empty once trimmed")]
    InvalidMetadataKey { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type SessionResult<T> = Result<T, SessionError>;

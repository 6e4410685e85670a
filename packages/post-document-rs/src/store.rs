use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

/// Storage collaborator. Paths are document-root relative and already validated
/// by the caller.
pub trait DocumentStore {
    fn read(&self, path: &str) -> Result<String, StoreError>;
    fn write(&self, path: &str, stored_text: &str) -> Result<(), StoreError>;
}

/// Filesystem store rooted at a content directory.
#[derive(Clone, Debug)]
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl DocumentStore for FsDocumentStore {
    fn read(&self, path: &str) -> Result<String, StoreError> {
        fs::read_to_string(self.resolve(path)).map_err(|source| StoreError::from_io(path, source))
    }

    fn write(&self, path: &str, stored_text: &str) -> Result<(), StoreError> {
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::from_io(path, source))?;
        }
        fs::write(&target, stored_text).map_err(|source| StoreError::from_io(path, source))?;
        tracing::debug!(path, bytes = stored_text.len(), "document written");
        Ok(())
    }
}

//! Blob storage for uploaded inputs and harvested artifacts.

pub mod filesystem;
pub mod workspace;

use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub use filesystem::FileStorage;
pub use workspace::JobWorkspace;

/// Path-addressable content store.
///
/// Namespaces are relative, `/`-separated directories (`jobs/<id>/uploads`);
/// the returned path is what later `get`/`exists` calls take.
pub trait BlobStore: Send + Sync {
    /// Stores `content` under `namespace`. Never overwrites: a clashing name
    /// gets a numbered variant.
    fn put(&self, namespace: &str, filename: &str, content: &[u8])
        -> Result<PathBuf, StorageError>;

    fn get(&self, path: &Path) -> Result<Vec<u8>, StorageError>;

    fn exists(&self, path: &Path) -> bool;

    /// Stores the content of a file on local disk.
    fn put_file(
        &self,
        namespace: &str,
        filename: &str,
        source: &Path,
    ) -> Result<PathBuf, StorageError> {
        let content = std::fs::read(source).map_err(|e| StorageError::ReadFile {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.put(namespace, filename, &content)
    }
}

// File Storage
//
// A folder tree of stored files spread over one or more named storages.
// Backends only move bytes between paths; uids, names and folders are
// managed by the ResourceStore on top of them.

use std::path::Path;

use crate::operation::Uid;
use crate::persist::PersistError;

pub mod index;
pub mod local;
pub mod name;
pub mod resources;

pub use local::LocalBackend;
pub use name::{sanitize_file_name, FileNameValidator};
pub use resources::ResourceStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("unknown storage \"{0}\"")]
    UnknownStorage(String),

    #[error("invalid folder path \"{0}\"")]
    InvalidPath(String),

    #[error("file \"{name}\" already exists in \"{folder}\"")]
    AlreadyExists { name: String, folder: String },

    #[error("file with uid {0} does not exist")]
    FileNotFound(Uid),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("file index: {0}")]
    Index(#[from] PersistError),
}

/// A folder inside a named storage.
///
/// `path` is normalized: segments joined by `/`, no leading or
/// trailing separator, empty for the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Folder {
    pub storage: String,
    pub path: String,
}

impl Folder {
    /// Combined identifier, `storage:/path/`.
    pub fn identifier(&self) -> String {
        if self.path.is_empty() {
            format!("{}:/", self.storage)
        } else {
            format!("{}:/{}/", self.storage, self.path)
        }
    }

    /// Relative path of an entry named `name` inside this folder.
    pub fn entry_path(&self, name: &str) -> String {
        if self.path.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.path, name)
        }
    }
}

/// A file known to the file index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub uid: Uid,
    pub folder: Folder,
    pub name: String,
}

impl StoredFile {
    pub fn path(&self) -> String {
        self.folder.entry_path(&self.name)
    }

    pub fn extension(&self) -> Option<&str> {
        Path::new(&self.name).extension().and_then(|e| e.to_str())
    }
}

/// Name without its final extension (`archive.tar.gz` -> `archive.tar`).
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

/// Split a combined identifier into storage name and normalized path.
///
/// `local:/uploads/` -> (`local`, `uploads`). Without a `name:` prefix
/// the whole value is a path in `default_storage`.
pub fn parse_combined_identifier(
    identifier: &str,
    default_storage: &str,
) -> Result<(String, String), StorageError> {
    let (storage, path) = match identifier.split_once(':') {
        Some((storage, path)) if !storage.is_empty() && !storage.contains('/') => {
            (storage.to_string(), path)
        }
        _ => (default_storage.to_string(), identifier),
    };

    Ok((storage, normalize_folder_path(path)?))
}

/// Normalize a folder path, rejecting dot segments and separators
/// other than `/`.
pub fn normalize_folder_path(path: &str) -> Result<String, StorageError> {
    let mut segments = Vec::new();

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if segment == "."
            || segment == ".."
            || segment.contains('\\')
            || segment.chars().any(|c| c.is_control())
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        segments.push(segment);
    }

    Ok(segments.join("/"))
}

/// Byte-level operations a storage must provide.
///
/// Paths are relative to the storage root and already normalized.
/// Implementations must make `create_file` fail with
/// `StorageError::AlreadyExists` when the target exists, atomically.
pub trait StorageBackend: Send + Sync {
    fn folder_exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Create a folder and any missing parents. Existing folders are fine.
    fn create_folder(&self, path: &str) -> Result<(), StorageError>;

    fn file_exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Create an empty file that must not exist yet.
    fn create_file(&self, path: &str) -> Result<(), StorageError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError>;

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), StorageError>;

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError>;
}

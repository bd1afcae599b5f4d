// Local Disk Backend

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::PathBuf;

use super::{StorageBackend, StorageError};

/// Storage rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl StorageBackend for LocalBackend {
    fn folder_exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.full_path(path).is_dir())
    }

    fn create_folder(&self, path: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.full_path(path))?;
        Ok(())
    }

    fn file_exists(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.full_path(path).is_file())
    }

    fn create_file(&self, path: &str) -> Result<(), StorageError> {
        let full = self.full_path(path);
        match OpenOptions::new().write(true).create_new(true).open(&full) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let (folder, name) = path.rsplit_once('/').unwrap_or(("", path));
                Err(StorageError::AlreadyExists {
                    name: name.to_string(),
                    folder: format!("/{folder}"),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), StorageError> {
        fs::rename(self.full_path(from), self.full_path(to))?;
        Ok(())
    }

    fn write(&self, path: &str, contents: &[u8]) -> Result<(), StorageError> {
        fs::write(self.full_path(path), contents)?;
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        Ok(fs::read(self.full_path(path))?)
    }
}

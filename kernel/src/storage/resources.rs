// Resource Store
//
// High-level file operations over named storage backends and the
// shared file index: resolve folders from combined identifiers, create,
// find, rename and write stored files.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::index::FileIndex;
use super::name::{sanitize_file_name, FileNameValidator};
use super::{
    normalize_folder_path, parse_combined_identifier, Folder, StorageBackend, StorageError,
    StoredFile,
};
use crate::operation::Uid;

pub struct ResourceStore {
    backends: BTreeMap<String, Arc<dyn StorageBackend>>,
    default_storage: String,
    index: FileIndex,
    validator: FileNameValidator,
}

impl ResourceStore {
    pub fn new(
        default_storage: impl Into<String>,
        index: FileIndex,
        validator: FileNameValidator,
    ) -> Self {
        Self {
            backends: BTreeMap::new(),
            default_storage: default_storage.into(),
            index,
            validator,
        }
    }

    /// Register a backend under a storage name.
    pub fn register<B: StorageBackend + 'static>(&mut self, name: impl Into<String>, backend: B) {
        self.backends.insert(name.into(), Arc::new(backend));
    }

    pub fn validator(&self) -> &FileNameValidator {
        &self.validator
    }

    pub fn sanitize_file_name(&self, name: &str) -> String {
        sanitize_file_name(name)
    }

    fn backend(&self, storage: &str) -> Result<&Arc<dyn StorageBackend>, StorageError> {
        self.backends
            .get(storage)
            .ok_or_else(|| StorageError::UnknownStorage(storage.to_string()))
    }

    /// Folder named by a combined identifier, if it exists.
    pub fn folder(&self, identifier: &str) -> Result<Option<Folder>, StorageError> {
        let (storage, path) = parse_combined_identifier(identifier, &self.default_storage)?;
        let exists = self.backend(&storage)?.folder_exists(&path)?;
        Ok(exists.then_some(Folder { storage, path }))
    }

    /// Folder named by a combined identifier, created if absent.
    pub fn folder_or_create(&self, identifier: &str) -> Result<Folder, StorageError> {
        if let Some(folder) = self.folder(identifier)? {
            return Ok(folder);
        }

        let (storage, path) = parse_combined_identifier(identifier, &self.default_storage)?;
        self.backend(&storage)?.create_folder(&path)?;
        let folder = Folder { storage, path };
        debug!(folder = %folder.identifier(), "created folder");
        Ok(folder)
    }

    pub fn subfolder(&self, parent: &Folder, name: &str) -> Result<Option<Folder>, StorageError> {
        let path = normalize_folder_path(&parent.entry_path(name))?;
        let exists = self.backend(&parent.storage)?.folder_exists(&path)?;
        Ok(exists.then(|| Folder {
            storage: parent.storage.clone(),
            path,
        }))
    }

    pub fn create_subfolder(&self, parent: &Folder, name: &str) -> Result<Folder, StorageError> {
        let path = normalize_folder_path(&parent.entry_path(name))?;
        self.backend(&parent.storage)?.create_folder(&path)?;
        let folder = Folder {
            storage: parent.storage.clone(),
            path,
        };
        debug!(folder = %folder.identifier(), "created folder");
        Ok(folder)
    }

    /// Whether a file called `name` physically exists in `folder`.
    pub fn has_file_in_folder(&self, name: &str, folder: &Folder) -> Result<bool, StorageError> {
        let name = sanitize_file_name(name);
        self.backend(&folder.storage)?
            .file_exists(&folder.entry_path(&name))
    }

    /// Create an empty file and assign it a uid.
    ///
    /// Fails with `AlreadyExists` if the name is taken, even when another
    /// caller created it after a `has_file_in_folder` check.
    pub fn create_file(&self, folder: &Folder, name: &str) -> Result<StoredFile, StorageError> {
        let name = sanitize_file_name(name);
        match self.backend(&folder.storage)?.create_file(&folder.entry_path(&name)) {
            Err(StorageError::AlreadyExists { .. }) => {
                return Err(StorageError::AlreadyExists {
                    name,
                    folder: folder.identifier(),
                })
            }
            result => result?,
        }

        let file = self.index.insert(folder, &name)?;
        info!(uid = file.uid, folder = %folder.identifier(), name = %file.name, "created file");
        Ok(file)
    }

    /// Indexed file by uid, if both the index entry and its bytes exist.
    pub fn file(&self, uid: Uid) -> Result<Option<StoredFile>, StorageError> {
        let Some(file) = self.index.get(uid) else {
            return Ok(None);
        };

        let exists = self.backend(&file.folder.storage)?.file_exists(&file.path())?;
        Ok(exists.then_some(file))
    }

    /// Indexed file called `name` in `folder`, if its bytes exist.
    pub fn find_file(&self, folder: &Folder, name: &str) -> Result<Option<StoredFile>, StorageError> {
        match self.index.find(folder, &sanitize_file_name(name)) {
            Some(file) => self.file(file.uid),
            None => Ok(None),
        }
    }

    /// Rename a file within its folder.
    pub fn rename_file(&self, file: &StoredFile, name: &str) -> Result<StoredFile, StorageError> {
        let name = sanitize_file_name(name);
        if name == file.name {
            return Ok(file.clone());
        }

        let backend = self.backend(&file.folder.storage)?;
        let target = file.folder.entry_path(&name);
        if backend.file_exists(&target)? {
            return Err(StorageError::AlreadyExists {
                name,
                folder: file.folder.identifier(),
            });
        }

        backend.rename(&file.path(), &target)?;
        self.index.rename(file.uid, &name)?;
        info!(uid = file.uid, from = %file.name, to = %name, "renamed file");

        Ok(StoredFile {
            name,
            ..file.clone()
        })
    }

    pub fn set_contents(&self, file: &StoredFile, contents: &[u8]) -> Result<(), StorageError> {
        self.backend(&file.folder.storage)?
            .write(&file.path(), contents)?;
        info!(uid = file.uid, bytes = contents.len(), "wrote file contents");
        Ok(())
    }

    pub fn contents(&self, file: &StoredFile) -> Result<Vec<u8>, StorageError> {
        self.backend(&file.folder.storage)?.read(&file.path())
    }
}

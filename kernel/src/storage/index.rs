// File Index
//
// Assigns uids to stored files and remembers where each one lives.
// Uids start at 1 and are never reused.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Folder, StoredFile};
use crate::operation::Uid;
use crate::persist::{JsonState, PersistError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    storage: String,
    folder: String,
    name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IndexState {
    last_uid: Uid,
    files: BTreeMap<Uid, FileEntry>,
}

#[derive(Debug)]
pub struct FileIndex {
    state: JsonState<IndexState>,
}

impl FileIndex {
    pub fn in_memory() -> Self {
        Self {
            state: JsonState::in_memory(),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        Ok(Self {
            state: JsonState::open(path)?,
        })
    }

    /// Register a new file and return its record.
    pub fn insert(&self, folder: &Folder, name: &str) -> Result<StoredFile, PersistError> {
        let uid = self.state.update(|s| {
            s.last_uid += 1;
            s.files.insert(
                s.last_uid,
                FileEntry {
                    storage: folder.storage.clone(),
                    folder: folder.path.clone(),
                    name: name.to_string(),
                },
            );
            s.last_uid
        })?;

        Ok(StoredFile {
            uid,
            folder: folder.clone(),
            name: name.to_string(),
        })
    }

    pub fn get(&self, uid: Uid) -> Option<StoredFile> {
        self.state.read(|s| s.files.get(&uid).map(|entry| to_file(uid, entry)))
    }

    /// File registered under `name` in `folder`, if any.
    pub fn find(&self, folder: &Folder, name: &str) -> Option<StoredFile> {
        self.state.read(|s| {
            s.files
                .iter()
                .find(|(_, e)| e.storage == folder.storage && e.folder == folder.path && e.name == name)
                .map(|(uid, entry)| to_file(*uid, entry))
        })
    }

    pub fn rename(&self, uid: Uid, name: &str) -> Result<(), PersistError> {
        self.state.update(|s| {
            if let Some(entry) = s.files.get_mut(&uid) {
                entry.name = name.to_string();
            }
        })
    }
}

fn to_file(uid: Uid, entry: &FileEntry) -> StoredFile {
    StoredFile {
        uid,
        folder: Folder {
            storage: entry.storage.clone(),
            path: entry.folder.clone(),
        },
        name: entry.name.clone(),
    }
}

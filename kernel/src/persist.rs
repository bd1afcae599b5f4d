// JSON State Files
//
// Shared state (id mappings, record rows, the file index) is kept in
// memory behind a mutex and, when backed by a path, rewritten as a
// whole JSON document after every mutation.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("state file I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A serde-encoded state document, optionally mirrored to disk.
#[derive(Debug)]
pub struct JsonState<T> {
    path: Option<PathBuf>,
    state: Mutex<T>,
}

impl<T> JsonState<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    /// State that lives only for the lifetime of the process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(T::default()),
        }
    }

    /// Load state from `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let state = load_json(&path)?;
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    /// Read from the current state.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.state.lock())
    }

    /// Mutate the state and persist the result.
    ///
    /// `f` runs against a copy that replaces the live state only once it
    /// has been written, so a failed save leaves memory and disk agreeing.
    /// The document is written even if `f` made no change; callers only
    /// invoke this on mutating paths.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, PersistError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let result = f(&mut next);
        if let Some(path) = &self.path {
            save_json(path, &next)?;
        }
        *state = next;
        Ok(result)
    }
}

fn load_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, PersistError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(PersistError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&data).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a sibling temp file, then rename over the target.
fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let io_err = |source: std::io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let data = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
    if let Err(e) = fs::write(&tmp, data).and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}

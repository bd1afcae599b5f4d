// Mapping Repository
//
// Default RemoteIdMappingRepository backed by a JSON state document.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{Metadata, RemoteIdMappingRepository};
use crate::operation::Uid;
use crate::persist::{JsonState, PersistError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MappingState {
    /// table -> remote id -> uid
    mappings: BTreeMap<String, BTreeMap<String, Uid>>,

    /// remote id -> handler key -> metadata
    metadata: BTreeMap<String, BTreeMap<String, Metadata>>,
}

#[derive(Debug)]
pub struct MappingRepository {
    state: JsonState<MappingState>,
}

impl MappingRepository {
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
}

impl RemoteIdMappingRepository for MappingRepository {
    fn get(&self, table: &str, remote_id: &str) -> Option<Uid> {
        self.state.read(|s| {
            s.mappings
                .get(table)
                .and_then(|t| t.get(remote_id))
                .copied()
                .filter(|uid| *uid != 0)
        })
    }

    fn set(&self, table: &str, remote_id: &str, uid: Uid) -> Result<(), PersistError> {
        self.state.update(|s| {
            s.mappings
                .entry(table.to_string())
                .or_default()
                .insert(remote_id.to_string(), uid);
        })
    }

    fn remove(&self, table: &str, remote_id: &str) -> Result<Option<Uid>, PersistError> {
        self.state.update(|s| {
            let removed = s.mappings.get_mut(table).and_then(|t| t.remove(remote_id));
            if s.mappings.get(table).is_some_and(|t| t.is_empty()) {
                s.mappings.remove(table);
            }
            s.metadata.remove(remote_id);
            removed
        })
    }

    fn metadata(&self, remote_id: &str, handler_key: &str) -> Option<Metadata> {
        self.state.read(|s| {
            s.metadata
                .get(remote_id)
                .and_then(|h| h.get(handler_key))
                .cloned()
        })
    }

    fn set_metadata(
        &self,
        remote_id: &str,
        handler_key: &str,
        metadata: Metadata,
    ) -> Result<(), PersistError> {
        self.state.update(|s| {
            s.metadata
                .entry(remote_id.to_string())
                .or_default()
                .insert(handler_key.to_string(), metadata);
        })
    }
}

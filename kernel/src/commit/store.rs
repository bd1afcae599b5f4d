// Record Storage
//
// Rows of ordinary record fields, per table, keyed by uid. Deletes are
// soft: the row stays but is no longer returned.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::{RecordData, Uid};
use crate::persist::{JsonState, PersistError};

/// Storage backend for committed records.
pub trait RecordStore: Send + Sync {
    /// Row for `uid`, limited to `fields` (`["*"]` for all), with `uid`
    /// included. Soft-deleted rows and unknown tables yield `None`.
    fn get_record(&self, table: &str, uid: Uid, fields: &[&str]) -> Option<RecordData>;

    /// Insert a row, under `uid` if given, otherwise under the next
    /// free uid of the table. Inserting over an existing uid replaces it.
    fn insert(&self, table: &str, uid: Option<Uid>, data: RecordData) -> Result<Uid, PersistError>;

    /// Merge `data` into an existing row. Returns false if there is none.
    fn update(&self, table: &str, uid: Uid, data: RecordData) -> Result<bool, PersistError>;

    /// Soft-delete a row. Returns false if there is none.
    fn delete(&self, table: &str, uid: Uid) -> Result<bool, PersistError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Row {
    fields: RecordData,
    #[serde(default)]
    deleted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RecordState {
    tables: BTreeMap<String, BTreeMap<Uid, Row>>,
}

/// Default RecordStore backed by a JSON state document.
#[derive(Debug)]
pub struct RecordTable {
    state: JsonState<RecordState>,
}

impl RecordTable {
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

impl RecordStore for RecordTable {
    fn get_record(&self, table: &str, uid: Uid, fields: &[&str]) -> Option<RecordData> {
        self.state.read(|s| {
            let row = s.tables.get(table)?.get(&uid).filter(|r| !r.deleted)?;

            let mut out = RecordData::new();
            let all = fields.contains(&"*");
            if all || fields.contains(&"uid") {
                out.insert("uid".into(), Value::from(uid));
            }
            for (name, value) in &row.fields {
                if all || fields.contains(&name.as_str()) {
                    out.insert(name.clone(), value.clone());
                }
            }
            Some(out)
        })
    }

    fn insert(&self, table: &str, uid: Option<Uid>, data: RecordData) -> Result<Uid, PersistError> {
        self.state.update(|s| {
            let rows = s.tables.entry(table.to_string()).or_default();
            let uid = uid.unwrap_or_else(|| rows.keys().next_back().map_or(1, |last| last + 1));
            rows.insert(
                uid,
                Row {
                    fields: data,
                    deleted: false,
                },
            );
            uid
        })
    }

    fn update(&self, table: &str, uid: Uid, data: RecordData) -> Result<bool, PersistError> {
        if self.get_record(table, uid, &[]).is_none() {
            return Ok(false);
        }

        self.state.update(|s| {
            match s.tables.get_mut(table).and_then(|rows| rows.get_mut(&uid)) {
                Some(row) => {
                    row.fields.extend(data);
                    true
                }
                None => false,
            }
        })
    }

    fn delete(&self, table: &str, uid: Uid) -> Result<bool, PersistError> {
        if self.get_record(table, uid, &[]).is_none() {
            return Ok(false);
        }

        self.state.update(|s| {
            match s.tables.get_mut(table).and_then(|rows| rows.get_mut(&uid)) {
                Some(row) => {
                    row.deleted = true;
                    true
                }
                None => false,
            }
        })
    }
}

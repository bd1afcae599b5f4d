// Record Operations
//
// A record operation is a staged create, update or delete of a single
// row, addressed by the caller's remote id. Handlers mutate it in place
// before it is committed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::persist::PersistError;
use crate::storage::StorageError;

pub mod config;

/// Storage-assigned numeric identifier.
pub type Uid = u64;

/// Field values of a record, keyed by field name.
pub type RecordData = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOperation {
    kind: OperationKind,
    table: String,
    remote_id: String,
    data: RecordData,
    uid: Option<Uid>,
}

impl RecordOperation {
    pub fn create(table: impl Into<String>, remote_id: impl Into<String>, data: RecordData) -> Self {
        Self::new(OperationKind::Create, table, remote_id, data)
    }

    pub fn update(table: impl Into<String>, remote_id: impl Into<String>, data: RecordData) -> Self {
        Self::new(OperationKind::Update, table, remote_id, data)
    }

    pub fn delete(table: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, table, remote_id, RecordData::new())
    }

    fn new(
        kind: OperationKind,
        table: impl Into<String>,
        remote_id: impl Into<String>,
        data: RecordData,
    ) -> Self {
        Self {
            kind,
            table: table.into(),
            remote_id: remote_id.into(),
            data,
            uid: None,
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn is_create(&self) -> bool {
        self.kind == OperationKind::Create
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn remote_id(&self) -> &str {
        &self.remote_id
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn set_data(&mut self, data: RecordData) {
        self.data = data;
    }

    /// Resolved internal id, once known.
    pub fn uid(&self) -> Option<Uid> {
        self.uid
    }

    pub fn set_uid(&mut self, uid: Uid) {
        self.uid = Some(uid);
    }

    /// A string field, treating empty strings as absent.
    pub fn string_field(&self, field: &str) -> Option<&str> {
        self.data
            .get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn remove_field(&mut self, field: &str) -> Option<Value> {
        self.data.remove(field)
    }

    /// Turn a create into an update of the same remote id.
    pub fn into_update(self) -> Self {
        Self {
            kind: OperationKind::Update,
            ..self
        }
    }
}

/// Failures that abort a record operation.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("invalid file name: \"{0}\"")]
    InvalidName(String),

    #[error("{0}")]
    IdentityConflict(String),

    #[error("{0}")]
    MissingArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("could not decode file data: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("storage failure: {0}")]
    Storage(StorageError),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl OperationError {
    /// Stable name of the error kind, for front-end reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::InvalidName(_) => "InvalidName",
            OperationError::IdentityConflict(_) => "IdentityConflict",
            OperationError::MissingArgument(_) => "MissingArgument",
            OperationError::NotFound(_) => "NotFound",
            OperationError::Decode(_)
            | OperationError::Transport(_)
            | OperationError::Storage(_)
            | OperationError::Persist(_) => "Io",
        }
    }
}

impl From<StorageError> for OperationError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::AlreadyExists { .. } => OperationError::IdentityConflict(err.to_string()),
            StorageError::UnknownStorage(_) => OperationError::NotFound(err.to_string()),
            err => OperationError::Storage(err),
        }
    }
}

// Operation Processing
//
// Runs a record operation end to end:
// identity check → handler pipeline → commit → id mapping

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::event::{EventPipeline, HandlerFailure};
use crate::mapping::RemoteIdMappingRepository;
use crate::operation::{OperationError, OperationKind, RecordOperation, Uid};

pub mod store;

pub use store::{RecordStore, RecordTable};

/// Result of a committed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationOutcome {
    pub operation: OperationKind,
    pub table: String,
    pub remote_id: String,
    pub uid: Uid,
}

/// Errors that can occur while processing an operation.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{0}")]
    Rejected(OperationError),

    #[error(transparent)]
    Aborted(#[from] HandlerFailure),

    #[error("commit failed: {0}")]
    Commit(OperationError),
}

impl ProcessError {
    /// The underlying operation error.
    pub fn error(&self) -> &OperationError {
        match self {
            ProcessError::Rejected(e) | ProcessError::Commit(e) => e,
            ProcessError::Aborted(failure) => &failure.source,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.error().kind()
    }
}

pub struct RecordOperationProcessor {
    pipeline: EventPipeline,
    mapping: Arc<dyn RemoteIdMappingRepository>,
    records: Arc<dyn RecordStore>,
}

impl RecordOperationProcessor {
    pub fn new(
        pipeline: EventPipeline,
        mapping: Arc<dyn RemoteIdMappingRepository>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            pipeline,
            mapping,
            records,
        }
    }

    /// Like [`execute`](Self::execute), but a create for a remote id that
    /// is already mapped updates the existing record instead.
    pub fn upsert(&self, operation: RecordOperation) -> Result<OperationOutcome, ProcessError> {
        let mapped = self.mapping.get(operation.table(), operation.remote_id());
        if operation.is_create() && mapped.is_some() {
            return self.execute(operation.into_update());
        }
        self.execute(operation)
    }

    /// Process one operation.
    ///
    /// Nothing is committed if the identity check or any handler fails.
    /// Operations on the same remote id must not run concurrently.
    pub fn execute(&self, mut operation: RecordOperation) -> Result<OperationOutcome, ProcessError> {
        let table = operation.table().to_string();
        let remote_id = operation.remote_id().to_string();

        match (operation.kind(), self.mapping.get(&table, &remote_id)) {
            (OperationKind::Create, Some(uid)) => {
                return Err(ProcessError::Rejected(OperationError::IdentityConflict(format!(
                    "Remote ID \"{remote_id}\" already exists in \"{table}\" with UID \"{uid}\"."
                ))))
            }
            (OperationKind::Update | OperationKind::Delete, None) => {
                return Err(ProcessError::Rejected(OperationError::NotFound(format!(
                    "Remote ID \"{remote_id}\" does not exist in \"{table}\"."
                ))))
            }
            (_, Some(uid)) => operation.set_uid(uid),
            (_, None) => {}
        }

        let operation = self.pipeline.dispatch(operation)?;
        let kind = operation.kind();
        let uid = self.commit(operation).map_err(ProcessError::Commit)?;

        info!(operation = ?kind, table = %table, remote_id = %remote_id, uid, "operation committed");

        Ok(OperationOutcome {
            operation: kind,
            table,
            remote_id,
            uid,
        })
    }

    fn commit(&self, operation: RecordOperation) -> Result<Uid, OperationError> {
        let table = operation.table().to_string();
        let remote_id = operation.remote_id().to_string();
        let kind = operation.kind();
        let uid = operation.uid();
        let data = operation.data().clone();

        match (kind, uid) {
            (OperationKind::Create, uid) => {
                let uid = self.records.insert(&table, uid, data)?;
                self.mapping.set(&table, &remote_id, uid)?;
                Ok(uid)
            }
            (OperationKind::Update, Some(uid)) => {
                if !self.records.update(&table, uid, data.clone())? {
                    // Rows created outside this process (e.g. a file whose
                    // record was never committed) are adopted.
                    self.records.insert(&table, Some(uid), data)?;
                }
                Ok(uid)
            }
            (OperationKind::Delete, Some(uid)) => {
                self.records.delete(&table, uid)?;
                self.mapping.remove(&table, &remote_id)?;
                Ok(uid)
            }
            (_, None) => Err(OperationError::NotFound(format!(
                "Remote ID \"{remote_id}\" does not exist in \"{table}\"."
            ))),
        }
    }
}

// Interest Kernel
//
// Remote-id addressed record operations: id mapping, the
// before-operation handler pipeline, file ingestion and commit.

pub mod commit;
pub mod event;
pub mod ingest;
pub mod mapping;
pub mod operation;
pub mod persist;
pub mod storage;

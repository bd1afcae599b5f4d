// Remote Id Mapping
//
// Maps caller-supplied remote ids to storage-assigned uids, per table,
// and keeps a small key/value document per (remote id, handler) so
// handlers can remember state between invocations.
//
// The repository is not a lock: a get followed by a set is not atomic.
// Callers serialize operations that target the same remote id.

use std::collections::BTreeMap;

use crate::operation::Uid;
use crate::persist::PersistError;

pub mod store;

pub use store::MappingRepository;

/// Opaque per-handler metadata stored against a remote id.
pub type Metadata = BTreeMap<String, String>;

/// Storage contract for remote id mappings.
///
/// Properties required from implementations:
/// - At most one uid per (table, remote id)
/// - `set` is an idempotent upsert
/// - `set_metadata` replaces the whole document, it never merges
pub trait RemoteIdMappingRepository: Send + Sync {
    /// Uid mapped to `remote_id` in `table`, if any.
    fn get(&self, table: &str, remote_id: &str) -> Option<Uid>;

    fn set(&self, table: &str, remote_id: &str, uid: Uid) -> Result<(), PersistError>;

    /// Drop a mapping, returning the uid it pointed to. Handler metadata
    /// stored against the remote id goes with it.
    fn remove(&self, table: &str, remote_id: &str) -> Result<Option<Uid>, PersistError>;

    fn metadata(&self, remote_id: &str, handler_key: &str) -> Option<Metadata>;

    fn set_metadata(
        &self,
        remote_id: &str,
        handler_key: &str,
        metadata: Metadata,
    ) -> Result<(), PersistError>;
}

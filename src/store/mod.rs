//! Job record store: durable create / merge-update / point lookup by id.
//!
//! Two backends ship with the crate:
//!
//! * [`MemoryJobStore`]:  process-local, for tests and single-process runs.
//! * [`FileJobStore`]:    one JSON document per job under a directory,
//!   written atomically (temp file + rename) so a status reader never sees a
//!   half-written record.
//!
//! Both serialise writers per job id and never across ids: the map of
//! records is locked only long enough to fetch the per-record lock. All
//! validation lives in [`crate::job::JobRecord::apply`], so both backends
//! reject the same out-of-order or malformed writes.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use crate::error::StoreError;
use crate::job::{JobId, JobRecord, JobUpdate};
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a record in `queued`.
    ///
    /// Idempotent: if `id` exists with the same `source_path` the existing
    /// record is returned unchanged. A different path is a
    /// [`StoreError::Conflict`].
    async fn create(&self, id: &JobId, source_path: &Path) -> Result<JobRecord, StoreError>;

    /// Merge `update` into the record and return the result.
    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError>;

    /// Point lookup.
    async fn get(&self, id: &JobId) -> Result<JobRecord, StoreError>;
}

/// Shared `create` semantics for an id that already has a record.
pub(crate) fn existing_or_conflict(
    existing: JobRecord,
    source_path: &Path,
) -> Result<JobRecord, StoreError> {
    if existing.source_path == source_path {
        Ok(existing)
    } else {
        Err(StoreError::Conflict {
            id: existing.id,
            existing: existing.source_path,
        })
    }
}

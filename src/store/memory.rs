//! In-process record store.

use super::{existing_or_conflict, JobStore};
use crate::error::StoreError;
use crate::job::{JobId, JobRecord, JobUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Records held in memory, one lock per record.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<JobId, Arc<Mutex<JobRecord>>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn slot(&self, id: &JobId) -> Result<Arc<Mutex<JobRecord>>, StoreError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, id: &JobId, source_path: &Path) -> Result<JobRecord, StoreError> {
        id.validate()?;
        let mut records = self.records.write().await;
        if let Some(slot) = records.get(id) {
            let existing = slot.lock().await.clone();
            return existing_or_conflict(existing, source_path);
        }
        let record = JobRecord::new(id.clone(), source_path);
        records.insert(id.clone(), Arc::new(Mutex::new(record.clone())));
        debug!("Created job record {}", id);
        Ok(record)
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let slot = self.slot(id).await?;
        let mut record = slot.lock().await;
        record.apply(update)?;
        Ok(record.clone())
    }

    async fn get(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        let slot = self.slot(id).await?;
        let record = slot.lock().await;
        Ok(record.clone())
    }
}

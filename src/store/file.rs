//! Directory-backed record store: `{dir}/{job_id}.json`.
//!
//! Writes go to `{job_id}.json.tmp` and are renamed over the record, so a
//! concurrent `get` (from this process or an external status reader) sees
//! either the previous or the new version, never a partial one.

use super::{existing_or_conflict, JobStore};
use crate::error::StoreError;
use crate::job::{JobId, JobRecord, JobUpdate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct FileJobStore {
    dir: PathBuf,
    /// Serialises read-modify-write cycles per job id. Entries live only
    /// while some call holds or waits on them.
    locks: Mutex<HashMap<JobId, Arc<Mutex<()>>>>,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io {
                path: dir.clone(),
                source: e,
            })?;
        info!("Job record store at {}", dir.display());
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn lock_for(&self, id: &JobId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(id.clone()).or_default())
    }

    /// Drop the caller's handle and forget the lock if nobody else holds it.
    ///
    /// New handles are only cloned under the map lock, so a count of one
    /// (the map's own) means no caller can be holding or waiting on it.
    async fn release(&self, id: &JobId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if matches!(locks.get(id), Some(entry) if Arc::strong_count(entry) == 1) {
            locks.remove(id);
        }
    }

    async fn create_locked(&self, id: &JobId, source_path: &Path) -> Result<JobRecord, StoreError> {
        match self.read(id).await {
            Ok(existing) => existing_or_conflict(existing, source_path),
            Err(StoreError::NotFound { .. }) => {
                let record = JobRecord::new(id.clone(), source_path);
                self.write(&record).await?;
                debug!("Created job record {}", id);
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    async fn update_locked(&self, id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        let mut record = self.read(id).await?;
        record.apply(update)?;
        self.write(&record).await?;
        Ok(record)
    }

    async fn read(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        let path = self.record_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound { id: id.clone() })
            }
            Err(e) => return Err(StoreError::Io { path, source: e }),
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Serde { path, source: e })
    }

    async fn write(&self, record: &JobRecord) -> Result<(), StoreError> {
        let path = self.record_path(&record.id);
        let json = serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serde {
            path: path.clone(),
            source: e,
        })?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| StoreError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| StoreError::Io { path, source: e })
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn create(&self, id: &JobId, source_path: &Path) -> Result<JobRecord, StoreError> {
        id.validate()?;
        let lock = self.lock_for(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.create_locked(id, source_path).await
        };
        self.release(id, lock).await;
        result
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<JobRecord, StoreError> {
        id.validate()?;
        let lock = self.lock_for(id).await;
        let result = {
            let _guard = lock.lock().await;
            self.update_locked(id, update).await
        };
        self.release(id, lock).await;
        result
    }

    async fn get(&self, id: &JobId) -> Result<JobRecord, StoreError> {
        id.validate()?;
        self.read(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let id = JobId::from("65f1c0de");
        {
            let store = FileJobStore::open(tmp.path()).await.unwrap();
            store.create(&id, Path::new("/up/r.pdf")).await.unwrap();
            store
                .update(&id, JobUpdate::status(JobStatus::Processing))
                .await
                .unwrap();
        }
        let store = FileJobStore::open(tmp.path()).await.unwrap();
        let record = store.get(&id).await.unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.source_path, PathBuf::from("/up/r.pdf"));
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let tmp = TempDir::new().unwrap();
        let store = FileJobStore::open(tmp.path()).await.unwrap();
        let id = JobId::from("j1");
        store.create(&id, Path::new("/up/r.pdf")).await.unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["j1.json".to_string()]);
    }

    #[tokio::test]
    async fn reads_records_with_legacy_status_labels() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("old.json"),
            r#"{"id":"old","source_path":"/up/old.pdf","status":"converting to images success",
               "total_pages":2,"created_at":"2024-05-01T10:00:00Z","updated_at":"2024-05-01T10:00:05Z"}"#,
        )
        .unwrap();
        let store = FileJobStore::open(tmp.path()).await.unwrap();
        let record = store.get(&JobId::from("old")).await.unwrap();
        assert_eq!(record.status, JobStatus::ConvertingToImagesSuccess);
        assert_eq!(record.total_pages, Some(2));
    }

    #[tokio::test]
    async fn lock_map_is_empty_once_calls_finish() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileJobStore::open(tmp.path()).await.unwrap());
        for i in 0..50 {
            let id = JobId::from(format!("job-{i}"));
            store.create(&id, Path::new("/up/x.pdf")).await.unwrap();
            store
                .update(&id, JobUpdate::status(JobStatus::Processing))
                .await
                .unwrap();
            // Rejected writes release their lock too.
            assert!(store
                .update(&id, JobUpdate::status(JobStatus::Queued))
                .await
                .is_err());
        }

        let id = JobId::from("shared");
        store.create(&id, Path::new("/up/x.pdf")).await.unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let id = id.clone();
                tokio::spawn(async move { store.create(&id, Path::new("/up/x.pdf")).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert!(store.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn plain_processing_write_cannot_rewind_a_record() {
        let tmp = TempDir::new().unwrap();
        let store = FileJobStore::open(tmp.path()).await.unwrap();
        let id = JobId::from("rewind");
        store.create(&id, Path::new("/up/r.pdf")).await.unwrap();
        for status in [
            JobStatus::Processing,
            JobStatus::ConvertingToImages,
            JobStatus::ConvertingToImagesSuccess,
            JobStatus::Analyzing,
        ] {
            store.update(&id, JobUpdate::status(status)).await.unwrap();
        }

        let err = store
            .update(&id, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(store.get(&id).await.unwrap().status, JobStatus::Analyzing);

        let stale = store
            .update(&id, JobUpdate::start_from(JobStatus::ConvertingToImages))
            .await
            .unwrap_err();
        assert!(matches!(stale, StoreError::StaleStatus { .. }));
        let restarted = store
            .update(&id, JobUpdate::start_from(JobStatus::Analyzing))
            .await
            .unwrap();
        assert_eq!(restarted.status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn corrupt_record_is_a_serde_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("bad.json"), b"{not json").unwrap();
        let store = FileJobStore::open(tmp.path()).await.unwrap();
        let err = store.get(&JobId::from("bad")).await.unwrap_err();
        assert!(matches!(err, StoreError::Serde { .. }));
    }

    #[tokio::test]
    async fn concurrent_updates_to_different_ids_do_not_interfere() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileJobStore::open(tmp.path()).await.unwrap());
        let ids: Vec<JobId> = (0..8).map(|i| JobId::from(format!("job-{i}"))).collect();
        for id in &ids {
            store.create(id, Path::new("/up/x.pdf")).await.unwrap();
        }

        let tasks: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    store
                        .update(&id, JobUpdate::status(JobStatus::Processing))
                        .await
                        .unwrap();
                    store
                        .update(&id, JobUpdate::status(JobStatus::ConvertingToImages))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }

        for id in &ids {
            assert_eq!(
                store.get(id).await.unwrap().status,
                JobStatus::ConvertingToImages
            );
        }
    }
}

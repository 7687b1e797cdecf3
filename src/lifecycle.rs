//! Job lifecycle controller: drives one job from `queued` to a terminal state.
//!
//! ```text
//! get record ──▶ processing ──▶ converting_to_images ──▶ render
//!            ──▶ converting_to_images_success (+ total_pages)
//!            ──▶ analyzing ──▶ analyze
//!            ──▶ processed (+ result, processed_pages)
//! ```
//!
//! Every status is written to the [`JobStore`] before the work of that stage
//! starts, so a status reader always sees what the worker is doing.
//!
//! The first write claims the run with [`JobUpdate::start_from`], which only
//! succeeds if the record is still in the stage that was just read. A run
//! that loses the claim returns without writing anything else. Any fault
//! after the claim is caught in one place ([`LifecycleController::run`]),
//! written as `failed` with the fault's display string, and returned to the
//! caller unchanged.

use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::job::{JobId, JobRecord, JobStatus, JobUpdate};
use crate::pipeline::analyze::VisionAnalyzer;
use crate::pipeline::render::PageRenderer;
use crate::progress::{LifecycleObserver, Observer};
use crate::prompts::DEFAULT_INSTRUCTION;
use crate::store::JobStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

/// Sequences render and analysis for a job and persists each transition.
///
/// Holds no per-job state; one controller serves any number of concurrent
/// runs for distinct job ids.
#[derive(Clone)]
pub struct LifecycleController {
    store: Arc<dyn JobStore>,
    renderer: Arc<dyn PageRenderer>,
    analyzer: Arc<dyn VisionAnalyzer>,
    instruction: String,
    observer: Option<Observer>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn JobStore>,
        renderer: Arc<dyn PageRenderer>,
        analyzer: Arc<dyn VisionAnalyzer>,
    ) -> Self {
        Self {
            store,
            renderer,
            analyzer,
            instruction: DEFAULT_INSTRUCTION.to_string(),
            observer: None,
        }
    }

    /// Controller using the instruction configured in `config`.
    pub fn from_config(
        config: &WorkerConfig,
        store: Arc<dyn JobStore>,
        renderer: Arc<dyn PageRenderer>,
        analyzer: Arc<dyn VisionAnalyzer>,
    ) -> Self {
        Self::new(store, renderer, analyzer).with_instruction(config.instruction())
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Run the job to a terminal state.
    ///
    /// Returns the final record on success. On failure the record has been
    /// moved to `failed` (unless [`JobError::FailureNotRecorded`] says
    /// otherwise) and the original fault is returned.
    ///
    /// A missing record ([`JobError::RecordNotFound`]), a record that is
    /// already terminal ([`JobError::AlreadyTerminal`]) or a record that moved
    /// between the read and the claim ([`StoreError::StaleStatus`]) is
    /// reported without writing anything.
    ///
    /// [`StoreError::StaleStatus`]: crate::error::StoreError::StaleStatus
    pub async fn run(&self, job_id: &JobId, source: &Path) -> Result<JobRecord, JobError> {
        let span = info_span!("job", job_id = %job_id);
        self.run_inner(job_id, source).instrument(span).await
    }

    async fn run_inner(&self, job_id: &JobId, source: &Path) -> Result<JobRecord, JobError> {
        let record = self.store.get(job_id).await?;
        if record.is_terminal() {
            info!("Job already {}; nothing to do", record.status);
            return Err(JobError::AlreadyTerminal {
                id: job_id.clone(),
                status: record.status,
            });
        }
        if record.status != JobStatus::Queued {
            warn!(
                "Job was left in '{}' by an earlier attempt; restarting",
                record.status
            );
        }

        let start = Instant::now();
        info!("Starting job: {}", source.display());
        self.transition(job_id, JobUpdate::start_from(record.status))
            .await?;
        match self.steps(job_id, source).await {
            Ok(record) => {
                info!(
                    "Job processed: {} pages in {}ms",
                    record.processed_pages.unwrap_or_default(),
                    start.elapsed().as_millis()
                );
                Ok(record)
            }
            Err(cause) => Err(self.record_failure(job_id, cause).await),
        }
    }

    async fn steps(&self, job_id: &JobId, source: &Path) -> Result<JobRecord, JobError> {
        self.transition(job_id, JobUpdate::status(JobStatus::ConvertingToImages))
            .await?;

        let pages = self.renderer.render(job_id, source).await?;
        let page_count = pages.len();
        self.transition(
            job_id,
            JobUpdate::status(JobStatus::ConvertingToImagesSuccess).with_total_pages(page_count),
        )
        .await?;
        self.notify(|o| o.on_rendered(job_id, page_count));

        self.transition(job_id, JobUpdate::status(JobStatus::Analyzing))
            .await?;
        let result = self.analyzer.analyze(&pages, &self.instruction).await?;
        let result_len = result.len();

        let record = self
            .transition(job_id, JobUpdate::processed(result, page_count))
            .await?;
        self.notify(|o| o.on_processed(job_id, result_len));
        Ok(record)
    }

    /// Persist `update` and tell the observer about the new status.
    async fn transition(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord, JobError> {
        let record = self.store.update(job_id, update).await?;
        self.notify(|o| o.on_status(job_id, record.status));
        Ok(record)
    }

    /// Write `failed` for `cause` and hand back the error the caller sees.
    async fn record_failure(&self, job_id: &JobId, cause: JobError) -> JobError {
        let message = cause.to_string();
        error!("Job failed: {}", message);

        match self.store.update(job_id, JobUpdate::failed(message.clone())).await {
            Ok(_) => {
                self.notify(|o| o.on_status(job_id, JobStatus::Failed));
                self.notify(|o| o.on_failed(job_id, &message));
                cause
            }
            Err(store_error) => {
                error!("Could not record failure: {}", store_error);
                JobError::FailureNotRecorded {
                    cause: Box::new(cause),
                    store_error,
                }
            }
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn LifecycleObserver)) {
        if let Some(ref observer) = self.observer {
            f(observer.as_ref());
        }
    }
}

//! Dispatch boundary: turns at-least-once deliveries into controller runs.
//!
//! A [`Delivery`] names a job id and its source document. The [`Dispatcher`]
//! creates the job record if needed (idempotently), runs the
//! [`LifecycleController`], and decides what to do with the outcome:
//!
//! * terminal outcome (`processed` / `failed` recorded) → acknowledge
//! * fault that left the record non-terminal → redeliver with exponential
//!   backoff, up to [`RetryPolicy::max_attempts`], then dead-letter
//! * job already running in this dispatcher, or claimed by another worker
//!   sharing the store → acknowledge as [`DispatchOutcome::AlreadyInFlight`]
//!   without touching the record
//!
//! After a terminal outcome the [`RetentionPolicy`] decides whether the job's
//! rendered pages are purged.
//!
//! [`JobQueue`] is the in-process producer; [`Dispatcher::run_queue`]
//! consumes it with bounded concurrency until every sender is dropped.

use crate::config::{RetentionPolicy, WorkerConfig};
use crate::error::{JobError, StoreError};
use crate::job::{JobId, JobRecord, JobStatus};
use crate::lifecycle::LifecycleController;
use crate::pipeline::pages::PageStore;
use crate::progress::Observer;
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

// ── Delivery ─────────────────────────────────────────────────────────────

/// One request to process a job. May arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub job_id: JobId,
    pub source_path: PathBuf,
}

impl Delivery {
    pub fn new(job_id: JobId, source_path: impl Into<PathBuf>) -> Self {
        Self {
            job_id,
            source_path: source_path.into(),
        }
    }
}

/// Redelivery budget for faults that left a record non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Minimum 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Wait before attempt `attempt` (2-based; attempt 1 never waits).
    ///
    /// 500 ms base → 500 ms, 1 s, 2 s, …
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// How a delivery was acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The job reached `processed`.
    Processed,
    /// The job reached `failed`; carries the recorded error.
    Failed(String),
    /// The record was already in this terminal status; nothing was written.
    AlreadyTerminal(JobStatus),
    /// Another delivery for the same id is running, here or in another
    /// worker sharing the store.
    AlreadyInFlight,
    /// Retryable faults exhausted the retry budget. See
    /// [`Dispatcher::take_dead_letters`].
    DeadLettered,
}

impl DispatchOutcome {
    /// Whether the job's record holds a result after this acknowledgement.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DispatchOutcome::Processed | DispatchOutcome::AlreadyTerminal(JobStatus::Processed)
        )
    }
}

/// A delivery given up on while its record was still non-terminal.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub delivery: Delivery,
    pub attempts: u32,
    pub error: String,
}

/// Per-outcome counts from [`Dispatcher::run_queue`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub processed: usize,
    pub failed: usize,
    pub already_terminal: usize,
    pub already_in_flight: usize,
    pub dead_lettered: usize,
    /// Deliveries whose record ended up `processed`, including ones that
    /// already were.
    pub succeeded: usize,
}

impl DispatchReport {
    fn record(&mut self, outcome: &DispatchOutcome) {
        if outcome.is_success() {
            self.succeeded += 1;
        }
        match outcome {
            DispatchOutcome::Processed => self.processed += 1,
            DispatchOutcome::Failed(_) => self.failed += 1,
            DispatchOutcome::AlreadyTerminal(_) => self.already_terminal += 1,
            DispatchOutcome::AlreadyInFlight => self.already_in_flight += 1,
            DispatchOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed
            + self.failed
            + self.already_terminal
            + self.already_in_flight
            + self.dead_lettered
    }
}

// ── JobQueue ─────────────────────────────────────────────────────────────

/// Producer handle for [`Dispatcher::run_queue`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<Delivery>,
}

impl JobQueue {
    /// Bounded queue holding up to `capacity` pending deliveries.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a delivery, waiting for space if the queue is full.
    pub async fn enqueue(&self, delivery: Delivery) -> Result<(), JobError> {
        self.sender
            .send(delivery)
            .await
            .map_err(|e| JobError::Internal(format!("job queue closed; dropped {}", e.0.job_id)))
    }

    pub async fn submit(&self, job_id: JobId, source_path: impl Into<PathBuf>) -> Result<(), JobError> {
        self.enqueue(Delivery::new(job_id, source_path)).await
    }
}

// ── Dispatcher ───────────────────────────────────────────────────────────

type InFlight = Arc<Mutex<HashSet<JobId>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Removes its job id from the in-flight set when dropped.
struct InFlightGuard {
    set: InFlight,
    job_id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.job_id);
    }
}

/// Runs deliveries through a [`LifecycleController`].
pub struct Dispatcher {
    controller: LifecycleController,
    retry: RetryPolicy,
    concurrency: usize,
    retention: RetentionPolicy,
    pages: Option<Arc<dyn PageStore>>,
    observer: Option<Observer>,
    in_flight: InFlight,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl Dispatcher {
    /// Dispatcher with default retry policy, concurrency 4 and no retention.
    pub fn new(controller: LifecycleController) -> Self {
        Self {
            controller,
            retry: RetryPolicy::default(),
            concurrency: 4,
            retention: RetentionPolicy::Keep,
            pages: None,
            observer: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Dispatcher with retry, concurrency and retention taken from `config`.
    pub fn from_config(
        config: &WorkerConfig,
        controller: LifecycleController,
        pages: Arc<dyn PageStore>,
    ) -> Self {
        Self::new(controller)
            .with_retry(RetryPolicy::from_config(config))
            .with_concurrency(config.concurrency)
            .with_retention(config.retention, pages)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_retention(mut self, policy: RetentionPolicy, pages: Arc<dyn PageStore>) -> Self {
        self.retention = policy;
        self.pages = Some(pages);
        self
    }

    /// Report every acknowledgement to `observer`.
    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Remove and return the deliveries that exhausted the retry budget,
    /// oldest first.
    pub fn take_dead_letters(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *lock(&self.dead_letters))
    }

    fn claim(&self, job_id: &JobId) -> Option<InFlightGuard> {
        let mut set = lock(&self.in_flight);
        if !set.insert(job_id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            job_id: job_id.clone(),
        })
    }

    /// Process one delivery to an acknowledgement.
    pub async fn dispatch(&self, delivery: Delivery) -> DispatchOutcome {
        let job_id = delivery.job_id.clone();
        let outcome = self.dispatch_inner(delivery).await;
        if let Some(ref observer) = self.observer {
            observer.on_acknowledged(&job_id, &outcome);
        }
        outcome
    }

    async fn dispatch_inner(&self, delivery: Delivery) -> DispatchOutcome {
        let Some(_guard) = self.claim(&delivery.job_id) else {
            info!("Job {} is already running; skipping delivery", delivery.job_id);
            return DispatchOutcome::AlreadyInFlight;
        };

        let mut attempt = 1;
        loop {
            match self.attempt(&delivery).await {
                Ok(_) => {
                    self.apply_retention(&delivery.job_id, JobStatus::Processed)
                        .await;
                    return DispatchOutcome::Processed;
                }
                Err(JobError::AlreadyTerminal { status, .. }) => {
                    return DispatchOutcome::AlreadyTerminal(status)
                }
                Err(JobError::Store(StoreError::StaleStatus { actual, .. })) => {
                    if let Some(record) = self.terminal_record(&delivery.job_id).await {
                        return DispatchOutcome::AlreadyTerminal(record.status);
                    }
                    info!(
                        "Job {} moved to '{}' under another worker; skipping delivery",
                        delivery.job_id, actual
                    );
                    return DispatchOutcome::AlreadyInFlight;
                }
                Err(e @ JobError::Store(StoreError::Conflict { .. })) => {
                    return DispatchOutcome::Failed(e.to_string())
                }
                Err(e) if e.is_retryable() => {
                    // A transient store fault mid-run may still have been
                    // followed by a successful `failed` write.
                    if let Some(record) = self.terminal_record(&delivery.job_id).await {
                        return self.acknowledge_terminal(record).await;
                    }
                    if attempt >= self.retry.max_attempts {
                        error!(
                            "Job {}: giving up after {} attempts: {}",
                            delivery.job_id, attempt, e
                        );
                        lock(&self.dead_letters).push(DeadLetter {
                            delivery,
                            attempts: attempt,
                            error: e.to_string(),
                        });
                        return DispatchOutcome::DeadLettered;
                    }
                    attempt += 1;
                    let delay = self.retry.delay_before(attempt);
                    warn!(
                        "Job {}: attempt {}/{} after {}ms: {}",
                        delivery.job_id,
                        attempt,
                        self.retry.max_attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if let Some(record) = self.terminal_record(&delivery.job_id).await {
                        return self.acknowledge_terminal(record).await;
                    }
                    return DispatchOutcome::Failed(e.to_string());
                }
            }
        }
    }

    async fn attempt(&self, delivery: &Delivery) -> Result<JobRecord, JobError> {
        self.controller
            .store()
            .create(&delivery.job_id, &delivery.source_path)
            .await?;
        self.controller
            .run(&delivery.job_id, &delivery.source_path)
            .await
    }

    async fn terminal_record(&self, job_id: &JobId) -> Option<JobRecord> {
        match self.controller.store().get(job_id).await {
            Ok(record) if record.is_terminal() => Some(record),
            _ => None,
        }
    }

    async fn acknowledge_terminal(&self, record: JobRecord) -> DispatchOutcome {
        self.apply_retention(&record.id, record.status).await;
        match record.status {
            JobStatus::Processed => DispatchOutcome::Processed,
            _ => DispatchOutcome::Failed(record.error.unwrap_or_default()),
        }
    }

    async fn apply_retention(&self, job_id: &JobId, status: JobStatus) {
        let purge = match (self.retention, status) {
            (RetentionPolicy::PurgeOnSuccess, JobStatus::Processed) => true,
            (RetentionPolicy::PurgeOnTerminal, s) => s.is_terminal(),
            _ => false,
        };
        let Some(pages) = self.pages.as_ref().filter(|_| purge) else {
            return;
        };

        let pages = Arc::clone(pages);
        let id = job_id.clone();
        match tokio::task::spawn_blocking(move || pages.purge(&id)).await {
            Ok(Ok(removed)) => debug!("Job {}: retention purge (removed: {})", job_id, removed),
            Ok(Err(e)) => warn!("Job {}: retention purge failed: {}", job_id, e),
            Err(e) => warn!("Job {}: retention purge panicked: {}", job_id, e),
        }
    }

    /// Consume deliveries until every [`JobQueue`] sender is dropped,
    /// running up to `concurrency` jobs at once.
    pub async fn run_queue(&self, receiver: mpsc::Receiver<Delivery>) -> DispatchReport {
        info!("Dispatcher started (concurrency {})", self.concurrency);
        let outcomes: Vec<DispatchOutcome> = ReceiverStream::new(receiver)
            .map(|delivery| async move {
                let job_id = delivery.job_id.clone();
                let outcome = self.dispatch(delivery).await;
                debug!("Job {} acknowledged: {:?}", job_id, outcome);
                outcome
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        for outcome in &outcomes {
            report.record(outcome);
        }
        info!(
            "Dispatcher drained: {} processed, {} failed, {} dead-lettered",
            report.processed, report.failed, report.dead_lettered
        );
        report
    }
}

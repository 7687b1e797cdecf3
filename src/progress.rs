//! Observer trait for job lifecycle events.
//!
//! Attach an [`Arc<dyn LifecycleObserver>`] to a
//! [`crate::lifecycle::LifecycleController`] to be told about every status
//! change after it has been durably written. The CLI uses this to drive a
//! spinner; a server could forward events to a broadcast channel or a
//! WebSocket. The record store stays the source of truth; observers only
//! get a best-effort echo of it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfjob::{JobId, JobStatus, LifecycleObserver};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Default)]
//! struct Trail(Mutex<Vec<JobStatus>>);
//!
//! impl LifecycleObserver for Trail {
//!     fn on_status(&self, _job_id: &JobId, status: JobStatus) {
//!         self.0.lock().unwrap().push(status);
//!     }
//! }
//!
//! let trail: Arc<dyn LifecycleObserver> = Arc::new(Trail::default());
//! trail.on_status(&JobId::from("a"), JobStatus::Processing);
//! ```

use crate::dispatch::DispatchOutcome;
use crate::job::{JobId, JobStatus};
use std::sync::Arc;

/// Receives lifecycle events from the controller.
///
/// Implementations must be `Send + Sync`: a dispatcher runs many jobs
/// concurrently and every one of them reports through the same observer.
/// All methods default to no-ops.
pub trait LifecycleObserver: Send + Sync {
    /// A status was written for `job_id`.
    fn on_status(&self, job_id: &JobId, status: JobStatus) {
        let _ = (job_id, status);
    }

    /// Rendering finished with `total_pages` images.
    fn on_rendered(&self, job_id: &JobId, total_pages: usize) {
        let _ = (job_id, total_pages);
    }

    /// The job reached `processed`.
    ///
    /// * `result_len`:  byte length of the stored result text
    fn on_processed(&self, job_id: &JobId, result_len: usize) {
        let _ = (job_id, result_len);
    }

    /// The job reached `failed` with the recorded `error`.
    fn on_failed(&self, job_id: &JobId, error: &str) {
        let _ = (job_id, error);
    }

    /// A [`crate::dispatch::Dispatcher`] acknowledged a delivery for
    /// `job_id`. Called exactly once per delivery, whatever the outcome.
    fn on_acknowledged(&self, job_id: &JobId, outcome: &DispatchOutcome) {
        let _ = (job_id, outcome);
    }
}

/// The default observer.
pub struct NoopObserver;

impl LifecycleObserver for NoopObserver {}

/// Shared observer handle as stored by the controller.
pub type Observer = Arc<dyn LifecycleObserver>;

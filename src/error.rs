//! Error types for the edgequake-pdfjob library.
//!
//! Each collaborator of the lifecycle controller has its own error type so
//! the cause string of a fault survives unchanged all the way into the job
//! record:
//!
//! * [`RenderError`]:    the source document could not be read or decoded.
//! * [`StorageError`]:   a rendered page image could not be persisted.
//! * [`AnalysisError`]:  the vision model failed, timed out, or answered
//!   with nothing usable.
//! * [`StoreError`]:     the job record store rejected or failed an operation.
//!
//! [`JobError`] is what [`crate::lifecycle::LifecycleController::run`]
//! returns. Its `Display` output is exactly the text written into the
//! record's `error` field, so what an operator reads from `pdfjob status`
//! matches what the dispatcher logged.

use crate::job::{JobId, JobStatus};
use std::path::PathBuf;
use thiserror::Error;

// ── Render errors ──────────────────────────────────────────────────────────

/// The source document could not be turned into page images.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("PDF file not found: '{path}'")]
    NotFound { path: PathBuf },

    #[error("Permission denied reading '{path}'")]
    PermissionDenied { path: PathBuf },

    /// The file exists, but does not start with the `%PDF` magic bytes.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: Vec<u8> },

    /// pdfium could not parse the document structure.
    #[error("PDF '{path}' is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("PDF '{path}' has no pages")]
    EmptyDocument { path: PathBuf },

    /// Could not bind to a pdfium shared library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFJOB_PDFIUM_LIB_PATH to the directory containing libpdfium."
    )]
    PdfiumUnavailable(String),

    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },
}

// ── Storage errors ─────────────────────────────────────────────────────────

/// A page image could not be written to (or read back from) page storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create image directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write page image '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode page {page} as {format}: {detail}")]
    Encode {
        page: usize,
        format: &'static str,
        detail: String,
    },

    #[error("Failed to read page image '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove images for job '{job_id}': {source}")]
    Purge {
        job_id: JobId,
        #[source]
        source: std::io::Error,
    },
}

// ── Analysis errors ────────────────────────────────────────────────────────

/// The vision model call did not produce usable text.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The configured provider cannot be used (missing API key, unknown name).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    #[error("LLM API error: {message}")]
    Api { message: String },

    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("LLM returned an empty response for {pages} page(s)")]
    EmptyResponse { pages: usize },

    #[error("No page images to analyse")]
    NoImages,

    /// A stored page image could not be loaded for the request.
    #[error("Failed to load page image '{path}': {detail}")]
    Encode { path: PathBuf, detail: String },
}

// ── Record store errors ────────────────────────────────────────────────────

/// Errors from [`crate::store::JobStore`] implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job record not found: '{id}'")]
    NotFound { id: JobId },

    /// `create` was called for an existing id with a different source path.
    #[error("Job '{id}' already exists with source '{existing}'")]
    Conflict { id: JobId, existing: PathBuf },

    #[error("Invalid status transition for job '{id}': {from} → {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// A compare-and-set update found the record in a different status than
    /// the caller last read.
    #[error("Job '{id}' is in '{actual}', expected '{expected}'")]
    StaleStatus {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The update tried to set a write-once field, or set it alongside the
    /// wrong status.
    #[error("Rejected update to '{field}' on job '{id}': {reason}")]
    RejectedField {
        id: JobId,
        field: &'static str,
        reason: &'static str,
    },

    #[error("Invalid job id '{0}'")]
    InvalidId(String),

    #[error("Record store I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt job record '{path}': {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Validation failures are deterministic: retrying the same write fails
    /// the same way.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. }
                | StoreError::Conflict { .. }
                | StoreError::InvalidTransition { .. }
                | StoreError::StaleStatus { .. }
                | StoreError::RejectedField { .. }
                | StoreError::InvalidId(_)
        )
    }
}

// ── Top-level job error ────────────────────────────────────────────────────

/// All errors returned by a lifecycle run.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Page storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Analysis failed: {0}")]
    Analysis(#[from] AnalysisError),

    /// The job id is not in the record store. Nothing was written.
    #[error("Job record not found: '{id}'")]
    RecordNotFound { id: JobId },

    /// The job already reached `processed` or `failed`. Nothing was written.
    #[error("Job '{id}' is already terminal (status: {status})")]
    AlreadyTerminal { id: JobId, status: JobStatus },

    #[error("Record store error: {0}")]
    Store(StoreError),

    /// The run failed and the `failed` transition could not be persisted
    /// either, so the record is still in a non-terminal stage.
    #[error("{cause} (and recording the failure also failed: {store_error})")]
    FailureNotRecorded {
        cause: Box<JobError>,
        store_error: StoreError,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for JobError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { id } => JobError::RecordNotFound { id },
            other => JobError::Store(other),
        }
    }
}

impl JobError {
    /// Whether a dispatcher should redeliver the job.
    ///
    /// Only failures that left the record non-terminal qualify. Render and
    /// analysis faults are recorded as `failed`, and a redelivery would just
    /// hit [`JobError::AlreadyTerminal`].
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Store(e) => !e.is_validation(),
            JobError::FailureNotRecorded { store_error, .. } => !store_error.is_validation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_error_display_is_preserved_through_job_error() {
        let e: JobError = RenderError::Corrupt {
            path: "/tmp/a.pdf".into(),
            detail: "bad xref".into(),
        }
        .into();
        let msg = e.to_string();
        assert!(msg.starts_with("Render failed"), "got: {msg}");
        assert!(msg.contains("bad xref"), "got: {msg}");
    }

    #[test]
    fn store_not_found_maps_to_record_not_found() {
        let e: JobError = StoreError::NotFound {
            id: JobId::from("abc"),
        }
        .into();
        assert!(matches!(e, JobError::RecordNotFound { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn io_store_errors_are_retryable() {
        let e: JobError = StoreError::Io {
            path: "/data/jobs/x.json".into(),
            source: std::io::Error::other("disk full"),
        }
        .into();
        assert!(e.is_retryable());
    }

    #[test]
    fn recorded_failures_are_not_retryable() {
        let e: JobError = AnalysisError::Timeout { secs: 60 }.into();
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("60s"));
    }

    #[test]
    fn failure_not_recorded_mentions_both_causes() {
        let e = JobError::FailureNotRecorded {
            cause: Box::new(AnalysisError::Api {
                message: "503".into(),
            }
            .into()),
            store_error: StoreError::Io {
                path: "/data/jobs/x.json".into(),
                source: std::io::Error::other("read-only fs"),
            },
        };
        let msg = e.to_string();
        assert!(msg.contains("503"), "got: {msg}");
        assert!(msg.contains("read-only fs"), "got: {msg}");
        assert!(e.is_retryable());
    }
}

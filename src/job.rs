//! Job record model and the lifecycle transition table.
//!
//! A [`JobRecord`] is the single durable view of one submitted document.
//! Every change to it goes through [`JobRecord::apply`], which merges a
//! [`JobUpdate`] after validating it against [`JobStatus::can_transition_to`]
//! and the write-once rules for `result` and `error`. Stores call `apply`
//! rather than assigning fields, so the invariants hold no matter which
//! backend holds the data.
//!
//! ```text
//! queued → processing → converting_to_images → converting_to_images_success
//!        → analyzing → processed
//!
//! any non-terminal stage → failed      (absorbing)
//! ```
//!
//! A run left mid-flight by a crashed worker is restarted with
//! [`JobUpdate::start_from`], a compare-and-set that moves the record back to
//! `processing` only if it is still in the stage the new run observed. A
//! plain status write never moves a record backwards.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// ── JobId ────────────────────────────────────────────────────────────────

/// Stable identifier of a job; the only key records are addressed by.
///
/// Ids double as directory names for rendered pages and record files, so
/// [`JobId::validate`] only admits ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id (UUID v4, hyphenated).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Parse and validate an externally supplied id.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let id = Self(s.to_string());
        id.validate()?;
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reject ids that are empty, overly long, or could escape a directory.
    pub fn validate(&self) -> Result<(), StoreError> {
        let ok = !self.0.is_empty()
            && self.0.len() <= 128
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if ok {
            Ok(())
        } else {
            Err(StoreError::InvalidId(self.0.clone()))
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── JobStatus ────────────────────────────────────────────────────────────

/// Lifecycle stage of a job.
///
/// Serialised in snake_case. The human-readable labels written by earlier
/// workers (`"converting to images"`, `"analyzing with AI"`, …) are accepted
/// as aliases when reading records back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    #[serde(alias = "converting to images")]
    ConvertingToImages,
    #[serde(alias = "converting to images success")]
    ConvertingToImagesSuccess,
    #[serde(alias = "analyzing with AI")]
    Analyzing,
    Processed,
    Failed,
}

impl JobStatus {
    /// Every status, in lifecycle order (`Failed` last).
    pub const ALL: [JobStatus; 7] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::ConvertingToImages,
        JobStatus::ConvertingToImagesSuccess,
        JobStatus::Analyzing,
        JobStatus::Processed,
        JobStatus::Failed,
    ];

    /// Persisted spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::ConvertingToImages => "converting_to_images",
            JobStatus::ConvertingToImagesSuccess => "converting_to_images_success",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
        }
    }

    /// Human-readable label for status displays.
    pub fn label(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::ConvertingToImages => "converting to images",
            JobStatus::ConvertingToImagesSuccess => "converting to images success",
            JobStatus::Analyzing => "analyzing with AI",
            JobStatus::Processed => "processed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Processed | JobStatus::Failed)
    }

    /// The next stage on the success path, if any.
    pub fn successor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Queued => Some(JobStatus::Processing),
            JobStatus::Processing => Some(JobStatus::ConvertingToImages),
            JobStatus::ConvertingToImages => Some(JobStatus::ConvertingToImagesSuccess),
            JobStatus::ConvertingToImagesSuccess => Some(JobStatus::Analyzing),
            JobStatus::Analyzing => Some(JobStatus::Processed),
            JobStatus::Processed | JobStatus::Failed => None,
        }
    }

    /// The transition table: one step forward, or to `failed`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == JobStatus::Failed || self.successor() == Some(next)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status string that matches neither a persisted spelling nor a label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown job status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s || st.label() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

// ── JobUpdate ────────────────────────────────────────────────────────────

/// A partial update. `None` fields are left untouched by [`JobRecord::apply`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Apply only if the record is currently in this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<JobStatus>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Move to `processing` if the record is still in `observed`.
    ///
    /// From `queued` this is the ordinary first step; from a later
    /// non-terminal stage it restarts a run abandoned by an earlier attempt.
    pub fn start_from(observed: JobStatus) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            expected_status: Some(observed),
            ..Default::default()
        }
    }

    pub fn with_total_pages(mut self, n: usize) -> Self {
        self.total_pages = Some(n);
        self
    }

    /// Terminal success: `processed` + result + processed page count.
    pub fn processed(result: impl Into<String>, pages: usize) -> Self {
        Self {
            status: Some(JobStatus::Processed),
            processed_pages: Some(pages),
            result: Some(result.into()),
            ..Default::default()
        }
    }

    /// Terminal failure: `failed` + error description.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ── JobRecord ────────────────────────────────────────────────────────────

/// Durable record of one processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub source_path: PathBuf,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_pages: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// A freshly submitted job in `queued`.
    pub fn new(id: JobId, source_path: impl AsRef<Path>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_path: source_path.as_ref().to_path_buf(),
            status: JobStatus::Queued,
            total_pages: None,
            processed_pages: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Validate `update` against the current state, then merge it.
    ///
    /// On error the record is left unchanged.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), StoreError> {
        self.check(&update)?;

        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(n) = update.total_pages {
            self.total_pages = Some(n);
        }
        if let Some(n) = update.processed_pages {
            self.processed_pages = Some(n);
        }
        if update.result.is_some() {
            self.result = update.result;
        }
        if update.error.is_some() {
            self.error = update.error;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    fn check(&self, update: &JobUpdate) -> Result<(), StoreError> {
        let reject = |field: &'static str, reason: &'static str| StoreError::RejectedField {
            id: self.id.clone(),
            field,
            reason,
        };

        if let Some(expected) = update.expected_status {
            if self.status != expected {
                return Err(StoreError::StaleStatus {
                    id: self.id.clone(),
                    expected,
                    actual: self.status,
                });
            }
        }

        if let Some(next) = update.status {
            let restart = next == JobStatus::Processing
                && update.expected_status.is_some()
                && !self.is_terminal();
            if !restart && !self.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.status,
                    to: next,
                });
            }
        } else if self.is_terminal() && !update.is_empty() {
            return Err(reject("status", "job is already terminal"));
        }

        let target = update.status.unwrap_or(self.status);

        match &update.result {
            Some(_) if target != JobStatus::Processed => {
                return Err(reject("result", "result can only be set with status 'processed'"))
            }
            Some(r) if r.trim().is_empty() => {
                return Err(reject("result", "result must not be empty"))
            }
            None if target == JobStatus::Processed && self.result.is_none() => {
                return Err(reject("result", "status 'processed' requires a result"))
            }
            _ => {}
        }

        match &update.error {
            Some(_) if target != JobStatus::Failed => {
                return Err(reject("error", "error can only be set with status 'failed'"))
            }
            Some(e) if e.trim().is_empty() => {
                return Err(reject("error", "error must not be empty"))
            }
            None if target == JobStatus::Failed && self.error.is_none() => {
                return Err(reject("error", "status 'failed' requires an error"))
            }
            _ => {}
        }

        Ok(())
    }
}

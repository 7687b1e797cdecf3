//! Configuration for the job worker.
//!
//! Everything a worker needs is injected through [`WorkerConfig`] (built via
//! [`WorkerConfigBuilder`]) and, for the vision model, [`AnalyzerConfig`].
//! Nothing here reads the environment or probes the host: the CLI maps
//! flags and `PDFJOB_*` variables onto the builder, and library callers set
//! fields explicitly. `build()` validates before anything touches disk.

use crate::error::JobError;
use crate::prompts::DEFAULT_INSTRUCTION;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Worker configuration shared by the renderer, stores and dispatcher.
///
/// # Example
/// ```rust
/// use edgequake_pdfjob::{RetentionPolicy, WorkerConfig};
///
/// let config = WorkerConfig::builder()
///     .store_dir("/var/lib/pdfjob/jobs")
///     .image_root("/var/lib/pdfjob/images")
///     .concurrency(8)
///     .retention(RetentionPolicy::PurgeOnSuccess)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Directory holding one JSON record per job. Default: `data/jobs`.
    pub store_dir: PathBuf,

    /// Root directory for rendered pages; each job gets `{image_root}/{job_id}/`.
    /// Default: `data/images`.
    pub image_root: PathBuf,

    /// Encoding for stored page images. Default: PNG.
    pub image_format: ImageFormat,

    /// Longest edge of a rendered page in pixels. Default: 2000.
    ///
    /// Caps memory independent of the physical page size; an A0 poster
    /// rendered at print resolution would otherwise allocate hundreds of MB.
    pub max_rendered_pixels: u32,

    /// Directory containing the pdfium shared library. `None` binds to the
    /// system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Instruction sent with the page images. `None` uses
    /// [`DEFAULT_INSTRUCTION`].
    pub instruction: Option<String>,

    /// Jobs processed at the same time by one dispatcher. Default: 4.
    pub concurrency: usize,

    /// Delivery attempts before a job is dead-lettered. Default: 3.
    pub max_attempts: u32,

    /// Initial redelivery delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// When rendered page images are deleted. Default: keep.
    pub retention: RetentionPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("data/jobs"),
            image_root: PathBuf::from("data/images"),
            image_format: ImageFormat::default(),
            max_rendered_pixels: 2000,
            pdfium_lib_path: None,
            instruction: None,
            concurrency: 4,
            max_attempts: 3,
            retry_backoff_ms: 500,
            retention: RetentionPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder {
            config: Self::default(),
        }
    }

    /// The instruction actually sent to the vision model.
    pub fn instruction(&self) -> &str {
        self.instruction.as_deref().unwrap_or(DEFAULT_INSTRUCTION)
    }
}

/// Builder for [`WorkerConfig`].
#[derive(Debug)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.store_dir = dir.into();
        self
    }

    pub fn image_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_root = dir.into();
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px;
        self
    }

    pub fn pdfium_lib_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(dir.into());
        self
    }

    pub fn instruction(mut self, text: impl Into<String>) -> Self {
        self.config.instruction = Some(text.into());
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn retention(mut self, policy: RetentionPolicy) -> Self {
        self.config.retention = policy;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<WorkerConfig, JobError> {
        let c = &self.config;
        if c.store_dir.as_os_str().is_empty() || c.image_root.as_os_str().is_empty() {
            return Err(JobError::InvalidConfig(
                "store_dir and image_root must be set".into(),
            ));
        }
        if c.store_dir == c.image_root {
            return Err(JobError::InvalidConfig(format!(
                "store_dir and image_root must differ (both '{}')",
                c.store_dir.display()
            )));
        }
        if !(100..=10_000).contains(&c.max_rendered_pixels) {
            return Err(JobError::InvalidConfig(format!(
                "max_rendered_pixels must be 100–10000, got {}",
                c.max_rendered_pixels
            )));
        }
        if c.concurrency == 0 {
            return Err(JobError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if c.max_attempts == 0 {
            return Err(JobError::InvalidConfig("max_attempts must be ≥ 1".into()));
        }
        if matches!(c.instruction.as_deref(), Some(s) if s.trim().is_empty()) {
            return Err(JobError::InvalidConfig("instruction must not be empty".into()));
        }
        Ok(self.config)
    }
}

/// Vision model settings for [`crate::pipeline::analyze::LlmVisionAnalyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Provider name understood by `edgequake_llm::ProviderFactory`
    /// (`openai`, `anthropic`, `gemini`, `azure`, `mistral`, `ollama`, …).
    pub provider: String,

    /// Model id. Must accept image input.
    pub model: String,

    /// Sampling temperature. Default: 0.7; the analysis is a critique, not a
    /// transcription, so some variety is wanted.
    pub temperature: f32,

    /// Output token ceiling for the whole document. Default: 4096.
    pub max_tokens: usize,

    /// Timeout for the single analysis call in seconds. Default: 120.
    pub timeout_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4.1-nano".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl AnalyzerConfig {
    /// Environment variable holding the provider's API key, or `None` for
    /// local providers that need no credential.
    pub fn credential_var(&self) -> Option<&'static str> {
        match self.provider.to_ascii_lowercase().as_str() {
            "openai" => Some("OPENAI_API_KEY"),
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "gemini" | "google" => Some("GEMINI_API_KEY"),
            "azure" => Some("AZURE_OPENAI_API_KEY"),
            "mistral" => Some("MISTRAL_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.provider.trim().is_empty() || self.model.trim().is_empty() {
            return Err(JobError::InvalidConfig(
                "analyzer provider and model must be set".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(JobError::InvalidConfig(format!(
                "temperature must be 0.0–2.0, got {}",
                self.temperature
            )));
        }
        if self.timeout_secs == 0 {
            return Err(JobError::InvalidConfig("timeout_secs must be ≥ 1".into()));
        }
        Ok(())
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Encoding used for stored page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Lossless; keeps small print crisp for the vision model. (default)
    #[default]
    Png,
    /// Smaller files at the cost of compression artefacts on text.
    Jpeg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Infer the format from a stored file's extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// When the dispatcher deletes a job's rendered page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Never delete; cleanup is left to an operator (`pdfjob purge`). (default)
    #[default]
    Keep,
    /// Delete once the job reaches `processed`; failed jobs keep their pages
    /// for inspection.
    PurgeOnSuccess,
    /// Delete once the job reaches any terminal state.
    PurgeOnTerminal,
}

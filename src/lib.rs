//! # edgequake-pdfjob
//!
//! Background worker for PDF analysis jobs: render every page of a submitted
//! document to an image, send the images to a vision-capable LLM with a fixed
//! instruction, and keep a durable job record whose status tracks each step.
//!
//! ## Lifecycle
//!
//! ```text
//! queued ─▶ processing ─▶ converting_to_images ─▶ converting_to_images_success
//!        ─▶ analyzing ─▶ processed
//!                 └──────────────▶ failed   (from any non-terminal stage)
//! ```
//!
//! * [`store`]:      job record persistence ([`JobStore`]: memory or one JSON
//!   file per job)
//! * [`pipeline`]:   rendering (pdfium), page storage, image encoding, the
//!   vision call and result cleanup
//! * [`lifecycle`]:  [`LifecycleController`], which sequences one job and
//!   records every transition
//! * [`dispatch`]:   [`Dispatcher`], which turns at-least-once deliveries into
//!   controller runs with retry, dead-lettering and image retention
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfjob::{
//!     AnalyzerConfig, Delivery, Dispatcher, FileJobStore, FsPageStore, JobId,
//!     LifecycleController, LlmVisionAnalyzer, PdfiumRenderer, WorkerConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkerConfig::builder().build()?;
//!     let store = Arc::new(FileJobStore::open(&config.store_dir).await?);
//!     let pages = Arc::new(FsPageStore::new(&config.image_root, config.image_format));
//!     let renderer = Arc::new(PdfiumRenderer::from_config(&config, pages.clone()));
//!     // Reads OPENAI_API_KEY; fails here if it is missing.
//!     let analyzer = Arc::new(LlmVisionAnalyzer::from_config(AnalyzerConfig::default())?);
//!
//!     let controller = LifecycleController::from_config(&config, store, renderer, analyzer);
//!     let dispatcher = Dispatcher::from_config(&config, controller, pages);
//!     let outcome = dispatcher
//!         .dispatch(Delivery::new(JobId::generate(), "resume.pdf"))
//!         .await;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfjob` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when embedding the worker in another service:
//! ```toml
//! edgequake-pdfjob = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{AnalyzerConfig, ImageFormat, RetentionPolicy, WorkerConfig, WorkerConfigBuilder};
pub use dispatch::{
    DeadLetter, Delivery, DispatchOutcome, DispatchReport, Dispatcher, JobQueue, RetryPolicy,
};
pub use error::{AnalysisError, JobError, RenderError, StorageError, StoreError};
pub use job::{JobId, JobRecord, JobStatus, JobUpdate};
pub use lifecycle::LifecycleController;
pub use pipeline::analyze::{LlmVisionAnalyzer, VisionAnalyzer};
pub use pipeline::pages::{FsPageStore, PageImage, PageStore};
pub use pipeline::render::{PageRenderer, PdfiumRenderer};
pub use progress::{LifecycleObserver, NoopObserver};
pub use store::{FileJobStore, JobStore, MemoryJobStore};

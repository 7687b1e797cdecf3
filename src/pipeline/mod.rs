//! Pipeline stages a job passes through between `processing` and `processed`.
//!
//! Each submodule implements exactly one step, so each is testable on its own
//! and the lifecycle controller only sees the two seams it drives:
//! [`render::PageRenderer`] and [`analyze::VisionAnalyzer`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ pages ──▶ encode ──▶ analyze ──▶ postprocess
//! (%PDF)    (pdfium)   (disk)    (base64)   (VLM)       (cleanup)
//! ```
//!
//! 1. [`input`]:   check the source is a readable PDF before pdfium sees it
//! 2. [`render`]:  rasterise every page; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 3. [`pages`]:   persist each page at `{image_root}/{job_id}/page-{i}.{ext}`
//! 4. [`encode`]:  base64-wrap stored pages for the multimodal request body
//! 5. [`analyze`]:  one vision call for the whole document; the only stage
//!    with network I/O
//! 6. [`postprocess`]:  deterministic cleanup of the model's answer

pub mod analyze;
pub mod encode;
pub mod input;
pub mod pages;
pub mod postprocess;
pub mod render;

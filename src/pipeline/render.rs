//! PDF rasterisation: render every page of a job's source document and store
//! each one through a [`PageStore`].
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole render. The work runs on the blocking pool
//! so Tokio worker threads keep serving other jobs.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and the images inside
//! what vision models accept.

use super::input::validate_source;
use super::pages::{PageImage, PageStore};
use crate::config::WorkerConfig;
use crate::error::{JobError, RenderError};
use crate::job::JobId;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns a job's source document into stored page images.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render all pages of `source` in page order.
    ///
    /// Returns at least one page on success. Render faults surface as
    /// [`JobError::Render`], page storage faults as [`JobError::Storage`].
    ///
    /// Pages left under `job_id` by an earlier attempt are removed first, so
    /// the stored set always matches the last render.
    async fn render(&self, job_id: &JobId, source: &Path) -> Result<Vec<PageImage>, JobError>;
}

/// [`PageRenderer`] backed by pdfium.
pub struct PdfiumRenderer {
    pages: Arc<dyn PageStore>,
    max_rendered_pixels: u32,
    pdfium_lib_path: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(pages: Arc<dyn PageStore>, max_rendered_pixels: u32) -> Self {
        Self {
            pages,
            max_rendered_pixels,
            pdfium_lib_path: None,
        }
    }

    /// Renderer with the pixel cap and library location from `config`.
    pub fn from_config(config: &WorkerConfig, pages: Arc<dyn PageStore>) -> Self {
        Self {
            pages,
            max_rendered_pixels: config.max_rendered_pixels,
            pdfium_lib_path: config.pdfium_lib_path.clone(),
        }
    }

    /// Load libpdfium from `dir` instead of the system library path.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.pdfium_lib_path = Some(dir.into());
        self
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(&self, job_id: &JobId, source: &Path) -> Result<Vec<PageImage>, JobError> {
        let job_id = job_id.clone();
        let source = source.to_path_buf();
        let pages = Arc::clone(&self.pages);
        let max_pixels = self.max_rendered_pixels;
        let lib_dir = self.pdfium_lib_path.clone();

        tokio::task::spawn_blocking(move || {
            render_blocking(&job_id, &source, pages.as_ref(), max_pixels, lib_dir.as_deref())
        })
        .await
        .map_err(|e| JobError::Internal(format!("Render task panicked: {}", e)))?
    }
}

fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, RenderError> {
    let bindings = match lib_dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| RenderError::PdfiumUnavailable(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}

/// Remove pages an earlier attempt stored for `job_id`.
fn clear_stale_pages(job_id: &JobId, store: &dyn PageStore) -> Result<(), JobError> {
    let stale = store.pages(job_id)?;
    if !stale.is_empty() {
        warn!(
            "Job {}: removing {} page(s) left by an earlier attempt",
            job_id,
            stale.len()
        );
        store.purge(job_id)?;
    }
    Ok(())
}

fn render_blocking(
    job_id: &JobId,
    source: &Path,
    store: &dyn PageStore,
    max_pixels: u32,
    lib_dir: Option<&Path>,
) -> Result<Vec<PageImage>, JobError> {
    validate_source(source)?;
    clear_stale_pages(job_id, store)?;
    let pdfium = bind_pdfium(lib_dir)?;

    let document = pdfium
        .load_pdf_from_file(source, None)
        .map_err(|e| RenderError::Corrupt {
            path: source.to_path_buf(),
            detail: format!("{:?}", e),
        })?;

    let total_pages = document.pages().len() as usize;
    if total_pages == 0 {
        return Err(RenderError::EmptyDocument {
            path: source.to_path_buf(),
        }
        .into());
    }
    info!("Job {}: PDF loaded, {} pages", job_id, total_pages);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut stored = Vec::with_capacity(total_pages);
    for (index, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::RasterisationFailed {
                page: index + 1,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!(
            "Job {}: rendered page {} → {}x{} px",
            job_id,
            index + 1,
            image.width(),
            image.height()
        );
        stored.push(store.put(job_id, index, &image)?);
    }

    Ok(stored)
}

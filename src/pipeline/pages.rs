//! Page image storage, addressed by `(job_id, page_index)`.
//!
//! Rendering only ever writes through a [`PageStore`]; deleting images is a
//! separate, explicit call ([`PageStore::purge`]) made by whoever owns the
//! retention policy (the dispatcher, or an operator via `pdfjob purge`).
//!
//! Layout of [`FsPageStore`]:
//!
//! ```text
//! {root}/{job_id}/page-0.png
//! {root}/{job_id}/page-1.png
//! …
//! ```

use crate::config::ImageFormat;
use crate::error::StorageError;
use crate::job::JobId;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Handle to one stored page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageImage {
    /// 0-based page index within the source document.
    pub index: usize,
    pub path: PathBuf,
    pub format: ImageFormat,
}

/// Storage for rendered pages.
///
/// Methods are blocking: the renderer calls them from its
/// `spawn_blocking` thread.
pub trait PageStore: Send + Sync {
    /// Persist `image` as page `index` of `job_id`, overwriting any previous
    /// image at that address.
    fn put(&self, job_id: &JobId, index: usize, image: &DynamicImage)
        -> Result<PageImage, StorageError>;

    /// All pages currently stored for `job_id`, ordered by index.
    fn pages(&self, job_id: &JobId) -> Result<Vec<PageImage>, StorageError>;

    /// Delete every page stored for `job_id`. Returns `false` if there was
    /// nothing to delete.
    fn purge(&self, job_id: &JobId) -> Result<bool, StorageError>;
}

/// Page store on the local file system.
#[derive(Debug, Clone)]
pub struct FsPageStore {
    root: PathBuf,
    format: ImageFormat,
}

impl FsPageStore {
    pub fn new(root: impl Into<PathBuf>, format: ImageFormat) -> Self {
        Self {
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `job_id`'s pages.
    pub fn job_dir(&self, job_id: &JobId) -> Result<PathBuf, StorageError> {
        job_id.validate().map_err(|e| StorageError::CreateDir {
            path: self.root.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        })?;
        Ok(self.root.join(job_id.as_str()))
    }

    /// Path of page `index` for `job_id`.
    pub fn page_path(&self, job_id: &JobId, index: usize) -> Result<PathBuf, StorageError> {
        Ok(self
            .job_dir(job_id)?
            .join(format!("page-{}.{}", index, self.format.extension())))
    }

    fn encode(&self, index: usize, image: &DynamicImage) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();
        let result = match self.format {
            ImageFormat::Png => image.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png),
            // JPEG has no alpha channel; pdfium bitmaps are RGBA.
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8())
                .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Jpeg),
        };
        result.map_err(|e| StorageError::Encode {
            page: index,
            format: self.format.extension(),
            detail: e.to_string(),
        })?;
        Ok(buf)
    }
}

/// Parse `page-{n}.{ext}` into `(n, format)`.
fn parse_page_name(name: &str) -> Option<(usize, ImageFormat)> {
    let rest = name.strip_prefix("page-")?;
    let (index, ext) = rest.split_once('.')?;
    Some((index.parse().ok()?, ImageFormat::from_extension(ext)?))
}

impl PageStore for FsPageStore {
    fn put(
        &self,
        job_id: &JobId,
        index: usize,
        image: &DynamicImage,
    ) -> Result<PageImage, StorageError> {
        let dir = self.job_dir(job_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDir {
            path: dir.clone(),
            source: e,
        })?;

        let bytes = self.encode(index, image)?;
        let path = self.page_path(job_id, index)?;
        let tmp_path = path.with_extension(format!("{}.tmp", self.format.extension()));
        std::fs::write(&tmp_path, &bytes).map_err(|e| StorageError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|e| StorageError::Write {
            path: path.clone(),
            source: e,
        })?;

        debug!("Stored page {} of job {} ({} bytes)", index, job_id, bytes.len());
        Ok(PageImage {
            index,
            path,
            format: self.format,
        })
    }

    fn pages(&self, job_id: &JobId) -> Result<Vec<PageImage>, StorageError> {
        let dir = self.job_dir(job_id)?;
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Read { path: dir, source: e }),
        };

        let mut pages = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::Read {
                path: dir.clone(),
                source: e,
            })?;
            let name = entry.file_name();
            if let Some((index, format)) = parse_page_name(&name.to_string_lossy()) {
                pages.push(PageImage {
                    index,
                    path: entry.path(),
                    format,
                });
            }
        }
        pages.sort_by_key(|p| p.index);
        Ok(pages)
    }

    fn purge(&self, job_id: &JobId) -> Result<bool, StorageError> {
        let dir = self.job_dir(job_id)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Purged page images for job {}", job_id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Purge {
                job_id: job_id.clone(),
                source: e,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn page(color: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 12, Rgba([color, 0, 0, 255])))
    }

    #[test]
    fn put_addresses_by_job_and_index() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Png);
        let id = JobId::from("job-7");
        let handle = store.put(&id, 2, &page(10)).unwrap();
        assert_eq!(handle.path, tmp.path().join("job-7").join("page-2.png"));
        assert!(handle.path.exists());
    }

    #[test]
    fn put_overwrites_same_address() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Png);
        let id = JobId::from("job-7");
        store.put(&id, 0, &page(10)).unwrap();
        store.put(&id, 0, &page(200)).unwrap();
        let pages = store.pages(&id).unwrap();
        assert_eq!(pages.len(), 1);
        let img = image::open(&pages[0].path).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0)[0], 200);
    }

    #[test]
    fn pages_are_listed_in_index_order() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Jpeg);
        let id = JobId::from("job-7");
        for i in [10, 2, 0, 1] {
            store.put(&id, i, &page(50)).unwrap();
        }
        let indices: Vec<usize> = store.pages(&id).unwrap().iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 10]);
    }

    #[test]
    fn unknown_job_has_no_pages() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Png);
        assert!(store.pages(&JobId::from("none")).unwrap().is_empty());
    }

    #[test]
    fn purge_is_idempotent_and_scoped_to_job() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Png);
        let a = JobId::from("a");
        let b = JobId::from("b");
        store.put(&a, 0, &page(1)).unwrap();
        store.put(&b, 0, &page(1)).unwrap();

        assert!(store.purge(&a).unwrap());
        assert!(!store.purge(&a).unwrap());
        assert!(store.pages(&a).unwrap().is_empty());
        assert_eq!(store.pages(&b).unwrap().len(), 1);
    }

    #[test]
    fn invalid_job_id_cannot_escape_root() {
        let tmp = TempDir::new().unwrap();
        let store = FsPageStore::new(tmp.path(), ImageFormat::Png);
        assert!(store.put(&JobId::from("../evil"), 0, &page(1)).is_err());
    }

    #[test]
    fn parse_page_name_variants() {
        assert_eq!(parse_page_name("page-3.png"), Some((3, ImageFormat::Png)));
        assert_eq!(parse_page_name("page-12.jpg"), Some((12, ImageFormat::Jpeg)));
        assert_eq!(parse_page_name("page-1.png.tmp"), None);
        assert_eq!(parse_page_name("cover.png"), None);
    }
}

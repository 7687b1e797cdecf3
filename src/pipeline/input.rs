//! Source validation: make sure the path handed to the worker is a readable PDF.
//!
//! pdfium reports every load failure through the same opaque error, and a
//! missing pdfium library looks identical to a missing file. Checking the
//! obvious cases here first (file exists, is readable, starts with `%PDF`)
//! gives the job record a precise cause, and lets a corrupt upload fail
//! even on a host without pdfium installed.

use crate::error::RenderError;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Validate that `path` names a readable file starting with the PDF magic bytes.
///
/// Blocking; call from a blocking context.
pub fn validate_source(path: &Path) -> Result<(), RenderError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RenderError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(RenderError::PermissionDenied {
                path: path.to_path_buf(),
            })
        }
        Err(e) => {
            return Err(RenderError::Corrupt {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
        }
    };

    if file.metadata().map(|m| m.is_dir()).unwrap_or(false) {
        return Err(RenderError::NotAPdf {
            path: path.to_path_buf(),
            magic: Vec::new(),
        });
    }

    let mut magic = Vec::with_capacity(PDF_MAGIC.len());
    file.by_ref()
        .take(PDF_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .map_err(|e| RenderError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;

    if magic.as_slice() != PDF_MAGIC {
        return Err(RenderError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }

    debug!("Validated PDF source: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_found() {
        let err = validate_source(Path::new("/definitely/not/here.pdf")).unwrap_err();
        assert!(matches!(err, RenderError::NotFound { .. }));
    }

    #[test]
    fn non_pdf_is_rejected_with_magic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("resume.pdf");
        std::fs::write(&path, b"PK\x03\x04 this is a zip").unwrap();
        match validate_source(&path).unwrap_err() {
            RenderError::NotAPdf { magic, .. } => assert_eq!(magic, b"PK\x03\x04".to_vec()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_file_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.pdf");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            validate_source(&path),
            Err(RenderError::NotAPdf { .. })
        ));
    }

    #[test]
    fn directory_is_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(validate_source(tmp.path()).is_err());
    }

    #[test]
    fn pdf_header_passes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n").unwrap();
        assert!(validate_source(&path).is_ok());
    }
}

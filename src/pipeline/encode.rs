//! Image encoding: stored page image → base64 payload wrapped in `ImageData`.
//!
//! Vision APIs (OpenAI, Anthropic, Gemini) accept images as base64 data-URIs
//! embedded in the JSON request body. Pages are already encoded on disk, so
//! the bytes are sent as-is with the mime type of their storage format.
//! `detail: "high"` makes GPT-4-class models use the full tile budget;
//! without it fine print on a dense page is lost.

use super::pages::PageImage;
use crate::error::AnalysisError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use tracing::debug;

/// Load a stored page and encode it for a vision request.
pub async fn encode_page(page: &PageImage) -> Result<ImageData, AnalysisError> {
    let bytes = tokio::fs::read(&page.path)
        .await
        .map_err(|e| AnalysisError::Encode {
            path: page.path.clone(),
            detail: e.to_string(),
        })?;

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded page {} → {} bytes base64", page.index + 1, b64.len());

    Ok(ImageData::new(b64, page.format.mime_type()).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFormat;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    #[tokio::test]
    async fn encode_stored_png() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("page-0.png");
        RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let page = PageImage {
            index: 0,
            path: path.clone(),
            format: ImageFormat::Png,
        };
        let data = encode_page(&page).await.expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, std::fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn missing_page_file_is_an_encode_error() {
        let page = PageImage {
            index: 3,
            path: "/nowhere/page-3.jpg".into(),
            format: ImageFormat::Jpeg,
        };
        let err = encode_page(&page).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Encode { .. }));
    }
}

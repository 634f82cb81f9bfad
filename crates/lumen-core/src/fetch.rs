//! Image fetching and encoding.
//!
//! Turns an image reference into an [`ImageInput`]. References may be
//! `http(s)://` URLs, `data:` URIs, or local file paths.

use crate::error::GenerateError;
use crate::llm::provider::ImageInput;
use async_trait::async_trait;
use base64::Engine;
use std::path::Path;
use std::time::Duration;

/// Source of encoded images for the generation pipeline.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, reference: &str) -> Result<ImageInput, GenerateError>;
}

/// Default fetcher backed by `reqwest` and the local filesystem.
pub struct HttpImageFetcher {
    client: reqwest::Client,
    max_bytes: u64,
    timeout: Duration,
}

impl HttpImageFetcher {
    pub fn new(max_image_size_mb: u64, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes: max_image_size_mb.saturating_mul(1024 * 1024),
            timeout,
        }
    }

    async fn fetch_url(&self, url: &str) -> Result<ImageInput, GenerateError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GenerateError::network(format!("Failed to fetch image {url}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(GenerateError::network(format!(
                "Failed to fetch image {url}: HTTP {status}"
            )));
        }
        if let Some(len) = resp.content_length() {
            self.check_size(url, len)?;
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| GenerateError::network(format!("Failed to read image {url}: {e}")))?;
        self.check_size(url, bytes.len() as u64)?;

        let media_type = detect_media_type(&bytes, content_type.as_deref(), None);
        Ok(ImageInput::from_bytes(&bytes, &media_type))
    }

    async fn fetch_file(&self, path: &Path) -> Result<ImageInput, GenerateError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            GenerateError::network(format!("Failed to read image {}: {e}", path.display()))
        })?;
        self.check_size(&path.display().to_string(), bytes.len() as u64)?;

        let media_type = detect_media_type(&bytes, None, Some(path));
        Ok(ImageInput::from_bytes(&bytes, &media_type))
    }

    fn check_size(&self, reference: &str, len: u64) -> Result<(), GenerateError> {
        if len > self.max_bytes {
            return Err(GenerateError::network(format!(
                "Image too large: {reference} ({len} bytes > {} bytes)",
                self.max_bytes
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, reference: &str) -> Result<ImageInput, GenerateError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_url(reference).await
        } else if reference.starts_with("data:") {
            parse_data_uri(reference)
        } else {
            self.fetch_file(Path::new(reference)).await
        }
    }
}

/// Decode a `data:<media>;base64,<payload>` URI.
pub fn parse_data_uri(uri: &str) -> Result<ImageInput, GenerateError> {
    let invalid = || GenerateError::network("Invalid data URI: expected data:<type>;base64,<data>");

    let rest = uri.strip_prefix("data:").ok_or_else(invalid)?;
    let (meta, payload) = rest.split_once(',').ok_or_else(invalid)?;
    let media_type = meta.strip_suffix(";base64").ok_or_else(invalid)?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| GenerateError::network(format!("Invalid data URI payload: {e}")))?;

    let media_type = if media_type.starts_with("image/") {
        media_type.to_string()
    } else {
        detect_media_type(&bytes, None, None)
    };
    Ok(ImageInput::from_bytes(&bytes, &media_type))
}

/// Decide the media type: `image/*` Content-Type, then magic bytes, then file
/// extension, then `image/jpeg`.
pub fn detect_media_type(bytes: &[u8], content_type: Option<&str>, path: Option<&Path>) -> String {
    if let Some(ct) = content_type {
        let essence = ct.split(';').next().unwrap_or_default().trim();
        if essence.starts_with("image/") {
            return essence.to_ascii_lowercase();
        }
    }
    if let Ok(format) = image::guess_format(bytes) {
        return format.to_mime_type().to_string();
    }
    if let Some(format) = path.and_then(|p| image::ImageFormat::from_path(p).ok()) {
        return format.to_mime_type().to_string();
    }
    tracing::warn!("Could not detect image type, defaulting to image/jpeg");
    "image/jpeg".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10];

    #[test]
    fn test_media_type_from_content_type_header() {
        assert_eq!(
            detect_media_type(PNG_MAGIC, Some("image/WEBP; charset=binary"), None),
            "image/webp"
        );
    }

    #[test]
    fn test_media_type_sniffed_when_header_is_generic() {
        assert_eq!(
            detect_media_type(PNG_MAGIC, Some("application/octet-stream"), None),
            "image/png"
        );
        assert_eq!(detect_media_type(JPEG_MAGIC, None, None), "image/jpeg");
    }

    #[test]
    fn test_media_type_from_extension_then_default() {
        assert_eq!(
            detect_media_type(&[1, 2, 3], None, Some(Path::new("photo.gif"))),
            "image/gif"
        );
        assert_eq!(detect_media_type(&[1, 2, 3], None, None), "image/jpeg");
    }

    #[test]
    fn test_parse_data_uri() {
        let input = parse_data_uri("data:image/png;base64,AQID").unwrap();
        assert_eq!(input.media_type, "image/png");
        assert_eq!(input.data, "AQID");
    }

    #[test]
    fn test_parse_data_uri_rejects_malformed() {
        assert!(parse_data_uri("data:image/png,raw").is_err());
        assert!(parse_data_uri("data:image/png;base64").is_err());
        assert!(matches!(
            parse_data_uri("data:image/png;base64,!!!"),
            Err(GenerateError::Network { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        file.write_all(PNG_MAGIC).unwrap();

        let fetcher = HttpImageFetcher::new(1, Duration::from_secs(5));
        let input = fetcher.fetch(file.path().to_str().unwrap()).await.unwrap();
        assert_eq!(input.media_type, "image/png");
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_network_error() {
        let fetcher = HttpImageFetcher::new(1, Duration::from_secs(5));
        let err = fetcher.fetch("/nonexistent/path/ghost.jpg").await.unwrap_err();
        assert!(matches!(err, GenerateError::Network { .. }));
        assert!(err.to_string().contains("ghost.jpg"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0u8; 2048]).unwrap();

        let fetcher = HttpImageFetcher {
            client: reqwest::Client::new(),
            max_bytes: 1024,
            timeout: Duration::from_secs(5),
        };
        let err = fetcher.fetch(file.path().to_str().unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }
}

//! Local validation, request signing and the upload service.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{ImageHost, UploadError, UploadedImage};

/// Maximum image size (10 MB).
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// File extensions mapped to the MIME type they declare.
pub const ALLOWED_EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("avif", "image/avif"),
    ("svg", "image/svg+xml"),
];

/// File handed to the uploader.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub filename: String,
    /// Declared MIME type, if the source reported one.
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, content_type: Option<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type,
            data,
        }
    }

    /// Read a file from disk, declaring its type from the extension.
    ///
    /// Files over the size limit are rejected from metadata before being
    /// read.
    pub async fn from_path(path: &Path) -> Result<Self, UploadError> {
        let size = tokio::fs::metadata(path).await?.len();
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > MAX_IMAGE_SIZE {
            return Err(UploadError::TooLarge {
                size,
                max: MAX_IMAGE_SIZE,
            });
        }
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let content_type = declared_type(&filename);
        Ok(Self::new(filename, content_type, data))
    }
}

/// MIME type implied by a filename's extension.
fn declared_type(filename: &str) -> Option<String> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())?
        .to_ascii_lowercase();
    if let Some((_, mime)) = ALLOWED_EXTENSIONS.iter().find(|(e, _)| *e == ext) {
        return Some((*mime).to_string());
    }
    match ext.as_str() {
        "pdf" => Some("application/pdf".to_string()),
        "txt" => Some("text/plain".to_string()),
        "doc" => Some("application/msword".to_string()),
        _ => None,
    }
}

/// Check size and type. Returns the MIME type to upload with.
///
/// The declared type must be `image/*`. Content that sniffs as a
/// non-image is rejected even when declared as an image; undeclared
/// content must sniff as an image.
pub fn validate(upload: &ImageUpload) -> Result<String, UploadError> {
    if upload.data.len() > MAX_IMAGE_SIZE {
        return Err(UploadError::TooLarge {
            size: upload.data.len(),
            max: MAX_IMAGE_SIZE,
        });
    }

    let sniffed = infer::get(&upload.data);
    let sniffed_image = sniffed
        .as_ref()
        .map(|t| t.matcher_type() == infer::MatcherType::Image);

    match upload.content_type.as_deref().map(str::trim) {
        Some(declared) if !declared.to_ascii_lowercase().starts_with("image/") => {
            Err(UploadError::NotAnImage(declared.to_string()))
        }
        Some(declared) => match (sniffed, sniffed_image) {
            (Some(t), Some(false)) => Err(UploadError::NotAnImage(t.mime_type().to_string())),
            _ => Ok(declared.to_ascii_lowercase()),
        },
        None => match (sniffed, sniffed_image) {
            (Some(t), Some(true)) => Ok(t.mime_type().to_string()),
            (Some(t), _) => Err(UploadError::NotAnImage(t.mime_type().to_string())),
            (None, _) => Err(UploadError::NotAnImage("an unknown type".to_string())),
        },
    }
}

/// Sign upload parameters: sorted `k=v` pairs joined with `&`, secret
/// appended, SHA-256, lowercase hex.
pub fn sign_params(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let joined = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Validates images and hands them to the configured host.
#[derive(Clone)]
pub struct ImageUploader {
    host: Option<Arc<dyn ImageHost>>,
}

impl ImageUploader {
    pub fn new(host: Arc<dyn ImageHost>) -> Self {
        Self { host: Some(host) }
    }

    /// Uploader with no host; every upload fails with `NotConfigured`.
    pub fn disabled() -> Self {
        Self { host: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.host.is_some()
    }

    /// Validate and upload an image, returning its public URL data.
    pub async fn upload(&self, upload: &ImageUpload) -> Result<UploadedImage, UploadError> {
        let mime_type = match validate(upload) {
            Ok(mime) => mime,
            Err(e) => {
                debug!(filename = %upload.filename, error = %e, "image rejected");
                return Err(e);
            }
        };
        let host = self.host.as_ref().ok_or(UploadError::NotConfigured)?;

        match host.upload(upload, &mime_type).await {
            Ok(image) => {
                info!(
                    filename = %upload.filename,
                    public_id = %image.public_id,
                    size = upload.data.len(),
                    "image uploaded"
                );
                Ok(image)
            }
            Err(e) => {
                warn!(filename = %upload.filename, error = %e, "image upload failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];

    fn png(size: usize) -> Vec<u8> {
        let mut data = PNG_HEADER.to_vec();
        data.resize(size.max(PNG_HEADER.len()), 0);
        data
    }

    #[test]
    fn accepts_declared_png() {
        let upload = ImageUpload::new("a.png", Some("image/png".into()), png(1024));
        assert_eq!(validate(&upload).unwrap(), "image/png");
    }

    #[test]
    fn sniffs_undeclared_type() {
        let upload = ImageUpload::new("blob", None, png(64));
        assert_eq!(validate(&upload).unwrap(), "image/png");
    }

    #[test]
    fn rejects_oversized() {
        let upload = ImageUpload::new("big.png", Some("image/png".into()), png(12 * 1024 * 1024));
        let err = validate(&upload).unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert!(err.user_message().contains("10 MB"));
    }

    #[test]
    fn exactly_ten_megabytes_is_allowed() {
        let upload = ImageUpload::new("edge.png", Some("image/png".into()), png(MAX_IMAGE_SIZE));
        assert!(validate(&upload).is_ok());
    }

    #[test]
    fn rejects_declared_pdf() {
        let upload = ImageUpload::new(
            "brochure.pdf",
            declared_type("brochure.pdf"),
            b"%PDF-1.7\n".to_vec(),
        );
        let err = validate(&upload).unwrap_err();
        assert!(matches!(err, UploadError::NotAnImage(ref t) if t == "application/pdf"));
    }

    #[test]
    fn rejects_pdf_disguised_as_image() {
        let upload = ImageUpload::new("fake.png", Some("image/png".into()), b"%PDF-1.7\n".to_vec());
        assert!(matches!(validate(&upload), Err(UploadError::NotAnImage(_))));
    }

    #[test]
    fn declared_type_from_extension() {
        assert_eq!(declared_type("Photo.JPG").as_deref(), Some("image/jpeg"));
        assert_eq!(declared_type("noext"), None);
    }

    #[test]
    fn signature_is_sorted_and_hex() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1700000000".to_string());
        params.insert("folder", "blog".to_string());
        let sig = sign_params(&params, "secret");

        let mut hasher = Sha256::new();
        hasher.update(b"folder=blog&timestamp=1700000000secret");
        assert_eq!(sig, hex::encode(hasher.finalize()));
        assert_eq!(sig.len(), 64);
    }

    #[tokio::test]
    async fn disabled_uploader_still_validates_first() {
        let uploader = ImageUploader::disabled();
        let pdf = ImageUpload::new("a.pdf", Some("application/pdf".into()), b"%PDF".to_vec());
        assert!(matches!(uploader.upload(&pdf).await, Err(UploadError::NotAnImage(_))));
        let ok = ImageUpload::new("a.png", Some("image/png".into()), png(16));
        assert!(matches!(uploader.upload(&ok).await, Err(UploadError::NotConfigured)));
    }
}

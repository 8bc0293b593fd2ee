//! Cover-image uploads.
//!
//! Images go to a third-party image host through a signed multipart
//! upload. Size and type are checked locally first; a rejected file never
//! reaches the network.

mod cloudinary;
mod upload;

pub use cloudinary::{CloudinaryHost, ImageHostConfig};
pub use upload::{
    ALLOWED_EXTENSIONS, ImageUpload, ImageUploader, MAX_IMAGE_SIZE, sign_params, validate,
};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Image upload errors.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: usize, max: usize },

    #[error("not an image: {0}")]
    NotAnImage(String),

    #[error("image uploads are not configured")]
    NotConfigured,

    #[error("image host error: {message} (status {status})")]
    Remote { status: u16, message: String },

    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to decode image host response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::TooLarge { max, .. } => {
                format!("Images must be {} MB or smaller.", max / (1024 * 1024))
            }
            UploadError::NotAnImage(found) => {
                format!("Only image files can be uploaded (this file is {found}).")
            }
            UploadError::NotConfigured => "Image uploads are not available.".to_string(),
            UploadError::Remote { message, .. } => format!("The image host rejected the upload: {message}"),
            UploadError::Http(_) => {
                "Could not reach the image host. Check your connection and try again.".to_string()
            }
            UploadError::Decode(_) => "The image host sent an unexpected response.".to_string(),
            UploadError::Io(e) => format!("Could not read the file: {e}"),
        }
    }

    /// Whether the error was raised before any network call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            UploadError::TooLarge { .. }
                | UploadError::NotAnImage(_)
                | UploadError::NotConfigured
                | UploadError::Io(_)
        )
    }
}

/// Asset stored by the image host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedImage {
    pub public_id: String,
    /// Stable public HTTPS URL of the asset.
    pub secure_url: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
}

/// Remote image host.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Upload a validated image with its MIME type.
    async fn upload(&self, image: &ImageUpload, mime_type: &str) -> Result<UploadedImage, UploadError>;
}

//! Signed uploads to a Cloudinary-style image host.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::upload::{ImageUpload, sign_params};
use super::{ImageHost, UploadError, UploadedImage};

/// Image host account settings.
#[derive(Debug, Clone)]
pub struct ImageHostConfig {
    pub api_base: String,
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub folder: String,
}

/// HTTP image host client.
pub struct CloudinaryHost {
    client: Client,
    config: ImageHostConfig,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl CloudinaryHost {
    pub fn new(config: ImageHostConfig, timeout: Duration) -> Result<Self, UploadError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/{}/image/upload",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    /// Parameters covered by the signature.
    fn signed_params(&self, timestamp: i64) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        if !self.config.folder.is_empty() {
            params.insert("folder", self.config.folder.clone());
        }
        params.insert("timestamp", timestamp.to_string());
        params
    }
}

impl std::fmt::Debug for CloudinaryHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudinaryHost")
            .field("cloud_name", &self.config.cloud_name)
            .field("folder", &self.config.folder)
            .finish()
    }
}

#[async_trait]
impl ImageHost for CloudinaryHost {
    async fn upload(&self, image: &ImageUpload, mime_type: &str) -> Result<UploadedImage, UploadError> {
        let params = self.signed_params(Utc::now().timestamp());
        let signature = sign_params(&params, &self.config.api_secret);

        let file = Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str(mime_type)?;
        let mut form = Form::new()
            .part("file", file)
            .text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key, value);
        }

        debug!(url = %self.upload_url(), filename = %image.filename, "uploading image");
        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("upload failed").to_string());
            return Err(UploadError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn host(folder: &str) -> CloudinaryHost {
        CloudinaryHost::new(
            ImageHostConfig {
                api_base: "https://api.cloudinary.com/v1_1/".into(),
                cloud_name: "sparkle".into(),
                api_key: "key".into(),
                api_secret: "secret".into(),
                folder: folder.into(),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn upload_url_joins_cleanly() {
        assert_eq!(
            host("blog").upload_url(),
            "https://api.cloudinary.com/v1_1/sparkle/image/upload"
        );
    }

    #[test]
    fn empty_folder_is_not_signed() {
        let params = host("").signed_params(1_700_000_000);
        assert_eq!(params.keys().copied().collect::<Vec<_>>(), vec!["timestamp"]);
    }

    #[test]
    fn decodes_upload_response() {
        let body = r#"{"public_id":"blog/oven","secure_url":"https://res.cloudinary.com/sparkle/image/upload/v1/blog/oven.jpg","width":800,"height":600,"format":"jpg","bytes":51234,"etag":"x"}"#;
        let image: UploadedImage = serde_json::from_str(body).unwrap();
        assert_eq!(image.public_id, "blog/oven");
        assert_eq!(image.width, Some(800));
    }
}

//! Configuration loaded from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::media::ImageHostConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hosted backend base URL. When None, the in-memory backend is used.
    pub backend_url: Option<String>,

    /// Public API key sent with every backend request (default: empty).
    pub backend_anon_key: String,

    /// Bound on collection loads (default: 15 seconds).
    pub content_load_timeout: Duration,

    /// Per-request HTTP timeout (default: 30 seconds).
    pub http_timeout: Duration,

    /// Image host account. When None, image uploads are disabled.
    pub image_host: Option<ImageHostConfig>,

    /// Admin email for CLI commands and the in-memory account.
    pub admin_email: Option<String>,

    /// Admin password for CLI commands and the in-memory account.
    pub admin_password: Option<String>,

    /// Display name of the in-memory admin account.
    pub admin_name: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend_url = non_empty("BACKEND_URL");
        let backend_anon_key = lookup("BACKEND_ANON_KEY").unwrap_or_default();

        let content_load_timeout = non_empty("CONTENT_LOAD_TIMEOUT_SECS")
            .unwrap_or_else(|| "15".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("CONTENT_LOAD_TIMEOUT_SECS must be a valid u64")?;

        let http_timeout = non_empty("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .map(Duration::from_secs)
            .context("HTTP_TIMEOUT_SECS must be a valid u64")?;

        let image_host = match non_empty("IMAGE_CLOUD_NAME") {
            Some(cloud_name) => Some(ImageHostConfig {
                api_base: non_empty("IMAGE_API_BASE")
                    .unwrap_or_else(|| "https://api.cloudinary.com/v1_1".to_string()),
                cloud_name,
                api_key: non_empty("IMAGE_API_KEY")
                    .context("IMAGE_API_KEY is required when IMAGE_CLOUD_NAME is set")?,
                api_secret: non_empty("IMAGE_API_SECRET")
                    .context("IMAGE_API_SECRET is required when IMAGE_CLOUD_NAME is set")?,
                folder: lookup("IMAGE_UPLOAD_FOLDER").unwrap_or_else(|| "blog".to_string()),
            }),
            None => None,
        };

        let admin_email = non_empty("ADMIN_EMAIL");
        let admin_password = non_empty("ADMIN_PASSWORD");
        let admin_name = non_empty("ADMIN_NAME");

        Ok(Self {
            backend_url,
            backend_anon_key,
            content_load_timeout,
            http_timeout,
            image_host,
            admin_email,
            admin_password,
            admin_name,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert!(config.backend_url.is_none());
        assert_eq!(config.content_load_timeout, Duration::from_secs(15));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(config.image_host.is_none());
    }

    #[test]
    fn image_host_requires_credentials() {
        let err = config(&[("IMAGE_CLOUD_NAME", "sparkle")]).unwrap_err();
        assert!(err.to_string().contains("IMAGE_API_KEY"));

        let config = config(&[
            ("IMAGE_CLOUD_NAME", "sparkle"),
            ("IMAGE_API_KEY", "k"),
            ("IMAGE_API_SECRET", "s"),
        ])
        .unwrap();
        let host = config.image_host.unwrap();
        assert_eq!(host.folder, "blog");
        assert_eq!(host.api_base, "https://api.cloudinary.com/v1_1");
    }

    #[test]
    fn bad_timeout_is_an_error() {
        let err = config(&[("CONTENT_LOAD_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("CONTENT_LOAD_TIMEOUT_SECS"));
    }
}

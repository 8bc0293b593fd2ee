//! Application error types.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendError;

/// Content store errors.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Admin-only operation attempted without an authenticated identity.
    #[error("authentication required to {0}")]
    Unauthorized(&'static str),

    #[error("remote call failed: {0}")]
    Remote(#[from] BackendError),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Client-side validation failure; no network call was made.
    #[error("{0}")]
    Validation(String),

    #[error("post {0} not found")]
    NotFound(Uuid),
}

impl ContentError {
    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ContentError::Unauthorized(capability) => {
                format!("You must be signed in as an administrator to {capability}.")
            }
            ContentError::Remote(BackendError::Http(_)) => {
                "Could not reach the content service. Check your connection and try again."
                    .to_string()
            }
            ContentError::Remote(e) => format!("The content service reported an error: {e}"),
            ContentError::Timeout(_) => {
                "Loading blog posts took too long. Please try again.".to_string()
            }
            ContentError::Validation(msg) => msg.clone(),
            ContentError::NotFound(_) => "The requested post could not be found.".to_string(),
        }
    }

    /// Whether the error was raised before any network call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ContentError::Unauthorized(_) | ContentError::Validation(_)
        )
    }
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("authentication service error: {0}")]
    Remote(BackendError),
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::InvalidCredentials => SessionError::InvalidCredentials,
            other => SessionError::Remote(other),
        }
    }
}

/// Result type alias using ContentError.
pub type ContentResult<T> = Result<T, ContentError>;

//! Session identity and profile rows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The only role in this domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Admin,
}

/// Authenticated identity as seen by the rest of the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    /// Display name; falls back to the email local-part.
    pub name: String,
    pub avatar_url: Option<String>,
    pub role: Role,
}

/// Row of the `profiles` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Local part of an email address (`jo` for `jo@example.com`).
pub fn email_local_part(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

//! Lustra Kernel Library
//!
//! Session tracking, the blog content store, the rich content editor and
//! cover-image uploads for the marketing site. The `lustra` binary wraps
//! these services in an admin command line.

pub mod backend;
pub mod config;
pub mod content;
pub mod editor;
pub mod error;
pub mod media;
pub mod models;
pub mod policy;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{ContentError, ContentResult, SessionError};
pub use state::AppState;

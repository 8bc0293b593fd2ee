//! Blog content management.
//!
//! This module provides:
//! - ContentStore: public and admin post collections kept in sync with the remote store
//! - Slug generation and uniqueness
//! - Excerpt derivation from post markup
//! - Cancellable, time-bounded collection loads

mod excerpt;
mod load;
pub mod slug;
mod store;

pub use excerpt::{ELLIPSIS, EXCERPT_LEN, derive_excerpt, excerpt_for};
pub use load::{LoadGuard, LoadTicket, run_bounded};
pub use self::slug::{is_valid_slug, slugify, unique_slug};
pub use store::{ContentState, ContentStore, DEFAULT_LOAD_TIMEOUT};

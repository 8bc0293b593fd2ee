//! Domain models.

pub mod post;
pub mod user;

pub use post::{BlogPost, NewPost, PostRecord, PostStatus, UpdatePost};
pub use user::{Profile, Role, SessionUser};

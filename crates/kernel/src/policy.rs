//! Per-operation access and reconciliation policy.
//!
//! Every session and content operation is listed here with the role it
//! needs, when local state changes relative to the remote call, and what
//! happens on failure. The services consult this table instead of
//! hard-coding the rules at each call site.

use std::fmt;

use crate::error::{ContentError, ContentResult};

/// When local state is updated relative to the remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Local state changes before the remote call is issued.
    Optimistic,
    /// Local state changes only after the remote call succeeds.
    Confirmed,
    /// No local collection changes.
    ReadOnly,
}

/// What a failed remote call turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Resolve to an empty or missing value and record the error.
    Degrade,
    /// Record the error and return it to the caller.
    Rethrow,
    /// Log only.
    Swallow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Logout,
    GetPostBySlug,
    SearchPublishedPosts,
    SearchAllPosts,
    GetPublishedPostsByTag,
    GetPublishedTags,
    CreatePost,
    UpdatePost,
    DeletePost,
    PublishPost,
    UnpublishPost,
    GetPost,
    RefreshPublishedPosts,
    RefreshAllPosts,
}

impl Operation {
    pub const ALL: [Operation; 15] = [
        Operation::Login,
        Operation::Logout,
        Operation::GetPostBySlug,
        Operation::SearchPublishedPosts,
        Operation::SearchAllPosts,
        Operation::GetPublishedPostsByTag,
        Operation::GetPublishedTags,
        Operation::CreatePost,
        Operation::UpdatePost,
        Operation::DeletePost,
        Operation::PublishPost,
        Operation::UnpublishPost,
        Operation::GetPost,
        Operation::RefreshPublishedPosts,
        Operation::RefreshAllPosts,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Logout => "logout",
            Operation::GetPostBySlug => "get_post_by_slug",
            Operation::SearchPublishedPosts => "search_published_posts",
            Operation::SearchAllPosts => "search_all_posts",
            Operation::GetPublishedPostsByTag => "get_published_posts_by_tag",
            Operation::GetPublishedTags => "get_published_tags",
            Operation::CreatePost => "create_post",
            Operation::UpdatePost => "update_post",
            Operation::DeletePost => "delete_post",
            Operation::PublishPost => "publish_post",
            Operation::UnpublishPost => "unpublish_post",
            Operation::GetPost => "get_post",
            Operation::RefreshPublishedPosts => "refresh_published_posts",
            Operation::RefreshAllPosts => "refresh_all_posts",
        }
    }

    /// Whether the admin role is required.
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Operation::SearchAllPosts
                | Operation::CreatePost
                | Operation::UpdatePost
                | Operation::DeletePost
                | Operation::PublishPost
                | Operation::UnpublishPost
                | Operation::RefreshAllPosts
        )
    }

    /// Capability named in authorization errors.
    pub fn capability(&self) -> &'static str {
        match self {
            Operation::SearchAllPosts => "search all posts",
            Operation::CreatePost => "create posts",
            Operation::UpdatePost => "update posts",
            Operation::DeletePost => "delete posts",
            Operation::PublishPost => "publish posts",
            Operation::UnpublishPost => "unpublish posts",
            Operation::RefreshAllPosts => "load all posts",
            other => other.name(),
        }
    }

    pub fn reconciliation(&self) -> Reconciliation {
        match self {
            Operation::Logout => Reconciliation::Optimistic,
            // Login converges through the change notification.
            Operation::Login
            | Operation::CreatePost
            | Operation::UpdatePost
            | Operation::DeletePost
            | Operation::PublishPost
            | Operation::UnpublishPost
            | Operation::RefreshPublishedPosts
            | Operation::RefreshAllPosts => Reconciliation::Confirmed,
            Operation::GetPostBySlug
            | Operation::SearchPublishedPosts
            | Operation::SearchAllPosts
            | Operation::GetPublishedPostsByTag
            | Operation::GetPublishedTags
            | Operation::GetPost => Reconciliation::ReadOnly,
        }
    }

    pub fn on_failure(&self) -> FailureMode {
        match self {
            Operation::Logout => FailureMode::Swallow,
            Operation::Login
            | Operation::CreatePost
            | Operation::UpdatePost
            | Operation::DeletePost
            | Operation::PublishPost
            | Operation::UnpublishPost => FailureMode::Rethrow,
            _ => FailureMode::Degrade,
        }
    }

    /// Reject the operation if it needs the admin role and the caller is
    /// not authenticated.
    pub fn authorize(&self, authenticated: bool) -> ContentResult<()> {
        if self.requires_admin() && !authenticated {
            return Err(ContentError::Unauthorized(self.capability()));
        }
        Ok(())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Reconciliation::Optimistic => "optimistic",
            Reconciliation::Confirmed => "confirmed",
            Reconciliation::ReadOnly => "read-only",
        })
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureMode::Degrade => "degrade",
            FailureMode::Rethrow => "rethrow",
            FailureMode::Swallow => "log only",
        })
    }
}

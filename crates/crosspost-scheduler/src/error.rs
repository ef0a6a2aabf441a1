//! Error types for the scheduler.

use thiserror::Error;

use crosspost_model::PostError;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invariant violation or rejected mutation on the post aggregate.
    #[error("post error: {0}")]
    Post(#[from] PostError),

    /// Post not found.
    #[error("post not found: {0}")]
    PostNotFound(String),

    /// A post with this id already exists.
    #[error("post already exists: {0}")]
    PostExists(String),
}

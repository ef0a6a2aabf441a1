//! Error types for the post model.

use thiserror::Error;

use crate::{Platform, PostStatus, TargetStatus};

/// Errors that can occur when mutating or validating a scheduled post.
#[derive(Debug, Error)]
pub enum PostError {
    /// The post is terminal and may no longer transition.
    ///
    /// This is a logic fault: in correct operation the execution guard and
    /// the lifecycle API reject the operation before it reaches the entity.
    #[error("post {0} is terminal and can no longer be mutated")]
    AlreadyTerminal(String),

    /// No target exists for the given platform.
    #[error("post {post_id} has no target for platform {platform}")]
    TargetNotFound { post_id: String, platform: Platform },

    /// A target was not in the state the operation requires.
    #[error("target {platform} is {from}, expected {expected}")]
    InvalidTransition {
        platform: Platform,
        from: TargetStatus,
        expected: TargetStatus,
    },

    /// The schedule request is invalid (past date, bad interval, ...).
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The same platform appears more than once in the target list.
    #[error("duplicate platform target: {0}")]
    DuplicatePlatform(Platform),

    /// A post must target at least one platform.
    #[error("a scheduled post needs at least one platform target")]
    NoTargets,

    /// Rescheduling is only allowed while the post is still scheduled.
    #[error("cannot reschedule a post in status {0}")]
    NotReschedulable(PostStatus),

    /// Retry attempts are exhausted.
    #[error("retry limit reached ({attempts_used}/{max_attempts})")]
    RetriesExhausted { attempts_used: u32, max_attempts: u32 },
}

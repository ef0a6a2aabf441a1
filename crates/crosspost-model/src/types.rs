//! Scheduled post types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported publishing platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Linkedin,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized error classification for publish failures.
///
/// The code decides retry eligibility; it is not a separate code path in
/// the state machine. `needs_reconnection` is surfaced distinctly so the
/// owning application can prompt re-authentication instead of silently
/// burning retry attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid or revoked credential; the account must be reconnected.
    NeedsReconnection,
    /// The platform throttled the call.
    RateLimited,
    /// The bounded wait on the publish call elapsed.
    Timeout,
    /// Connection-level failure before a response arrived.
    Network,
    /// 5xx-class platform error.
    ServerError,
    /// The platform permanently rejected the content.
    Rejected,
    #[default]
    Unknown,
}

impl ErrorCode {
    /// Whether a failure with this code is worth another attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCode::NeedsReconnection | ErrorCode::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NeedsReconnection => "needs_reconnection",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Network => "network",
            ErrorCode::ServerError => "server_error",
            ErrorCode::Rejected => "rejected",
            ErrorCode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single platform target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    #[default]
    Scheduled,
    Publishing,
    Published,
    Failed,
    Cancelled,
}

impl TargetStatus {
    /// Whether this target can still transition.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            TargetStatus::Published | TargetStatus::Failed | TargetStatus::Cancelled
        )
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Scheduled => "scheduled",
            TargetStatus::Publishing => "publishing",
            TargetStatus::Published => "published",
            TargetStatus::Failed => "failed",
            TargetStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Derived overall status of a scheduled post.
///
/// Always recomputed from the target statuses (see
/// [`overall_status_of`](crate::overall_status_of)); never assigned
/// independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    #[default]
    Scheduled,
    Publishing,
    Published,
    PartiallyPublished,
    Failed,
    Cancelled,
}

impl PostStatus {
    /// Whether this status is one of the settled, no-more-attempts states.
    ///
    /// Note that `failed` and `partially_published` only make a *post*
    /// terminal once retries are exhausted; see
    /// [`ScheduledPost::is_terminal`](crate::ScheduledPost::is_terminal).
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            PostStatus::Published
                | PostStatus::PartiallyPublished
                | PostStatus::Failed
                | PostStatus::Cancelled
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Published => "published",
            PostStatus::PartiallyPublished => "partially_published",
            PostStatus::Failed => "failed",
            PostStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Reference to externally-owned content, snapshotted at schedule time.
///
/// The publishing engine never generates or edits content; it carries this
/// payload to the platform adapters as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    /// Identifier of the content record in the owning store.
    pub content_id: String,
    /// Text body of the post.
    pub text: String,
    /// Optional image to attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Optional link to attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

/// The last publish error recorded on a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub code: ErrorCode,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort engagement metrics for a published target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub likes: u64,
    pub comments: u64,
    pub shares: u64,
    pub reach: u64,
    pub impressions: u64,
}

/// A single platform's publication sub-state within a scheduled post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTarget {
    pub platform: Platform,
    /// Reference to the credential/account record in the external store.
    pub account_ref: String,
    pub status: TargetStatus,
    /// Set only once the target reaches `published`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Set only on `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    #[serde(default)]
    pub metrics: TargetMetrics,
}

impl PlatformTarget {
    pub fn new(platform: Platform, account_ref: impl Into<String>) -> Self {
        Self {
            platform,
            account_ref: account_ref.into(),
            status: TargetStatus::Scheduled,
            platform_post_id: None,
            published_at: None,
            last_error: None,
            metrics: TargetMetrics::default(),
        }
    }
}

/// Action recorded by an execution log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogAction {
    Scheduled,
    Publishing,
    Published,
    Failed,
    Retrying,
    Cancelled,
}

/// One entry in a post's append-only execution log.
///
/// Used for audit and debugging, never for control flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: LogAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ExecutionLogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        action: LogAction,
        platform: Option<Platform>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            action,
            platform,
            message: message.into(),
            error_detail: None,
        }
    }
}

/// Retry bookkeeping for a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryState {
    pub max_attempts: u32,
    pub attempts_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Base backoff interval in seconds; doubled per used attempt.
    pub base_interval_secs: u64,
}

impl Default for RetryState {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempts_used: 0,
            next_retry_at: None,
            base_interval_secs: 300,
        }
    }
}

/// Who created the schedule entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledBy {
    #[default]
    User,
    Auto,
    Bulk,
}

/// Scheduling priority. Informational; the dispatcher does not reorder by it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Scheduling metadata kept alongside the post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingMeta {
    pub scheduled_by: ScheduledBy,
    /// Original due time, kept when the post is rescheduled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_scheduled_at: Option<DateTime<Utc>>,
    pub rescheduled_count: u32,
    pub priority: Priority,
}

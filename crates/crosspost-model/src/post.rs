//! The [`ScheduledPost`] aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    ContentRef, ExecutionLogEntry, LastError, LogAction, Platform, PlatformTarget, PostError,
    PostStatus, Priority, RetryState, ScheduledBy, SchedulingMeta, TargetStatus,
};

/// Compute the overall status from the multiset of target statuses.
///
/// This is the single source of truth for a post's aggregate status; it is
/// called after every target mutation and never bypassed. Precedence:
///
/// 1. all targets published -> published
/// 2. all targets cancelled -> cancelled
/// 3. any target publishing -> publishing
/// 4. any target scheduled -> scheduled (fresh, or reset by a retry)
/// 5. published mixed with failed/cancelled -> partially_published
/// 6. otherwise (failed, possibly with cancelled) -> failed
pub fn overall_status_of(targets: &[PlatformTarget]) -> PostStatus {
    use TargetStatus as T;

    if targets.is_empty() {
        return PostStatus::Scheduled;
    }

    let all = |s: T| targets.iter().all(|t| t.status == s);
    let any = |s: T| targets.iter().any(|t| t.status == s);

    if all(T::Published) {
        PostStatus::Published
    } else if all(T::Cancelled) {
        PostStatus::Cancelled
    } else if any(T::Publishing) {
        PostStatus::Publishing
    } else if any(T::Scheduled) {
        PostStatus::Scheduled
    } else if any(T::Published) {
        PostStatus::PartiallyPublished
    } else {
        PostStatus::Failed
    }
}

/// Parameters for creating a new scheduled post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub owner_id: String,
    pub content: ContentRef,
    pub scheduled_at: DateTime<Utc>,
    /// Display-only; all scheduling math uses the UTC instant.
    pub timezone: String,
    pub targets: Vec<PlatformTarget>,
    pub retry: RetryState,
    pub scheduled_by: ScheduledBy,
    pub priority: Priority,
}

/// A piece of content scheduled for publication across one or more platforms.
///
/// Owned exclusively by the user who created it. Mutated only through the
/// guarded operations below; once terminal the aggregate is immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub owner_id: String,
    pub content: ContentRef,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub targets: Vec<PlatformTarget>,
    /// Derived; see [`overall_status_of`].
    pub overall_status: PostStatus,
    pub retry: RetryState,
    pub scheduling: SchedulingMeta,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl ScheduledPost {
    /// Create a new post in `scheduled` status on every target.
    ///
    /// Validates that the due time is strictly in the future, that at least
    /// one target is present, and that no platform appears twice.
    pub fn new(params: NewPost, now: DateTime<Utc>) -> Result<Self, PostError> {
        if params.targets.is_empty() {
            return Err(PostError::NoTargets);
        }
        for (i, target) in params.targets.iter().enumerate() {
            if params.targets[..i].iter().any(|t| t.platform == target.platform) {
                return Err(PostError::DuplicatePlatform(target.platform));
            }
        }
        if params.scheduled_at <= now {
            return Err(PostError::InvalidSchedule(format!(
                "scheduled_at {} is not in the future",
                params.scheduled_at
            )));
        }

        let mut post = Self {
            id: Uuid::new_v4().to_string(),
            owner_id: params.owner_id,
            content: params.content,
            scheduled_at: params.scheduled_at,
            timezone: params.timezone,
            targets: params.targets,
            overall_status: PostStatus::Scheduled,
            retry: params.retry,
            scheduling: SchedulingMeta {
                scheduled_by: params.scheduled_by,
                original_scheduled_at: None,
                rescheduled_count: 0,
                priority: params.priority,
            },
            execution_log: Vec::new(),
            created_at: now,
            published_at: None,
            completed_at: None,
            cancelled_at: None,
        };
        post.log(
            now,
            LogAction::Scheduled,
            None,
            format!("scheduled for {}", post.scheduled_at),
        );
        Ok(post)
    }

    /// The instant this post is next due: the retry time if one is pending,
    /// otherwise the original schedule.
    pub fn due_at(&self) -> DateTime<Utc> {
        self.retry.next_retry_at.unwrap_or(self.scheduled_at)
    }

    /// Whether this post is due for execution.
    ///
    /// A due time in the past is a normal condition (scheduler delay, crash
    /// recovery), never an error.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.overall_status == PostStatus::Scheduled && self.due_at() <= now
    }

    /// Whether this post may no longer transition.
    ///
    /// `published` and `cancelled` are terminal on sight; `failed` and
    /// `partially_published` become terminal once retries are exhausted,
    /// which is when `completed_at` is stamped.
    pub fn is_terminal(&self) -> bool {
        match self.overall_status {
            PostStatus::Published | PostStatus::Cancelled => true,
            PostStatus::Failed | PostStatus::PartiallyPublished => self.completed_at.is_some(),
            PostStatus::Scheduled | PostStatus::Publishing => false,
        }
    }

    pub fn target(&self, platform: Platform) -> Option<&PlatformTarget> {
        self.targets.iter().find(|t| t.platform == platform)
    }

    /// Flip every `scheduled` target to `publishing` and return them in
    /// declared order. This is the claim step of an execution pass; the
    /// store performs it under its write lock so two concurrent triggers
    /// can never both obtain the same targets.
    pub fn begin_publishing(&mut self, now: DateTime<Utc>) -> Result<Vec<Platform>, PostError> {
        self.ensure_mutable()?;
        let mut claimed = Vec::new();
        for i in 0..self.targets.len() {
            if self.targets[i].status == TargetStatus::Scheduled {
                self.targets[i].status = TargetStatus::Publishing;
                let platform = self.targets[i].platform;
                self.log(
                    now,
                    LogAction::Publishing,
                    Some(platform),
                    format!("publishing to {platform}"),
                );
                claimed.push(platform);
            }
        }
        self.recompute(now);
        Ok(claimed)
    }

    /// Record a successful publish on one target.
    ///
    /// Requires the target to be `publishing`.
    pub fn mark_target_published(
        &mut self,
        platform: Platform,
        platform_post_id: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Result<(), PostError> {
        self.ensure_mutable()?;
        let target = self.target_mut(platform)?;
        if target.status != TargetStatus::Publishing {
            return Err(PostError::InvalidTransition {
                platform,
                from: target.status,
                expected: TargetStatus::Publishing,
            });
        }
        target.status = TargetStatus::Published;
        target.platform_post_id = Some(platform_post_id.into());
        target.published_at = Some(published_at);
        target.last_error = None;
        self.log(
            published_at,
            LogAction::Published,
            Some(platform),
            format!("published to {platform}"),
        );
        self.recompute(published_at);
        Ok(())
    }

    /// Record a failed publish on one target.
    ///
    /// Requires the target to be `publishing`. The failure is contained to
    /// this target; siblings are unaffected. The log entry is stamped with
    /// `now`, not `error.timestamp`: the error may carry the instant the
    /// platform produced it, which can predate earlier log entries.
    pub fn mark_target_failed(
        &mut self,
        platform: Platform,
        error: LastError,
        now: DateTime<Utc>,
    ) -> Result<(), PostError> {
        self.ensure_mutable()?;
        let target = self.target_mut(platform)?;
        if target.status != TargetStatus::Publishing {
            return Err(PostError::InvalidTransition {
                platform,
                from: target.status,
                expected: TargetStatus::Publishing,
            });
        }
        target.status = TargetStatus::Failed;
        let detail = format!("{}: {}", error.code, error.message);
        target.last_error = Some(error);
        let mut entry = ExecutionLogEntry::new(
            now,
            LogAction::Failed,
            Some(platform),
            format!("failed to publish to {platform}"),
        );
        entry.error_detail = Some(detail);
        self.execution_log.push(entry);
        self.recompute(now);
        Ok(())
    }

    /// Cancel the post.
    ///
    /// Flips every still-`scheduled` target to `cancelled`; targets already
    /// in flight are left to finish (cancellation is cooperative). Fails
    /// with [`PostError::AlreadyTerminal`] if the post is no longer
    /// cancellable.
    pub fn cancel(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), PostError> {
        self.ensure_mutable()?;
        let mut flipped = 0;
        for i in 0..self.targets.len() {
            if self.targets[i].status == TargetStatus::Scheduled {
                self.targets[i].status = TargetStatus::Cancelled;
                let platform = self.targets[i].platform;
                self.log(now, LogAction::Cancelled, Some(platform), reason.to_string());
                flipped += 1;
            }
        }
        if flipped == 0 {
            // Nothing transitioned (all targets in flight); record the
            // request itself.
            self.log(now, LogAction::Cancelled, None, reason.to_string());
        }
        self.cancelled_at = Some(now);
        self.retry.next_retry_at = None;
        self.recompute(now);
        if self.targets.iter().all(|t| t.status.is_settled()) {
            self.completed_at.get_or_insert(now);
        }
        Ok(())
    }

    /// Move the due time. Only allowed while the post is still `scheduled`.
    pub fn reschedule(
        &mut self,
        new_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), PostError> {
        self.ensure_mutable()?;
        if self.overall_status != PostStatus::Scheduled {
            return Err(PostError::NotReschedulable(self.overall_status));
        }
        if new_at <= now {
            return Err(PostError::InvalidSchedule(format!(
                "scheduled_at {new_at} is not in the future"
            )));
        }
        self.scheduling
            .original_scheduled_at
            .get_or_insert(self.scheduled_at);
        self.scheduling.rescheduled_count += 1;
        self.scheduled_at = new_at;
        // A pending retry time is superseded by the explicit new time.
        self.retry.next_retry_at = None;
        self.log(
            now,
            LogAction::Scheduled,
            None,
            format!("rescheduled for {new_at}"),
        );
        Ok(())
    }

    /// Consume one retry attempt: reset failed targets to `scheduled` and
    /// set the next due time `delay` from now.
    ///
    /// `max_attempts` bounds *total* publish attempts, the initial
    /// execution included, so the last grantable retry is number
    /// `max_attempts - 1`. Targets already `published` are left untouched;
    /// a retry never re-publishes a platform that succeeded.
    pub fn apply_retry(
        &mut self,
        delay: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<(), PostError> {
        self.ensure_mutable()?;
        if self.retry.attempts_used + 1 >= self.retry.max_attempts {
            return Err(PostError::RetriesExhausted {
                attempts_used: self.retry.attempts_used,
                max_attempts: self.retry.max_attempts,
            });
        }
        self.retry.attempts_used += 1;
        self.retry.next_retry_at = Some(now + delay);
        for target in &mut self.targets {
            if target.status == TargetStatus::Failed {
                target.status = TargetStatus::Scheduled;
            }
        }
        self.log(
            now,
            LogAction::Retrying,
            None,
            format!(
                "retry {}/{} scheduled for {}",
                self.retry.attempts_used,
                self.retry.max_attempts,
                now + delay
            ),
        );
        self.recompute(now);
        Ok(())
    }

    /// Finalize an unsuccessful post once the retry policy declines to
    /// resurrect it. Stamps `completed_at`, making the post terminal.
    pub fn mark_retries_exhausted(&mut self, now: DateTime<Utc>) {
        if !matches!(
            self.overall_status,
            PostStatus::Failed | PostStatus::PartiallyPublished
        ) || self.completed_at.is_some()
        {
            return;
        }
        self.completed_at = Some(now);
        self.log(
            now,
            LogAction::Failed,
            None,
            format!(
                "giving up after {} of {} publish attempts",
                self.retry.attempts_used + 1,
                self.retry.max_attempts
            ),
        );
    }

    /// Merge engagement metrics onto a published target.
    ///
    /// Metrics are not a state transition: this is allowed on terminal
    /// posts and appends no log entry.
    pub fn record_target_metrics(
        &mut self,
        platform: Platform,
        metrics: crate::TargetMetrics,
    ) -> Result<(), PostError> {
        let post_id = self.id.clone();
        let target = self
            .targets
            .iter_mut()
            .find(|t| t.platform == platform)
            .ok_or(PostError::TargetNotFound {
                post_id,
                platform,
            })?;
        if target.status != TargetStatus::Published {
            return Err(PostError::InvalidTransition {
                platform,
                from: target.status,
                expected: TargetStatus::Published,
            });
        }
        target.metrics = metrics;
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), PostError> {
        if self.is_terminal() {
            return Err(PostError::AlreadyTerminal(self.id.clone()));
        }
        Ok(())
    }

    fn target_mut(&mut self, platform: Platform) -> Result<&mut PlatformTarget, PostError> {
        let post_id = self.id.clone();
        self.targets
            .iter_mut()
            .find(|t| t.platform == platform)
            .ok_or(PostError::TargetNotFound { post_id, platform })
    }

    fn log(
        &mut self,
        timestamp: DateTime<Utc>,
        action: LogAction,
        platform: Option<Platform>,
        message: impl Into<String>,
    ) {
        self.execution_log
            .push(ExecutionLogEntry::new(timestamp, action, platform, message));
    }

    fn recompute(&mut self, now: DateTime<Utc>) {
        self.overall_status = overall_status_of(&self.targets);
        match self.overall_status {
            PostStatus::Published => {
                self.published_at.get_or_insert(now);
                self.completed_at.get_or_insert(now);
            }
            PostStatus::Cancelled => {
                self.completed_at.get_or_insert(now);
            }
            // failed/partially_published stay open until the retry policy
            // declines; see mark_retries_exhausted.
            _ => {}
        }
    }
}

//! Retry decision logic.

use chrono::Duration;

use crate::{PostStatus, ScheduledPost, TargetStatus};

/// Largest exponent applied to the base interval, to keep the shift sane
/// before the cap kicks in.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Backoff/limit rule deciding whether a failed post is re-attempted.
///
/// Stateless: all bookkeeping lives on the post's
/// [`RetryState`](crate::RetryState). The delay grows exponentially from
/// the post's base interval and is capped at `max_backoff_secs`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_backoff_secs: u64,
}

impl RetryPolicy {
    pub fn new(max_backoff_secs: u64) -> Self {
        Self { max_backoff_secs }
    }

    /// Decide whether `post` should be retried, and with what delay.
    ///
    /// `max_attempts` bounds total publish attempts including the initial
    /// execution, so a retry is only granted while `attempts_used + 1`
    /// stays below it. Returns `None` when the post is not in a retryable
    /// status, when the attempt budget is spent, or when every failed
    /// target carries a non-retryable error code (revoked credentials,
    /// rejected content) — burning attempts on those would only delay the
    /// owner finding out.
    pub fn decide(&self, post: &ScheduledPost) -> Option<Duration> {
        if !matches!(
            post.overall_status,
            PostStatus::Failed | PostStatus::PartiallyPublished
        ) {
            return None;
        }
        if post.retry.attempts_used + 1 >= post.retry.max_attempts {
            return None;
        }

        let failed = post
            .targets
            .iter()
            .filter(|t| t.status == TargetStatus::Failed);
        let any_retryable = failed
            .clone()
            .any(|t| t.last_error.as_ref().is_none_or(|e| e.code.is_retryable()));
        if !any_retryable {
            return None;
        }

        Some(self.delay_for(post))
    }

    /// Exponential backoff: `base * 2^attempts_used`, capped.
    fn delay_for(&self, post: &ScheduledPost) -> Duration {
        let shift = post.retry.attempts_used.min(MAX_BACKOFF_SHIFT);
        let secs = post
            .retry
            .base_interval_secs
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_secs);
        Duration::seconds(secs as i64)
    }
}

impl Default for RetryPolicy {
    /// Cap backoff at one hour.
    fn default() -> Self {
        Self::new(3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ContentRef, ErrorCode, LastError, NewPost, Platform, PlatformTarget, Priority, RetryState,
        ScheduledBy,
    };
    use chrono::Utc;
    use proptest::prelude::*;

    fn failing_post(attempts_used: u32, code: ErrorCode) -> ScheduledPost {
        let now = Utc::now();
        let mut post = ScheduledPost::new(
            NewPost {
                owner_id: "owner".to_string(),
                content: ContentRef {
                    content_id: "c".to_string(),
                    text: "hi".to_string(),
                    media_url: None,
                    link: None,
                },
                scheduled_at: now + Duration::hours(1),
                timezone: "UTC".to_string(),
                targets: vec![PlatformTarget::new(Platform::Facebook, "acct")],
                retry: RetryState::default(),
                scheduled_by: ScheduledBy::User,
                priority: Priority::Normal,
            },
            now,
        )
        .unwrap();
        post.begin_publishing(now).unwrap();
        post.mark_target_failed(
            Platform::Facebook,
            LastError {
                message: "boom".to_string(),
                code,
                timestamp: now,
            },
            now,
        )
        .unwrap();
        post.retry.attempts_used = attempts_used;
        post
    }

    #[test]
    fn retries_transient_failure() {
        let post = failing_post(0, ErrorCode::Network);
        let delay = RetryPolicy::default().decide(&post).unwrap();
        assert_eq!(delay.num_seconds(), 300);
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();
        let delays: Vec<i64> = (0..3)
            .map(|used| {
                let mut post = failing_post(used, ErrorCode::Network);
                post.retry.max_attempts = 10;
                policy.decide(&post).unwrap().num_seconds()
            })
            .collect();
        assert_eq!(delays, vec![300, 600, 1200]);
    }

    #[test]
    fn declines_when_attempts_exhausted() {
        // Default max_attempts is 3: the initial execution plus two
        // retries. Two used retries leave no budget.
        let post = failing_post(2, ErrorCode::Network);
        assert!(RetryPolicy::default().decide(&post).is_none());
    }

    #[test]
    fn declines_credential_errors() {
        let post = failing_post(0, ErrorCode::NeedsReconnection);
        assert!(RetryPolicy::default().decide(&post).is_none());
    }

    #[test]
    fn declines_rejected_content() {
        let post = failing_post(0, ErrorCode::Rejected);
        assert!(RetryPolicy::default().decide(&post).is_none());
    }

    #[test]
    fn declines_successful_post() {
        let now = Utc::now();
        let mut post = failing_post(0, ErrorCode::Network);
        post.apply_retry(Duration::minutes(5), now).unwrap();
        // Back to scheduled; nothing to retry right now.
        assert!(RetryPolicy::default().decide(&post).is_none());
    }

    proptest! {
        // Delay never exceeds the cap and never drops below the base.
        #[test]
        fn delay_is_bounded(attempts in 0u32..3, base in 1u64..7200) {
            let mut post = failing_post(attempts, ErrorCode::Network);
            post.retry.base_interval_secs = base;
            post.retry.max_attempts = 10;

            let delay = RetryPolicy::default().decide(&post).unwrap().num_seconds() as u64;
            prop_assert!(delay <= 3600);
            prop_assert!(delay >= base.min(3600));
        }

        // Backoff is monotonically non-decreasing in attempts used.
        #[test]
        fn delay_non_decreasing(a in 0u32..10, b in 0u32..10) {
            let policy = RetryPolicy::default();
            let mut post_a = failing_post(a, ErrorCode::Network);
            let mut post_b = failing_post(b, ErrorCode::Network);
            post_a.retry.max_attempts = 20;
            post_b.retry.max_attempts = 20;

            let delay_a = policy.decide(&post_a).unwrap();
            let delay_b = policy.decide(&post_b).unwrap();
            if a <= b {
                prop_assert!(delay_a <= delay_b);
            }
        }

        // Total attempts (the initial execution plus granted retries)
        // never exceed the configured maximum.
        #[test]
        fn attempts_bounded(max in 1u32..5) {
            let now = Utc::now();
            let mut post = failing_post(0, ErrorCode::Network);
            post.retry.max_attempts = max;

            let mut executions = 1u32;
            while post.apply_retry(Duration::seconds(1), now).is_ok() {
                executions += 1;
                prop_assert!(executions <= max);
                // Fail again so the next decision sees a failed post.
                post.begin_publishing(now).unwrap();
                post.mark_target_failed(
                    Platform::Facebook,
                    LastError {
                        message: "boom".to_string(),
                        code: ErrorCode::Network,
                        timestamp: now,
                    },
                    now,
                )
                .unwrap();
            }
            prop_assert_eq!(executions, max);
            prop_assert!(post.retry.attempts_used < post.retry.max_attempts);
        }
    }
}

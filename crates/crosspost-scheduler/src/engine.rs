//! Execution engine: runs one publish pass over a due post.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crosspost_model::{Platform, PlatformTarget, PostStatus, RetryPolicy, ScheduledPost};
use crosspost_publisher::{PublishError, PublishOutcome, PublisherRegistry};

use crate::{CredentialSource, PostStore, SchedulerError};

/// Upper bound on a single platform publish call, over and above the HTTP
/// client's own timeouts.
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of one execution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The post was not claimed (not due, already in flight, cancelled, or
    /// its results were discarded because it went terminal mid-flight).
    Skipped,
    /// The post reached a terminal status.
    Completed(PostStatus),
    /// Some targets failed retryably; a retry was scheduled this far out.
    RetryScheduled(chrono::Duration),
}

/// Runs publish passes: claims a due post, fans out to the platform
/// adapters, records per-target results, and asks the retry policy what to
/// do with whatever failed.
///
/// The engine is stateless between passes; everything it needs to resume
/// after a crash lives on the post itself.
pub struct ExecutionEngine {
    store: Arc<dyn PostStore>,
    publishers: Arc<PublisherRegistry>,
    accounts: Arc<dyn CredentialSource>,
    retry_policy: RetryPolicy,
    publish_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn PostStore>,
        publishers: Arc<PublisherRegistry>,
        accounts: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            store,
            publishers,
            accounts,
            retry_policy: RetryPolicy::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Run one execution pass over the post with this id.
    ///
    /// Safe to call from both the timer path and the reconciliation sweep:
    /// the store's claim is atomic, so a concurrent duplicate trigger
    /// observes nothing left to claim and returns [`ExecutionOutcome::Skipped`].
    #[tracing::instrument(skip(self), fields(post_id = %id))]
    pub async fn execute(&self, id: &str) -> Result<ExecutionOutcome, SchedulerError> {
        let Some(mut post) = self.store.claim_for_publishing(id, Utc::now()).await? else {
            tracing::debug!("nothing to claim, skipping");
            return Ok(ExecutionOutcome::Skipped);
        };

        let claimed: Vec<Platform> = post
            .targets
            .iter()
            .filter(|t| t.status == crosspost_model::TargetStatus::Publishing)
            .map(|t| t.platform)
            .collect();
        tracing::info!(platforms = ?claimed, "executing publish pass");

        for platform in claimed {
            // target() cannot miss here, but stay on the fallible path.
            let account_ref = post
                .target(platform)
                .map(|t| t.account_ref.clone())
                .unwrap_or_default();
            match self.publish_one(&post, platform, &account_ref).await {
                Ok(outcome) => {
                    tracing::info!(
                        %platform,
                        platform_post_id = %outcome.platform_post_id,
                        "published"
                    );
                    post.mark_target_published(
                        platform,
                        outcome.platform_post_id,
                        outcome.published_at,
                    )?;
                }
                Err(err) => {
                    tracing::warn!(%platform, error = %err, "publish failed");
                    let now = Utc::now();
                    post.mark_target_failed(platform, err.into_last_error(now), now)?;
                }
            }
        }

        let outcome = match post.overall_status {
            PostStatus::Failed | PostStatus::PartiallyPublished => {
                match self.retry_policy.decide(&post) {
                    Some(delay) => {
                        post.apply_retry(delay, Utc::now())?;
                        tracing::info!(
                            delay_secs = delay.num_seconds(),
                            attempts_used = post.retry.attempts_used,
                            "retry scheduled"
                        );
                        ExecutionOutcome::RetryScheduled(delay)
                    }
                    None => {
                        post.mark_retries_exhausted(Utc::now());
                        tracing::warn!(status = ?post.overall_status, "giving up on post");
                        ExecutionOutcome::Completed(post.overall_status)
                    }
                }
            }
            status => ExecutionOutcome::Completed(status),
        };

        if !self.store.update(&post, PostStatus::Publishing).await? {
            // The stored copy went terminal (cancelled) while we were
            // publishing; our results are dropped on the floor.
            tracing::warn!("post went terminal mid-flight, discarding results");
            return Ok(ExecutionOutcome::Skipped);
        }

        Ok(outcome)
    }

    async fn publish_one(
        &self,
        post: &ScheduledPost,
        platform: Platform,
        account_ref: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let publisher = self
            .publishers
            .get(platform)
            .ok_or_else(|| PublishError::unsupported(platform))?;
        let credentials = self
            .accounts
            .credentials(&post.owner_id, platform, account_ref)
            .await?;

        match tokio::time::timeout(
            self.publish_timeout,
            publisher.publish(&credentials, &post.content),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(PublishError::timeout(format!(
                "publish to {platform} timed out after {:?}",
                self.publish_timeout
            ))),
        }
    }

    /// Fetch fresh engagement metrics for every published target of a post.
    ///
    /// Best-effort: a platform that errors is logged and skipped, and never
    /// affects the post's status.
    #[tracing::instrument(skip(self), fields(post_id = %id))]
    pub async fn refresh_metrics(&self, id: &str) -> Result<(), SchedulerError> {
        let post = self.store.get(id).await?;
        let published: Vec<&PlatformTarget> = post
            .targets
            .iter()
            .filter(|t| {
                t.status == crosspost_model::TargetStatus::Published
                    && t.platform_post_id.is_some()
            })
            .collect();

        for target in published {
            let platform = target.platform;
            let Some(publisher) = self.publishers.get(platform) else {
                continue;
            };
            let Some(platform_post_id) = target.platform_post_id.as_deref() else {
                continue;
            };
            let credentials = match self
                .accounts
                .credentials(&post.owner_id, platform, &target.account_ref)
                .await
            {
                Ok(c) => c,
                Err(err) => {
                    tracing::warn!(%platform, error = %err, "no credentials for metrics");
                    continue;
                }
            };
            match publisher.get_metrics(&credentials, platform_post_id).await {
                Ok(metrics) => {
                    self.store.record_metrics(id, platform, metrics).await?;
                }
                Err(err) => {
                    tracing::warn!(%platform, error = %err, "metrics fetch failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{make_post, ScriptedPublisher};
    use crate::{MemoryPostStore, StaticAccounts};
    use chrono::Duration as ChronoDuration;
    use crosspost_model::{ErrorCode, TargetStatus};
    use crosspost_publisher::{AccountCredentials, PlatformPublisher};
    use pretty_assertions::assert_eq;

    struct Harness {
        store: Arc<MemoryPostStore>,
        engine: ExecutionEngine,
    }

    async fn harness(publishers: Vec<Arc<ScriptedPublisher>>) -> Harness {
        let store = Arc::new(MemoryPostStore::new());
        let accounts = Arc::new(StaticAccounts::new());
        let mut registry = PublisherRegistry::new();
        for publisher in publishers {
            accounts
                .connect(
                    "owner",
                    publisher.platform(),
                    AccountCredentials::new("acct-1", "token"),
                )
                .await;
            registry.register(publisher);
        }
        let engine = ExecutionEngine::new(
            store.clone(),
            Arc::new(registry),
            accounts,
        );
        Harness { store, engine }
    }

    #[tokio::test]
    async fn publishes_all_targets() {
        let fb = ScriptedPublisher::ok(crosspost_model::Platform::Facebook);
        let li = ScriptedPublisher::ok(crosspost_model::Platform::Linkedin);
        let h = harness(vec![fb.clone(), li.clone()]).await;

        let post = make_post(
            "owner",
            &[
                crosspost_model::Platform::Facebook,
                crosspost_model::Platform::Linkedin,
            ],
            Utc::now() - ChronoDuration::seconds(1),
        );
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed(PostStatus::Published));

        let stored = h.store.get(&id).await.unwrap();
        assert!(stored.is_terminal());
        assert!(stored.published_at.is_some());
        for target in &stored.targets {
            assert_eq!(target.status, TargetStatus::Published);
            assert!(target.platform_post_id.is_some());
        }
        assert_eq!(fb.calls(), 1);
        assert_eq!(li.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failure_schedules_retry_for_failed_target_only() {
        let fb = ScriptedPublisher::ok(crosspost_model::Platform::Facebook);
        let li = ScriptedPublisher::failing(
            crosspost_model::Platform::Linkedin,
            ErrorCode::ServerError,
        );
        let h = harness(vec![fb.clone(), li]).await;

        let post = make_post(
            "owner",
            &[
                crosspost_model::Platform::Facebook,
                crosspost_model::Platform::Linkedin,
            ],
            Utc::now() - ChronoDuration::seconds(1),
        );
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(
            outcome,
            ExecutionOutcome::RetryScheduled(ChronoDuration::seconds(300))
        );

        let stored = h.store.get(&id).await.unwrap();
        assert_eq!(stored.overall_status, PostStatus::Scheduled);
        assert_eq!(stored.retry.attempts_used, 1);
        assert!(stored.retry.next_retry_at.is_some());
        // The published target is never reset for retry.
        assert_eq!(
            stored
                .target(crosspost_model::Platform::Facebook)
                .unwrap()
                .status,
            TargetStatus::Published
        );
        assert_eq!(
            stored
                .target(crosspost_model::Platform::Linkedin)
                .unwrap()
                .status,
            TargetStatus::Scheduled
        );
        assert_eq!(fb.calls(), 1);
    }

    #[tokio::test]
    async fn credential_failure_is_not_retried() {
        let fb = ScriptedPublisher::failing(
            crosspost_model::Platform::Facebook,
            ErrorCode::NeedsReconnection,
        );
        let h = harness(vec![fb]).await;

        let post = make_post(
            "owner",
            &[crosspost_model::Platform::Facebook],
            Utc::now() - ChronoDuration::seconds(1),
        );
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed(PostStatus::Failed));

        let stored = h.store.get(&id).await.unwrap();
        assert!(stored.is_terminal());
        let target = stored.target(crosspost_model::Platform::Facebook).unwrap();
        assert_eq!(
            target.last_error.as_ref().unwrap().code,
            ErrorCode::NeedsReconnection
        );
    }

    #[tokio::test]
    async fn attempt_budget_bounds_total_publish_calls() {
        let fb = ScriptedPublisher::failing(
            crosspost_model::Platform::Facebook,
            ErrorCode::Network,
        );
        let h = harness(vec![fb.clone()]).await;

        let mut post = make_post(
            "owner",
            &[crosspost_model::Platform::Facebook],
            Utc::now() - ChronoDuration::seconds(1),
        );
        post.retry.max_attempts = 2;
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        // First execution fails and earns the single retry.
        let outcome = h.engine.execute(&id).await.unwrap();
        assert!(matches!(outcome, ExecutionOutcome::RetryScheduled(_)));

        // Pull the retry time into the past so the second pass is due now.
        let mut stored = h.store.get(&id).await.unwrap();
        stored.retry.next_retry_at = Some(Utc::now() - ChronoDuration::seconds(1));
        assert!(h.store.update(&stored, PostStatus::Scheduled).await.unwrap());

        // Second (and last) attempt fails; the budget is spent.
        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Completed(PostStatus::Failed));

        let stored = h.store.get(&id).await.unwrap();
        assert!(stored.is_terminal());
        assert_eq!(fb.calls(), 2, "exactly max_attempts publish calls");

        // A stray third trigger finds nothing to do.
        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(fb.calls(), 2);
    }

    #[tokio::test]
    async fn cancelled_post_is_never_executed() {
        let fb = ScriptedPublisher::ok(crosspost_model::Platform::Facebook);
        let h = harness(vec![fb.clone()]).await;

        let mut post = make_post(
            "owner",
            &[crosspost_model::Platform::Facebook],
            Utc::now() - ChronoDuration::seconds(1),
        );
        post.cancel("changed my mind", Utc::now()).unwrap();
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        let outcome = h.engine.execute(&id).await.unwrap();
        assert_eq!(outcome, ExecutionOutcome::Skipped);
        assert_eq!(fb.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_platform_call_fails_with_timeout() {
        let fb = ScriptedPublisher::hanging(crosspost_model::Platform::Facebook);
        let mut h = harness(vec![fb]).await;
        h.engine = h.engine.with_publish_timeout(Duration::from_secs(5));

        let post = make_post(
            "owner",
            &[crosspost_model::Platform::Facebook],
            Utc::now() - ChronoDuration::seconds(1),
        );
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();

        h.engine.execute(&id).await.unwrap();

        let stored = h.store.get(&id).await.unwrap();
        let target = stored.target(crosspost_model::Platform::Facebook).unwrap();
        assert_eq!(target.status, TargetStatus::Scheduled, "timeout is retryable");
        assert_eq!(
            stored
                .execution_log
                .iter()
                .filter(|e| e.error_detail.is_some())
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn refresh_metrics_updates_published_targets() {
        let fb = ScriptedPublisher::ok(crosspost_model::Platform::Facebook);
        let h = harness(vec![fb]).await;

        let post = make_post(
            "owner",
            &[crosspost_model::Platform::Facebook],
            Utc::now() - ChronoDuration::seconds(1),
        );
        let id = post.id.clone();
        h.store.insert(post).await.unwrap();
        h.engine.execute(&id).await.unwrap();

        h.engine.refresh_metrics(&id).await.unwrap();
        let stored = h.store.get(&id).await.unwrap();
        let metrics = stored
            .target(crosspost_model::Platform::Facebook)
            .unwrap()
            .metrics;
        assert_eq!(metrics.likes, 42, "scripted metrics recorded");
    }
}

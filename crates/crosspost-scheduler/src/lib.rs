//! Scheduling and execution for cross-platform post publishing.
//!
//! The pieces, from the outside in:
//! - [`PostService`]: user-facing lifecycle operations (schedule, cancel,
//!   reschedule, list, stats, cleanup)
//! - [`Dispatcher`]: one timer per pending post plus a periodic
//!   reconciliation sweep over the store
//! - [`ExecutionEngine`]: runs a single publish pass and consults the
//!   retry policy on failure
//! - [`PostStore`]: persistence seam, including the atomic claim that
//!   makes duplicate triggers harmless
//! - [`CredentialSource`]: seam to the external account/credential store

mod accounts;
mod dispatcher;
mod engine;
mod error;
mod service;
mod store;

pub use accounts::{CredentialSource, StaticAccounts};
pub use dispatcher::Dispatcher;
pub use engine::{ExecutionEngine, ExecutionOutcome};
pub use error::SchedulerError;
pub use service::{PostService, ScheduleRequest, SchedulerStats, TargetSpec};
pub use store::{MemoryPostStore, PostFilter, PostStore, StoreStats};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};

    use crosspost_model::{
        ContentRef, ErrorCode, NewPost, Platform, PlatformTarget, Priority, RetryState,
        ScheduledBy, ScheduledPost, TargetMetrics,
    };
    use crosspost_publisher::{
        AccountCredentials, PlatformPublisher, PublishError, PublishOutcome,
    };

    /// Build a post at an arbitrary due time, past ones included.
    pub(crate) fn make_post(
        owner: &str,
        platforms: &[Platform],
        scheduled_at: DateTime<Utc>,
    ) -> ScheduledPost {
        ScheduledPost::new(
            NewPost {
                owner_id: owner.to_string(),
                content: ContentRef {
                    content_id: "content-1".to_string(),
                    text: "hello world".to_string(),
                    media_url: Some("https://example.com/pic.jpg".to_string()),
                    link: None,
                },
                scheduled_at,
                timezone: "UTC".to_string(),
                targets: platforms
                    .iter()
                    .map(|p| PlatformTarget::new(*p, format!("acct-{p}")))
                    .collect(),
                retry: RetryState::default(),
                scheduled_by: ScheduledBy::User,
                priority: Priority::Normal,
            },
            // Validation requires a future due time; backdate the clock so
            // tests can create posts that are already due.
            scheduled_at - ChronoDuration::hours(1),
        )
        .expect("valid post")
    }

    /// Poll a condition every 10ms, panicking if it stays false for 5s.
    pub(crate) async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..500 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met within 5s");
    }

    enum Step {
        Succeed,
        Fail(ErrorCode),
        Hang,
    }

    /// Publisher double that follows a fixed script, then succeeds forever.
    pub(crate) struct ScriptedPublisher {
        platform: Platform,
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedPublisher {
        fn with_script(platform: Platform, script: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                platform,
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            })
        }

        /// Succeeds on every call.
        pub(crate) fn ok(platform: Platform) -> Arc<Self> {
            Self::with_script(platform, Vec::new())
        }

        /// Fails on every call with the given code.
        pub(crate) fn failing(platform: Platform, code: ErrorCode) -> Arc<Self> {
            // A long run of failures outlasts any retry budget in the tests.
            Self::with_script(platform, (0..64).map(|_| Step::Fail(code)).collect())
        }

        /// Fails on the first call, then succeeds.
        pub(crate) fn failing_once(platform: Platform, code: ErrorCode) -> Arc<Self> {
            Self::with_script(platform, vec![Step::Fail(code)])
        }

        /// Never returns (until the caller's timeout).
        pub(crate) fn hanging(platform: Platform) -> Arc<Self> {
            Self::with_script(platform, vec![Step::Hang])
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlatformPublisher for ScriptedPublisher {
        fn platform(&self) -> Platform {
            self.platform
        }

        async fn publish(
            &self,
            _credentials: &AccountCredentials,
            _content: &ContentRef,
        ) -> Result<PublishOutcome, PublishError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let step = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Step::Succeed);
            match step {
                Step::Succeed => Ok(PublishOutcome {
                    platform_post_id: format!("{}-{call}", self.platform),
                    published_at: Utc::now(),
                }),
                Step::Fail(code) => Err(PublishError::new(code, "scripted failure")),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(PublishError::timeout("scripted hang"))
                }
            }
        }

        async fn get_metrics(
            &self,
            _credentials: &AccountCredentials,
            _platform_post_id: &str,
        ) -> Result<TargetMetrics, PublishError> {
            Ok(TargetMetrics {
                likes: 42,
                ..TargetMetrics::default()
            })
        }
    }
}

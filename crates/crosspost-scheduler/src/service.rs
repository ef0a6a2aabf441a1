//! Post lifecycle API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crosspost_model::{
    ContentRef, NewPost, Platform, PlatformTarget, Priority, RetryState, ScheduledBy,
    ScheduledPost,
};

use crate::{
    Dispatcher, ExecutionEngine, PostFilter, PostStore, SchedulerError, StoreStats,
};

/// Request to schedule a post.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub owner_id: String,
    pub content: ContentRef,
    pub scheduled_at: DateTime<Utc>,
    /// Display-only timezone label.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub scheduled_by: ScheduledBy,
    #[serde(default)]
    pub priority: Priority,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// One requested platform target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub platform: Platform,
    pub account_ref: String,
}

/// Operational counters for the scheduler as a whole.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SchedulerStats {
    pub active_timers: usize,
    pub scheduled: usize,
    pub published_today: usize,
    pub failed_today: usize,
}

/// User-facing lifecycle operations over scheduled posts.
///
/// Every operation is scoped to the requesting owner; a post belonging to
/// someone else is indistinguishable from one that does not exist.
pub struct PostService {
    store: Arc<dyn PostStore>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<ExecutionEngine>,
}

impl PostService {
    pub fn new(
        store: Arc<dyn PostStore>,
        dispatcher: Arc<Dispatcher>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            engine,
        }
    }

    /// Validate, persist, and arm a timer for a new post.
    #[tracing::instrument(skip(self, request), fields(owner_id = %request.owner_id))]
    pub async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledPost, SchedulerError> {
        let targets = request
            .targets
            .into_iter()
            .map(|t| PlatformTarget::new(t.platform, t.account_ref))
            .collect();
        let post = ScheduledPost::new(
            NewPost {
                owner_id: request.owner_id,
                content: request.content,
                scheduled_at: request.scheduled_at,
                timezone: request.timezone,
                targets,
                retry: RetryState::default(),
                scheduled_by: request.scheduled_by,
                priority: request.priority,
            },
            Utc::now(),
        )?;

        self.store.insert(post.clone()).await?;
        self.dispatcher.register(&post.id, post.due_at()).await;
        tracing::info!(post_id = %post.id, scheduled_at = %post.scheduled_at, "post scheduled");
        Ok(post)
    }

    /// Cancel a post. The timer is disarmed first so a fresh fire cannot
    /// slip in; a claim that already landed makes the store's status check
    /// fail, in which case we re-read and apply the cancel to the in-flight
    /// copy (cooperatively, leaving `publishing` targets to finish).
    #[tracing::instrument(skip(self))]
    pub async fn cancel(
        &self,
        owner_id: &str,
        id: &str,
        reason: &str,
    ) -> Result<ScheduledPost, SchedulerError> {
        self.dispatcher.unregister(id).await;
        loop {
            let mut post = self.get(owner_id, id).await?;
            let read_status = post.overall_status;
            post.cancel(reason, Utc::now())?;
            if self.store.update(&post, read_status).await? {
                tracing::info!(post_id = %id, "post cancelled");
                return Ok(post);
            }
            // Lost the race with an execution pass; take a fresh copy.
        }
    }

    /// Move a still-scheduled post to a new due time and re-arm its timer.
    #[tracing::instrument(skip(self))]
    pub async fn reschedule(
        &self,
        owner_id: &str,
        id: &str,
        new_at: DateTime<Utc>,
    ) -> Result<ScheduledPost, SchedulerError> {
        loop {
            let mut post = self.get(owner_id, id).await?;
            let read_status = post.overall_status;
            post.reschedule(new_at, Utc::now())?;
            if self.store.update(&post, read_status).await? {
                self.dispatcher.register(id, post.due_at()).await;
                tracing::info!(post_id = %id, %new_at, "post rescheduled");
                return Ok(post);
            }
            // Lost the race with an execution pass; take a fresh copy. If
            // the post is now in flight, the re-read fails with
            // `NotReschedulable` and that error propagates.
        }
    }

    pub async fn get(&self, owner_id: &str, id: &str) -> Result<ScheduledPost, SchedulerError> {
        let post = self.store.get(id).await?;
        if post.owner_id != owner_id {
            return Err(SchedulerError::PostNotFound(id.to_string()));
        }
        Ok(post)
    }

    pub async fn list(
        &self,
        owner_id: &str,
        filter: &PostFilter,
    ) -> Result<Vec<ScheduledPost>, SchedulerError> {
        self.store.list_by_owner(owner_id, filter).await
    }

    /// Refresh engagement metrics for a post's published targets.
    pub async fn refresh_metrics(&self, owner_id: &str, id: &str) -> Result<ScheduledPost, SchedulerError> {
        // Ownership check first; the engine works on raw ids.
        self.get(owner_id, id).await?;
        self.engine.refresh_metrics(id).await?;
        self.get(owner_id, id).await
    }

    /// Counters since the start of the current UTC day, plus live timer
    /// count.
    pub async fn stats(&self) -> Result<SchedulerStats, SchedulerError> {
        let since = start_of_today();
        let StoreStats {
            scheduled,
            published_since,
            failed_since,
        } = self.store.stats(since).await?;
        Ok(SchedulerStats {
            active_timers: self.dispatcher.active_timers().await,
            scheduled,
            published_today: published_since,
            failed_today: failed_since,
        })
    }

    /// Delete terminal posts older than the retention window; returns how
    /// many were removed.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_completed(
        &self,
        retention: chrono::Duration,
    ) -> Result<usize, SchedulerError> {
        let deleted = self
            .store
            .delete_terminal_older_than(Utc::now() - retention)
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up completed posts");
        }
        Ok(deleted)
    }
}

fn start_of_today() -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

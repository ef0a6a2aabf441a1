//! Post persistence.
//!
//! One record per post holds the full aggregate, execution log included;
//! no separate collections are required for correctness. The store is also
//! where the at-most-once claim lives: [`PostStore::claim_for_publishing`]
//! is an atomic check-and-set out of `scheduled` into `publishing`, and it
//! is the sole mechanism protecting against the double-trigger race
//! between the timer path and the reconciliation sweep.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crosspost_model::{Platform, PostStatus, ScheduledPost, TargetMetrics};

use crate::SchedulerError;

/// Filters for listing a user's posts.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub platform: Option<Platform>,
    pub scheduled_after: Option<DateTime<Utc>>,
    pub scheduled_before: Option<DateTime<Utc>>,
    /// Maximum results; defaults to 50.
    pub limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 50;

/// Counters reported by [`PostStore::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Posts currently waiting to run.
    pub scheduled: usize,
    /// Posts fully published since the reference instant.
    pub published_since: usize,
    /// Posts that failed (fully or partially) since the reference instant.
    pub failed_since: usize,
}

/// Persistence seam for scheduled posts.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: ScheduledPost) -> Result<(), SchedulerError>;

    async fn get(&self, id: &str) -> Result<ScheduledPost, SchedulerError>;

    /// Write back a mutated post, compare-and-set on the overall status.
    ///
    /// `expected` is the overall status the caller read before mutating.
    /// Returns `false` (discarding the write) when the stored copy is
    /// already terminal or its status has moved since that read: the
    /// former drops the result of an in-flight publish that lands after a
    /// cancellation; the latter forces a read-modify-write caller that
    /// lost a race (say, a cancel against a concurrent claim) to re-read
    /// and re-apply.
    async fn update(
        &self,
        post: &ScheduledPost,
        expected: PostStatus,
    ) -> Result<bool, SchedulerError>;

    /// Atomically claim a due post for execution: flip its `scheduled`
    /// targets to `publishing` under the store lock and return the claimed
    /// copy. Returns `None` when the post is not due, already claimed, or
    /// terminal — the caller must then skip execution.
    async fn claim_for_publishing(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledPost>, SchedulerError>;

    /// Merge engagement metrics onto a published target. Permitted on
    /// terminal posts; metrics are not a state transition.
    async fn record_metrics(
        &self,
        id: &str,
        platform: Platform,
        metrics: TargetMetrics,
    ) -> Result<(), SchedulerError>;

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &PostFilter,
    ) -> Result<Vec<ScheduledPost>, SchedulerError>;

    /// Ids of posts whose due time (schedule or pending retry) has passed.
    async fn due_post_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, SchedulerError>;

    /// All posts still waiting to run, with their due instants. Used to
    /// rebuild the timer registry at startup.
    async fn pending_posts(&self) -> Result<Vec<(String, DateTime<Utc>)>, SchedulerError>;

    /// Delete terminal posts completed before `cutoff`; returns how many
    /// were removed.
    async fn delete_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, SchedulerError>;

    async fn stats(&self, since: DateTime<Utc>) -> Result<StoreStats, SchedulerError>;
}

/// In-memory store backed by a `RwLock`ed map.
#[derive(Default)]
pub struct MemoryPostStore {
    posts: RwLock<HashMap<String, ScheduledPost>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn insert(&self, post: ScheduledPost) -> Result<(), SchedulerError> {
        let mut posts = self.posts.write().await;
        if posts.contains_key(&post.id) {
            return Err(SchedulerError::PostExists(post.id));
        }
        posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<ScheduledPost, SchedulerError> {
        self.posts
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::PostNotFound(id.to_string()))
    }

    async fn update(
        &self,
        post: &ScheduledPost,
        expected: PostStatus,
    ) -> Result<bool, SchedulerError> {
        let mut posts = self.posts.write().await;
        let stored = posts
            .get_mut(&post.id)
            .ok_or_else(|| SchedulerError::PostNotFound(post.id.clone()))?;
        if stored.is_terminal() || stored.overall_status != expected {
            return Ok(false);
        }
        let mut post = post.clone();
        // A cancel request that raced with this execution pass must not be
        // erased by the overwrite.
        if stored.cancelled_at.is_some() && post.cancelled_at.is_none() {
            post.cancelled_at = stored.cancelled_at;
        }
        *stored = post;
        Ok(true)
    }

    async fn claim_for_publishing(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ScheduledPost>, SchedulerError> {
        let mut posts = self.posts.write().await;
        let post = posts
            .get_mut(id)
            .ok_or_else(|| SchedulerError::PostNotFound(id.to_string()))?;
        if !post.is_due(now) {
            return Ok(None);
        }
        let claimed = post.begin_publishing(now)?;
        if claimed.is_empty() {
            return Ok(None);
        }
        Ok(Some(post.clone()))
    }

    async fn record_metrics(
        &self,
        id: &str,
        platform: Platform,
        metrics: TargetMetrics,
    ) -> Result<(), SchedulerError> {
        let mut posts = self.posts.write().await;
        let post = posts
            .get_mut(id)
            .ok_or_else(|| SchedulerError::PostNotFound(id.to_string()))?;
        post.record_target_metrics(platform, metrics)?;
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: &str,
        filter: &PostFilter,
    ) -> Result<Vec<ScheduledPost>, SchedulerError> {
        let posts = self.posts.read().await;
        let mut matching: Vec<ScheduledPost> = posts
            .values()
            .filter(|p| p.owner_id == owner_id)
            .filter(|p| filter.status.is_none_or(|s| p.overall_status == s))
            .filter(|p| {
                filter
                    .platform
                    .is_none_or(|platform| p.target(platform).is_some())
            })
            .filter(|p| filter.scheduled_after.is_none_or(|t| p.scheduled_at >= t))
            .filter(|p| filter.scheduled_before.is_none_or(|t| p.scheduled_at <= t))
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.scheduled_at);
        matching.truncate(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        Ok(matching)
    }

    async fn due_post_ids(&self, now: DateTime<Utc>) -> Result<Vec<String>, SchedulerError> {
        Ok(self
            .posts
            .read()
            .await
            .values()
            .filter(|p| p.is_due(now))
            .map(|p| p.id.clone())
            .collect())
    }

    async fn pending_posts(&self) -> Result<Vec<(String, DateTime<Utc>)>, SchedulerError> {
        Ok(self
            .posts
            .read()
            .await
            .values()
            .filter(|p| p.overall_status == PostStatus::Scheduled)
            .map(|p| (p.id.clone(), p.due_at()))
            .collect())
    }

    async fn delete_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, SchedulerError> {
        let mut posts = self.posts.write().await;
        let before = posts.len();
        posts.retain(|_, p| {
            !(p.is_terminal() && p.completed_at.is_some_and(|done| done < cutoff))
        });
        Ok(before - posts.len())
    }

    async fn stats(&self, since: DateTime<Utc>) -> Result<StoreStats, SchedulerError> {
        let posts = self.posts.read().await;
        let mut stats = StoreStats::default();
        for post in posts.values() {
            match post.overall_status {
                PostStatus::Scheduled => stats.scheduled += 1,
                PostStatus::Published => {
                    if post.published_at.is_some_and(|at| at >= since) {
                        stats.published_since += 1;
                    }
                }
                PostStatus::Failed | PostStatus::PartiallyPublished => {
                    if post.completed_at.is_some_and(|at| at >= since) {
                        stats.failed_since += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(stats)
    }
}

//! Facebook page publishing via the Graph API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crosspost_model::{ContentRef, Platform, TargetMetrics};

use crate::{AccountCredentials, PlatformPublisher, PublishError, PublishOutcome, http};

const GRAPH_BASE_URL: &str = "https://graph.facebook.com/v18.0";

/// Publishes to a Facebook page feed. The account id is the page id.
pub struct FacebookPublisher {
    http: Client,
    base_url: String,
}

impl FacebookPublisher {
    pub fn new() -> Self {
        Self::with_base_url(GRAPH_BASE_URL)
    }

    /// Point the adapter at a different Graph endpoint (tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            base_url: base_url.into(),
        }
    }
}

impl Default for FacebookPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct FeedResponse {
    id: String,
}

#[derive(Deserialize)]
struct PostEngagement {
    likes: Option<Summarized>,
    comments: Option<Summarized>,
    shares: Option<ShareCount>,
}

#[derive(Deserialize)]
struct Summarized {
    summary: SummaryCount,
}

#[derive(Deserialize)]
struct SummaryCount {
    total_count: u64,
}

#[derive(Deserialize)]
struct ShareCount {
    count: u64,
}

#[async_trait]
impl PlatformPublisher for FacebookPublisher {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        content: &ContentRef,
    ) -> Result<PublishOutcome, PublishError> {
        let mut body = json!({
            "message": content.text,
            "access_token": credentials.access_token,
        });
        if let Some(link) = content.media_url.as_ref().or(content.link.as_ref()) {
            body["link"] = json!(link);
        }

        let resp = self
            .http
            .post(format!("{}/{}/feed", self.base_url, credentials.account_id))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http::graph_error(resp).await);
        }

        let feed: FeedResponse = resp.json().await?;
        debug!(post_id = %feed.id, "published facebook page post");
        Ok(PublishOutcome {
            platform_post_id: feed.id,
            published_at: Utc::now(),
        })
    }

    async fn get_metrics(
        &self,
        credentials: &AccountCredentials,
        platform_post_id: &str,
    ) -> Result<TargetMetrics, PublishError> {
        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, platform_post_id))
            .query(&[
                (
                    "fields",
                    "likes.summary(true),comments.summary(true),shares",
                ),
                ("access_token", credentials.access_token.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http::graph_error(resp).await);
        }

        let engagement: PostEngagement = resp.json().await?;
        Ok(TargetMetrics {
            likes: engagement.likes.map(|l| l.summary.total_count).unwrap_or(0),
            comments: engagement
                .comments
                .map(|c| c.summary.total_count)
                .unwrap_or(0),
            shares: engagement.shares.map(|s| s.count).unwrap_or(0),
            reach: 0,
            impressions: 0,
        })
    }
}

//! LinkedIn publishing via the UGC posts endpoint.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crosspost_model::{ContentRef, Platform, TargetMetrics};

use crate::{AccountCredentials, PlatformPublisher, PublishError, PublishOutcome, http};

const API_BASE_URL: &str = "https://api.linkedin.com/v2";

/// Publishes member shares on LinkedIn. The account id is the person URN
/// suffix (`urn:li:person:{account_id}`).
pub struct LinkedinPublisher {
    http: Client,
    base_url: String,
}

impl LinkedinPublisher {
    pub fn new() -> Self {
        Self::with_base_url(API_BASE_URL)
    }

    /// Point the adapter at a different API endpoint (tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            base_url: base_url.into(),
        }
    }
}

impl Default for LinkedinPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct UgcErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct UgcResponse {
    id: Option<String>,
}

#[async_trait]
impl PlatformPublisher for LinkedinPublisher {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        content: &ContentRef,
    ) -> Result<PublishOutcome, PublishError> {
        let mut share_content = json!({
            "shareCommentary": { "text": content.text },
            "shareMediaCategory": if content.media_url.is_some() { "IMAGE" } else { "NONE" },
        });
        if let Some(url) = &content.media_url {
            share_content["media"] = json!([{
                "status": "READY",
                "originalUrl": url,
            }]);
        }

        let body = json!({
            "author": format!("urn:li:person:{}", credentials.account_id),
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share_content },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
        });

        let resp = self
            .http
            .post(format!("{}/ugcPosts", self.base_url))
            .bearer_auth(&credentials.access_token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = match resp.json::<UgcErrorBody>().await {
                Ok(body) => body.message.unwrap_or_else(|| format!("HTTP {status}")),
                Err(_) => format!("HTTP {status}"),
            };
            return Err(PublishError::from_status(status, message));
        }

        // LinkedIn returns the share URN in the x-restli-id header; newer
        // responses also carry it in the body.
        let header_id = resp
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let platform_post_id = match header_id {
            Some(id) => id,
            None => resp
                .json::<UgcResponse>()
                .await
                .ok()
                .and_then(|b| b.id)
                .ok_or_else(|| {
                    PublishError::new(
                        crosspost_model::ErrorCode::Unknown,
                        "linkedin did not return a share id",
                    )
                })?,
        };

        debug!(share_id = %platform_post_id, "published linkedin share");
        Ok(PublishOutcome {
            platform_post_id,
            published_at: Utc::now(),
        })
    }

    /// Share statistics need additional permissions and the organization
    /// API; report empty metrics rather than failing the sweep.
    async fn get_metrics(
        &self,
        _credentials: &AccountCredentials,
        platform_post_id: &str,
    ) -> Result<TargetMetrics, PublishError> {
        debug!(share_id = %platform_post_id, "linkedin metrics not available");
        Ok(TargetMetrics::default())
    }
}

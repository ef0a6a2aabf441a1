//! Instagram business publishing via the Graph API.
//!
//! Instagram publishes in two steps: create a media container, then publish
//! the container. Image-only; a post without media is rejected up front.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crosspost_model::{ContentRef, Platform, TargetMetrics};

use crate::{AccountCredentials, PlatformPublisher, PublishError, PublishOutcome, http};

const GRAPH_BASE_URL: &str = "https://graph.facebook.com/v22.0";

/// Publishes to an Instagram business account. The account id is the
/// connected IG business account id.
pub struct InstagramPublisher {
    http: Client,
    base_url: String,
}

impl InstagramPublisher {
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

impl Default for InstagramPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct MediaResponse {
    id: String,
}

#[async_trait]
impl PlatformPublisher for InstagramPublisher {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        content: &ContentRef,
    ) -> Result<PublishOutcome, PublishError> {
        let Some(image_url) = content.media_url.as_ref() else {
            return Err(PublishError::rejected(
                "instagram posts require an image attachment",
            ));
        };

        // Step 1: media container.
        let resp = self
            .http
            .post(format!(
                "{}/{}/media",
                self.base_url, credentials.account_id
            ))
            .json(&json!({
                "image_url": image_url,
                "caption": content.text,
                "access_token": credentials.access_token,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http::graph_error(resp).await);
        }
        let container: MediaResponse = resp.json().await?;
        debug!(creation_id = %container.id, "created instagram media container");

        // Step 2: publish the container.
        let resp = self
            .http
            .post(format!(
                "{}/{}/media_publish",
                self.base_url, credentials.account_id
            ))
            .json(&json!({
                "creation_id": container.id,
                "access_token": credentials.access_token,
            }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http::graph_error(resp).await);
        }
        let published: MediaResponse = resp.json().await?;

        Ok(PublishOutcome {
            platform_post_id: published.id,
            published_at: Utc::now(),
        })
    }

    async fn get_metrics(
        &self,
        credentials: &AccountCredentials,
        platform_post_id: &str,
    ) -> Result<TargetMetrics, PublishError> {
        #[derive(Deserialize)]
        struct MediaEngagement {
            like_count: Option<u64>,
            comments_count: Option<u64>,
        }

        let resp = self
            .http
            .get(format!("{}/{}", self.base_url, platform_post_id))
            .query(&[
                ("fields", "like_count,comments_count"),
                ("access_token", credentials.access_token.as_str()),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(http::graph_error(resp).await);
        }

        let engagement: MediaEngagement = resp.json().await?;
        Ok(TargetMetrics {
            likes: engagement.like_count.unwrap_or(0),
            comments: engagement.comments_count.unwrap_or(0),
            ..TargetMetrics::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_model::ErrorCode;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn content() -> ContentRef {
        ContentRef {
            content_id: "c-1".to_string(),
            text: "caption".to_string(),
            media_url: Some("https://example.com/pic.jpg".to_string()),
            link: None,
        }
    }

    fn credentials() -> AccountCredentials {
        AccountCredentials::new("ig-1", "token-1")
    }

    #[tokio::test]
    async fn publish_runs_container_then_publish() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media"))
            .and(body_partial_json(serde_json::json!({
                "image_url": "https://example.com/pic.jpg",
                "caption": "caption",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "container-5" })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media_publish"))
            .and(body_partial_json(serde_json::json!({
                "creation_id": "container-5",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "ig-post-7" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let publisher = InstagramPublisher::with_base_url(server.uri());
        let outcome = publisher.publish(&credentials(), &content()).await.unwrap();
        assert_eq!(outcome.platform_post_id, "ig-post-7");
    }

    #[tokio::test]
    async fn missing_image_is_rejected_without_a_call() {
        let publisher = InstagramPublisher::with_base_url("http://127.0.0.1:1");
        let text_only = ContentRef {
            media_url: None,
            ..content()
        };
        let err = publisher
            .publish(&credentials(), &text_only)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Rejected);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn container_failure_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ig-1/media"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Invalid image URL" },
            })))
            .mount(&server)
            .await;

        let publisher = InstagramPublisher::with_base_url(server.uri());
        let err = publisher
            .publish(&credentials(), &content())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Rejected);
        assert_eq!(err.message, "Invalid image URL");
    }
}

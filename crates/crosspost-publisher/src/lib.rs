//! Platform publisher adapters.
//!
//! This crate defines the [`PlatformPublisher`] seam the execution engine
//! publishes through, the normalized [`PublishError`] taxonomy, and
//! concrete adapters for the supported platforms:
//! - Facebook page posts via the Graph API feed endpoint
//! - Instagram business posts via the Graph media container flow
//! - LinkedIn shares via the UGC posts endpoint
//!
//! Credential acquisition and refresh (OAuth) are external; adapters only
//! consume the access token handed to them.

mod error;
mod facebook;
mod http;
mod instagram;
mod linkedin;
mod registry;
mod types;

pub use error::PublishError;
pub use facebook::FacebookPublisher;
pub use instagram::InstagramPublisher;
pub use linkedin::LinkedinPublisher;
pub use registry::PublisherRegistry;
pub use types::{AccountCredentials, PublishOutcome};

use async_trait::async_trait;
use crosspost_model::{ContentRef, Platform, TargetMetrics};

/// Adapter for a specific social platform's publish API.
///
/// Implementations must normalize platform failures into [`PublishError`]
/// so the engine and retry policy can classify them uniformly.
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    /// The platform this adapter publishes to.
    fn platform(&self) -> Platform;

    /// Publish `content` on behalf of the given account.
    async fn publish(
        &self,
        credentials: &AccountCredentials,
        content: &ContentRef,
    ) -> Result<PublishOutcome, PublishError>;

    /// Fetch engagement metrics for an already-published post. Best-effort;
    /// not required for scheduling correctness.
    async fn get_metrics(
        &self,
        credentials: &AccountCredentials,
        platform_post_id: &str,
    ) -> Result<TargetMetrics, PublishError>;
}

//! Shared HTTP plumbing for the adapters.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;

use crate::PublishError;

/// Build the HTTP client used by all adapters.
///
/// Both timeouts stay below the engine's publish timeout, so a hung
/// platform call surfaces as a normal transient error.
pub(crate) fn client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .expect("failed to build HTTP client")
}

#[derive(Deserialize)]
struct GraphErrorBody {
    error: Option<GraphErrorDetail>,
}

#[derive(Deserialize)]
struct GraphErrorDetail {
    message: Option<String>,
}

/// Drain an error response from a Graph-style API (`{"error": {"message"}}`)
/// into a normalized [`PublishError`].
pub(crate) async fn graph_error(resp: Response) -> PublishError {
    let status = resp.status();
    let message = match resp.json::<GraphErrorBody>().await {
        Ok(body) => body
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| format!("HTTP {status}")),
        Err(_) => format!("HTTP {status}"),
    };
    PublishError::from_status(status, message)
}

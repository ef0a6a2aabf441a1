//! Credential lookup for connected platform accounts.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crosspost_model::Platform;
use crosspost_publisher::{AccountCredentials, PublishError};

/// Seam to the external user/account store.
///
/// OAuth flows and token refresh live outside the engine; this only hands
/// back whatever credentials are currently on file. A missing or inactive
/// account surfaces as a `needs_reconnection` error so the failure reaches
/// the owner through the post's `last_error` rather than being retried
/// into the ground.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn credentials(
        &self,
        owner_id: &str,
        platform: Platform,
        account_ref: &str,
    ) -> Result<AccountCredentials, PublishError>;
}

struct ConnectedAccount {
    credentials: AccountCredentials,
    active: bool,
}

/// Credential table loaded once at startup (or populated by tests).
#[derive(Default)]
pub struct StaticAccounts {
    accounts: RwLock<HashMap<(String, Platform), ConnectedAccount>>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(
        &self,
        owner_id: impl Into<String>,
        platform: Platform,
        credentials: AccountCredentials,
    ) {
        self.accounts.write().await.insert(
            (owner_id.into(), platform),
            ConnectedAccount {
                credentials,
                active: true,
            },
        );
    }

    /// Flip an account's active flag without dropping its credentials.
    pub async fn set_active(&self, owner_id: &str, platform: Platform, active: bool) {
        if let Some(account) = self
            .accounts
            .write()
            .await
            .get_mut(&(owner_id.to_string(), platform))
        {
            account.active = active;
        }
    }
}

#[async_trait]
impl CredentialSource for StaticAccounts {
    async fn credentials(
        &self,
        owner_id: &str,
        platform: Platform,
        _account_ref: &str,
    ) -> Result<AccountCredentials, PublishError> {
        let accounts = self.accounts.read().await;
        let account = accounts
            .get(&(owner_id.to_string(), platform))
            .ok_or_else(|| {
                PublishError::needs_reconnection(format!("no connected {platform} account"))
            })?;
        if !account.active {
            return Err(PublishError::needs_reconnection(format!(
                "{platform} account is inactive"
            )));
        }
        Ok(account.credentials.clone())
    }
}

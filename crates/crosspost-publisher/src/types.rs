//! Publisher types.

use std::fmt;

use chrono::{DateTime, Utc};

/// Credentials for one connected platform account, supplied by the external
/// account store.
#[derive(Clone)]
pub struct AccountCredentials {
    /// Platform-side account identifier (page id, IG business account id,
    /// LinkedIn person URN, ...).
    pub account_id: String,
    pub access_token: String,
}

impl AccountCredentials {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: access_token.into(),
        }
    }
}

// Keep the token out of logs.
impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("account_id", &self.account_id)
            .field("access_token", &"***")
            .finish()
    }
}

/// Result of a successful publish call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub platform_post_id: String,
    pub published_at: DateTime<Utc>,
}

//! Runtime configuration for the front-desk client.

use serde::Deserialize;

/// Connection settings for the remote check-in authority.
///
/// These are safe-to-ship endpoint values plus the operator's bearer
/// token; the token never appears in Debug output.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AuthorityConfig {
    /// Base URL of the authority API (e.g. `https://api.example.com`).
    pub base_url: String,
    /// Identifies this scanning station in validate/commit payloads.
    pub scanner_id: String,
    /// Operator access token, when the deployment requires one.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl AuthorityConfig {
    pub fn new(base_url: impl Into<String>, scanner_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            scanner_id: scanner_id.into(),
            bearer_token: None,
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

impl std::fmt::Debug for AuthorityConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("AuthorityConfig")
            .field("base_url", &self.base_url)
            .field("scanner_id", &self.scanner_id)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

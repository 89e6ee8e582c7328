//! Remote validation/check-in authority client.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::config::AuthorityConfig;
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// The authority's read-only decision for a reservation code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckinDecision {
    pub reservation_id: String,
    pub reservation_code: String,
    /// Reservation status as reported by the authority (display only).
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
    /// Whether the check-in may proceed right now.
    pub allowed: bool,
    /// Whether a blocked check-in may be forced with an operator reason.
    #[serde(default)]
    pub can_override: bool,
    /// Why the check-in is blocked, when it is.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Invalid authority configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Authority HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Authority API error: {0}")]
    Api(String),
    #[error("Invalid authority payload: {0}")]
    InvalidPayload(String),
}

pub type AuthorityResult<T> = Result<T, AuthorityError>;

/// The remote validation/check-in service, seen from the client.
///
/// `validate` is a read-only decision; `commit` performs the transactional
/// check-in. Callers guarantee at most one commit call per resolved queue
/// item.
#[allow(async_fn_in_trait)]
pub trait CheckinAuthority {
    /// Ask whether `reservation_code` may check in now.
    ///
    /// `Ok(None)` means the code does not resolve to a reservation.
    /// `offline_mode` marks scans replayed from the offline queue so the
    /// authority can distinguish them in its audit trail.
    async fn validate(
        &self,
        reservation_code: &str,
        offline_mode: bool,
    ) -> AuthorityResult<Option<CheckinDecision>>;

    /// Perform the check-in, optionally with an operator override reason.
    async fn commit(
        &self,
        reservation_id: &str,
        override_reason: Option<&str>,
    ) -> AuthorityResult<()>;
}

/// HTTP client for the production check-in authority.
#[derive(Clone)]
pub struct HttpCheckinAuthority {
    base_url: String,
    scanner_id: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpCheckinAuthority {
    pub fn new(config: &AuthorityConfig) -> AuthorityResult<Self> {
        let base_url = normalize_base_url(config.base_url.clone())?;
        let scanner_id = normalize_text_option(Some(config.scanner_id.clone())).ok_or_else(
            || AuthorityError::InvalidConfiguration("scanner id must not be empty".to_string()),
        )?;

        Ok(Self {
            base_url,
            scanner_id,
            bearer_token: config.bearer_token.clone(),
            client: reqwest::Client::builder().build()?,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header("Accept", "application/json");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        request
    }
}

impl CheckinAuthority for HttpCheckinAuthority {
    async fn validate(
        &self,
        reservation_code: &str,
        offline_mode: bool,
    ) -> AuthorityResult<Option<CheckinDecision>> {
        let response = self
            .post("/v2/qr/verify")
            .json(&json!({
                "reservation_code": reservation_code,
                "scanner_id": self.scanner_id,
                "offline_mode": offline_mode,
            }))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        let decision = serde_json::from_str::<CheckinDecision>(&body)
            .map_err(|error| AuthorityError::InvalidPayload(error.to_string()))?;
        Ok(Some(decision))
    }

    async fn commit(
        &self,
        reservation_id: &str,
        override_reason: Option<&str>,
    ) -> AuthorityResult<()> {
        let response = self
            .post("/v2/operations/checkins")
            .json(&json!({
                "reservation_id": reservation_id,
                "scanner_id": self.scanner_id,
                "override_reason": override_reason,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorityError::Api(parse_api_error(status, &body)));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct AuthorityErrorBody {
    detail: Option<String>,
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<AuthorityErrorBody>(body) {
        if let Some(message) = payload.detail.or(payload.message).or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

fn normalize_base_url(raw: String) -> AuthorityResult<String> {
    let base_url = normalize_text_option(Some(raw)).ok_or_else(|| {
        AuthorityError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(AuthorityError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

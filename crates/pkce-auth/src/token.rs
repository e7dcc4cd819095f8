//! OAuth token exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (login completion)
//! 2. Token refresh (lifecycle manager, when the access token is expiring)
//!
//! Both operations POST `application/x-www-form-urlencoded` bodies to the
//! configured token endpoint with different grant types.

use serde::{Deserialize, Serialize};

use crate::config::OAuthConfig;
use crate::credentials::Credential;
use crate::error::{Error, Result};
use crate::pkce::CodeVerifier;

/// Successful response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. Refresh
/// responses may omit `refresh_token`, in which case the stored one stays.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Error body returned by the token endpoint on rejection.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Tokens issued by one exchange or refresh.
///
/// `expires_at_ms` is always computed locally at issuance, never taken from
/// the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at_ms: u64,
    pub scope: String,
}

impl TokenSet {
    /// Build from a token response issued at `issued_at_ms`.
    ///
    /// `previous_refresh` is kept when the response carries no refresh token.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<&str>,
        issued_at_ms: u64,
    ) -> Self {
        let refresh_token = response
            .refresh_token
            .filter(|t| !t.is_empty())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default();
        Self {
            access_token: response.access_token,
            refresh_token,
            expires_at_ms: issued_at_ms.saturating_add(response.expires_in.saturating_mul(1000)),
            scope: response.scope,
        }
    }

    pub fn credential(&self) -> Credential {
        Credential {
            access: self.access_token.clone(),
            refresh: self.refresh_token.clone(),
            expires: self.expires_at_ms,
        }
    }
}

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Exchange an authorization code for tokens.
///
/// The verifier proves this client is the one that started the flow.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &CodeVerifier,
) -> Result<TokenResponse> {
    let response = client
        .post(&config.token_endpoint)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("code_verifier", verifier.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::ExchangeFailed(describe_rejection(status, &body)));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::ExchangeFailed(format!("invalid token response: {e}")))
}

/// Obtain a new access token with a refresh token.
///
/// Any non-success status means the refresh token is no longer usable.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&config.token_endpoint)
        .form(&[
            ("client_id", config.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::RefreshFailed(describe_rejection(status, &body)));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::RefreshFailed(format!("invalid refresh response: {e}")))
}

/// Prefer the endpoint's `error_description`, then its `error` code, then the raw body.
fn describe_rejection(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error_description: Some(description),
            ..
        }) if !description.is_empty() => description,
        Ok(ErrorResponse { error, .. }) => format!("{error} ({status})"),
        Err(_) => format!("token endpoint returned {status}: {body}"),
    }
}

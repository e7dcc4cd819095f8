//! OAuth client settings shared by every flow step

use std::time::Duration;

use crate::constants::{AUTHORIZE_ENDPOINT, REFRESH_SKEW_MS, SCOPES, TOKEN_ENDPOINT};
use crate::error::{Error, Result};

/// Public-client OAuth settings.
///
/// There is no client secret: PKCE binds the authorization code to the
/// verifier instead.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub authorize_endpoint: String,
    pub token_endpoint: String,
    pub scopes: Vec<String>,
    /// Safety margin subtracted from the token expiry before it is used.
    pub refresh_skew: Duration,
    /// Ask the authorization server to show the consent dialog even when the
    /// user already approved this client.
    pub show_dialog: bool,
}

impl OAuthConfig {
    /// Settings for the default accounts service with the default scope list.
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            authorize_endpoint: AUTHORIZE_ENDPOINT.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
            refresh_skew: Duration::from_millis(REFRESH_SKEW_MS),
            show_dialog: false,
        }
    }

    /// Point code exchange and refresh at a different token endpoint.
    pub fn with_token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.token_endpoint = endpoint.into();
        self
    }

    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Space-separated scope parameter.
    pub fn scope_param(&self) -> String {
        self.scopes.join(" ")
    }

    /// Reject settings that can never produce a working flow.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id must not be empty".into()));
        }
        if self.scopes.is_empty() {
            return Err(Error::InvalidConfig("at least one scope is required".into()));
        }
        for (name, url) in [
            ("redirect_uri", &self.redirect_uri),
            ("authorize_endpoint", &self.authorize_endpoint),
            ("token_endpoint", &self.token_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::InvalidConfig(format!(
                    "{name} must start with http:// or https://, got: {url}"
                )));
            }
        }
        Ok(())
    }
}

//! Explicit session object
//!
//! Bundles the OAuth settings, the credential store, the HTTP client and the
//! token manager. Whatever needs credential state receives a `Session` (or an
//! `Arc` of one); there is no process-global token state.

use std::sync::Arc;

use reqwest::Url;
use tracing::{info, warn};

use crate::config::OAuthConfig;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::invalidate::end_session;
use crate::lifecycle::TokenManager;
use crate::login::{self, CallbackParams};
use crate::secret::Secret;
use crate::token::TokenSet;

pub struct Session {
    config: Arc<OAuthConfig>,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    tokens: TokenManager,
}

impl Session {
    pub fn new(config: OAuthConfig, store: CredentialStore, client: reqwest::Client) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let store = Arc::new(store);
        let tokens = TokenManager::new(store.clone(), client.clone(), config.clone());
        Ok(Self {
            config,
            store,
            client,
            tokens,
        })
    }

    /// Start a login attempt; the caller navigates the user agent to the URL.
    pub fn begin_login(&self) -> Result<Url> {
        login::begin_login(&self.store, &self.config)
    }

    /// Finish a login from the redirect URI's query parameters.
    ///
    /// Error parameters short-circuit before the exchanger runs.
    pub async fn handle_callback(&self, params: CallbackParams) -> Result<TokenSet> {
        let code = match params.into_code() {
            Ok(code) => code,
            Err(e) => {
                record_login(&e);
                warn!(error = %e, "authorization callback reported failure");
                return Err(e);
            }
        };
        self.complete_login(&code).await
    }

    /// Exchange an authorization code for tokens.
    pub async fn complete_login(&self, code: &str) -> Result<TokenSet> {
        let result = login::complete_login(&self.store, &self.client, &self.config, code).await;
        match &result {
            Ok(tokens) => {
                self.tokens.reset_refresh_backoff();
                metrics::counter!("auth_login_total", "outcome" => "success").increment(1);
                info!(expires_at_ms = tokens.expires_at_ms, "login completed");
            }
            Err(e) => {
                record_login(e);
                warn!(error = %e, "login failed");
            }
        }
        result
    }

    /// A usable access token, or `None` when the user must log in again.
    pub async fn valid_access_token(&self) -> Option<Secret<String>> {
        self.tokens.valid_access_token().await
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated()
    }

    /// Explicit logout. Safe to call when already logged out.
    pub fn logout(&self) {
        end_session(&self.store);
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }
}

fn record_login(error: &Error) {
    let outcome = match error {
        Error::UserDenied => "denied",
        _ => "failed",
    };
    metrics::counter!("auth_login_total", "outcome" => outcome).increment(1);
}

//! Login flow: authorization redirect and callback exchange
//!
//! `begin_login` and `complete_login` usually run in different processes
//! (the user agent leaves and comes back through the redirect URI), so the
//! verifier only ever travels between them through the credential store.

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::credentials::{CredentialStore, Slot};
use crate::error::{Error, Result};
use crate::pkce::{self, CodeVerifier, DEFAULT_VERIFIER_LENGTH};
use crate::token::{self, TokenSet, now_millis};

/// Start a login attempt and return the URL to send the user agent to.
///
/// The fresh verifier replaces any pending one (only one attempt may be in
/// flight) and is persisted before the URL is built, so the callback can
/// find it even if it runs in a new process. No network call is made.
pub fn begin_login(store: &CredentialStore, config: &OAuthConfig) -> Result<Url> {
    let verifier = pkce::generate_verifier(DEFAULT_VERIFIER_LENGTH)?;
    store.set(Slot::PendingVerifier, verifier.as_str())?;
    let challenge = pkce::compute_challenge(&verifier);
    let url = pkce::build_authorization_url(config, &challenge)?;
    info!(scopes = config.scopes.len(), "login started, verifier stored");
    Ok(url)
}

/// Query parameters the authorization server appends to the redirect URI.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// The authorization code, or the failure the callback reports.
    ///
    /// An `error` parameter wins over a `code`; `access_denied` maps to
    /// `UserDenied`, anything else to `AuthorizationRejected`.
    pub fn into_code(self) -> Result<String> {
        if let Some(error) = self.error {
            if error == "access_denied" {
                return Err(Error::UserDenied);
            }
            let reason = match self.error_description {
                Some(description) if !description.is_empty() => format!("{error}: {description}"),
                _ => error,
            };
            return Err(Error::AuthorizationRejected(reason));
        }
        self.code
            .filter(|code| !code.is_empty())
            .ok_or(Error::MissingCode)
    }
}

/// Exchange an authorization code for tokens and store them.
///
/// Fails with `MissingVerifier` before any network call when no login is
/// pending. Once the exchange has been attempted the pending verifier is
/// deleted whatever the outcome, so it can never be replayed.
pub async fn complete_login(
    store: &CredentialStore,
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
) -> Result<TokenSet> {
    let verifier = store
        .get(Slot::PendingVerifier)
        .map(CodeVerifier::from)
        .ok_or(Error::MissingVerifier)?;

    let exchanged = token::exchange_code(client, config, code, &verifier).await;

    if let Err(e) = store.delete(Slot::PendingVerifier) {
        warn!(error = %e, "failed to delete pending verifier");
    }

    let response = exchanged?;
    let tokens = TokenSet::from_response(response, None, now_millis());
    store.save_credential(&tokens.credential())?;
    debug!(expires_at_ms = tokens.expires_at_ms, "stored exchanged tokens");
    Ok(tokens)
}

//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow. The verifier is persisted in the credential store and
//! sent during token exchange; the challenge is included in the authorization
//! URL so the authorization server can verify the exchange request came from
//! the same party that initiated the flow.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Unreserved characters a generated verifier is drawn from.
const VERIFIER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Verifier length used by `begin_login`.
pub const DEFAULT_VERIFIER_LENGTH: usize = 64;

/// Length bounds from RFC 7636 section 4.1.
pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;

/// High-entropy secret bound to one login attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeVerifier(String);

impl CodeVerifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CodeVerifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for CodeVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeVerifier([REDACTED; {}])", self.0.len())
    }
}

/// `BASE64URL(SHA256(verifier))` without padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeChallenge(String);

impl CodeChallenge {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CodeChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a cryptographically random PKCE code verifier of `length` characters.
///
/// Each random byte is mapped modulo the alphabet size onto `A-Z a-z 0-9`.
/// The bytes come from the thread-local CSPRNG, which is seeded from the OS
/// and panics if the OS source is unavailable.
pub fn generate_verifier(length: usize) -> Result<CodeVerifier> {
    if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        return Err(Error::InvalidVerifierLength(length));
    }
    let mut bytes = vec![0u8; length];
    rand::rng().fill(bytes.as_mut_slice());
    let verifier = bytes
        .iter()
        .map(|b| VERIFIER_ALPHABET[*b as usize % VERIFIER_ALPHABET.len()] as char)
        .collect();
    Ok(CodeVerifier(verifier))
}

/// Compute the S256 code challenge from a verifier.
pub fn compute_challenge(verifier: &CodeVerifier) -> CodeChallenge {
    let hash = Sha256::digest(verifier.as_str().as_bytes());
    CodeChallenge(URL_SAFE_NO_PAD.encode(hash))
}

/// Build the full authorization URL with all required OAuth parameters.
pub fn build_authorization_url(config: &OAuthConfig, challenge: &CodeChallenge) -> Result<Url> {
    let scope = config.scope_param();
    let mut params = vec![
        ("client_id", config.client_id.as_str()),
        ("response_type", "code"),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("scope", scope.as_str()),
        ("code_challenge_method", "S256"),
        ("code_challenge", challenge.as_str()),
    ];
    if config.show_dialog {
        params.push(("show_dialog", "true"));
    }
    Url::parse_with_params(&config.authorize_endpoint, &params).map_err(|e| {
        Error::InvalidConfig(format!(
            "authorize_endpoint {} is not a valid URL: {e}",
            config.authorize_endpoint
        ))
    })
}

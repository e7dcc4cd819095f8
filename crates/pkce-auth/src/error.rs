//! Error types for the PKCE login flow and token lifecycle

/// Errors from login, token, storage and resource operations.
///
/// Every kind is terminal for the operation that produced it; nothing here is
/// retried automatically. `RefreshFailed` additionally means the session has
/// already been invalidated by the time the caller sees it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("user denied authorization")]
    UserDenied,

    #[error("authorization server returned error: {0}")]
    AuthorizationRejected(String),

    #[error("callback carried neither a code nor an error")]
    MissingCode,

    #[error("no pending code verifier (login was not started or storage was cleared)")]
    MissingVerifier,

    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("code verifier length must be 43..=128, got {0}")]
    InvalidVerifierLength(usize),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("resource request failed: {0}")]
    Resource(String),

    #[error("credential storage error: {0}")]
    Storage(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("invalid OAuth configuration: {0}")]
    InvalidConfig(String),
}

/// Message shown when the user declined consent at the authorization server.
pub const DENIED_MESSAGE: &str = "You denied access to your account.";

/// Message shown for every other failure.
pub const RELOGIN_MESSAGE: &str = "Your session could not be established. Please log in again.";

impl Error {
    /// User-facing text for this error.
    ///
    /// A denied consent gets its own message; all other kinds collapse into a
    /// generic "log in again" prompt.
    pub fn user_message(&self) -> &'static str {
        match self {
            Error::UserDenied => DENIED_MESSAGE,
            _ => RELOGIN_MESSAGE,
        }
    }

    /// Stable machine-readable name of the kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UserDenied => "user_denied",
            Error::AuthorizationRejected(_) => "authorization_rejected",
            Error::MissingCode => "missing_code",
            Error::MissingVerifier => "missing_verifier",
            Error::ExchangeFailed(_) => "exchange_failed",
            Error::RefreshFailed(_) => "refresh_failed",
            Error::NotAuthenticated => "not_authenticated",
            Error::InvalidVerifierLength(_) => "invalid_verifier_length",
            Error::Http(_) => "http",
            Error::Resource(_) => "resource",
            Error::Storage(_) => "storage",
            Error::CredentialParse(_) => "credential_parse",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether the caller has to restart the login flow to recover.
    pub fn requires_login(&self) -> bool {
        !matches!(
            self,
            Error::Http(_) | Error::Resource(_) | Error::InvalidConfig(_)
        )
    }
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;

//! OAuth 2.0 Authorization Code + PKCE client with token lifecycle management
//!
//! Provides verifier/challenge generation, the login redirect and callback
//! exchange, a file-backed credential store, and a token manager that
//! refreshes expiring access tokens with at most one refresh in flight. This
//! crate has no dependency on the gateway binary and can be used on its own.
//!
//! Credential flow:
//! 1. `Session::begin_login()` stores a fresh verifier and returns the authorization URL
//! 2. The user consents at the authorization server, which redirects back with `?code=`
//! 3. `Session::handle_callback()` exchanges the code + verifier for a `TokenSet`
//! 4. Tokens are stored via `CredentialStore::save_credential()`; the verifier is deleted
//! 5. Every API call asks `Session::valid_access_token()`, which refreshes inside the skew window
//! 6. Logout or a rejected refresh runs `end_session()`, clearing every slot

pub mod config;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod invalidate;
pub mod lifecycle;
pub mod login;
pub mod pkce;
pub mod resource;
pub mod secret;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_support;

pub use config::OAuthConfig;
pub use credentials::{Credential, CredentialStore, Slot};
pub use error::{Error, Result};
pub use invalidate::end_session;
pub use lifecycle::TokenManager;
pub use login::{CallbackParams, begin_login, complete_login};
pub use pkce::{CodeChallenge, CodeVerifier, build_authorization_url, compute_challenge, generate_verifier};
pub use resource::{
    AlbumRef, Artist, ArtistRef, Page, PlayHistory, ResourceClient, TimeRange, Track, UserProfile,
};
pub use secret::Secret;
pub use session::Session;
pub use token::{TokenResponse, TokenSet, exchange_code, refresh_token};

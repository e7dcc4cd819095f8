//! Session invalidation
//!
//! Used by explicit logout and by the lifecycle manager when the token
//! endpoint rejects a refresh token.

use tracing::{debug, info, warn};

use crate::credentials::CredentialStore;

/// Delete access token, refresh token, expiry and any pending verifier.
///
/// Idempotent and infallible: calling it when already logged out does
/// nothing, and a failure to persist the cleared state is logged rather than
/// returned (the in-memory slots are cleared either way).
pub fn end_session(store: &CredentialStore) {
    if store.is_empty() {
        debug!("no stored credentials, session already ended");
        return;
    }
    match store.clear() {
        Ok(()) => info!("session ended, credentials cleared"),
        Err(e) => warn!(error = %e, "session ended but clearing the credential file failed"),
    }
}

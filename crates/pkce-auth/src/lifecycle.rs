//! Access token lifecycle: validity check, refresh, single-flight join
//!
//! Every authenticated call asks `TokenManager::valid_access_token` first.
//! A token inside the skew window is refreshed before it is handed out. At
//! most one refresh request is in flight: the first caller to see an
//! expiring token spawns the refresh as its own task, later callers clone
//! and await a shared handle to it. On servers that rotate refresh tokens a
//! second concurrent refresh would burn the token the first one just received.
//!
//! The spawned task runs to completion and stores its result even when every
//! waiting caller is dropped, so a response the server already committed to
//! is never lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::config::OAuthConfig;
use crate::credentials::{Credential, CredentialStore};
use crate::error::Error;
use crate::invalidate::end_session;
use crate::secret::Secret;
use crate::token::{self, TokenSet, now_millis};

type RefreshFuture = Shared<BoxFuture<'static, Option<String>>>;

#[derive(Default)]
struct RefreshSlot {
    generation: u64,
    current: Option<RefreshFuture>,
}

/// Hands out access tokens and keeps them fresh.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    config: Arc<OAuthConfig>,
    /// Unix millis of the last successful refresh, 0 if none.
    last_refresh_ms: Arc<AtomicU64>,
    in_flight: Arc<Mutex<RefreshSlot>>,
}

impl TokenManager {
    pub fn new(
        store: Arc<CredentialStore>,
        client: reqwest::Client,
        config: Arc<OAuthConfig>,
    ) -> Self {
        Self {
            store,
            client,
            config,
            last_refresh_ms: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(Mutex::new(RefreshSlot::default())),
        }
    }

    /// Return a usable access token, refreshing it first if it is expiring.
    ///
    /// `None` means re-authentication is required: there is no session, the
    /// refresh token was rejected (the session has been ended), or the token
    /// endpoint could not be reached.
    pub async fn valid_access_token(&self) -> Option<Secret<String>> {
        let credential = self.store.load_credential()?;
        let now = now_millis();
        if !needs_refresh(
            &credential,
            now,
            skew_ms(&self.config),
            self.last_refresh_ms.load(Ordering::SeqCst),
        ) {
            return Some(Secret::new(credential.access));
        }
        debug!(
            expires_in_ms = credential.expires.saturating_sub(now),
            "access token inside skew window"
        );
        self.join_refresh().await.map(Secret::new)
    }

    /// Derived session state: an unexpired access token or a refresh token.
    pub fn is_authenticated(&self) -> bool {
        match self.store.load_credential() {
            Some(credential) => credential.expires > now_millis() || !credential.refresh.is_empty(),
            None => false,
        }
    }

    /// Forget the refresh back-off of a previous session.
    ///
    /// Called when a login stores a brand new credential.
    pub fn reset_refresh_backoff(&self) {
        self.last_refresh_ms.store(0, Ordering::SeqCst);
    }

    /// Await the in-flight refresh, starting one if there is none.
    async fn join_refresh(&self) -> Option<String> {
        let refresh = {
            let mut slot = lock_slot(&self.in_flight);
            match &slot.current {
                Some(existing) => {
                    debug!("joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    slot.generation += 1;
                    let future = spawn_refresh(
                        slot.generation,
                        self.in_flight.clone(),
                        self.store.clone(),
                        self.client.clone(),
                        self.config.clone(),
                        self.last_refresh_ms.clone(),
                    );
                    slot.current = Some(future.clone());
                    future
                }
            }
        };
        refresh.await
    }
}

fn lock_slot(slot: &Mutex<RefreshSlot>) -> MutexGuard<'_, RefreshSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run `refresh_task` on its own task and return a shared handle to it.
///
/// The task empties the slot when it finishes, so the next expiring token
/// starts a new refresh. The caller holds the slot lock while spawning, so
/// the task cannot clear the slot before the handle is stored in it.
fn spawn_refresh(
    generation: u64,
    slot: Arc<Mutex<RefreshSlot>>,
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    config: Arc<OAuthConfig>,
    last_refresh_ms: Arc<AtomicU64>,
) -> RefreshFuture {
    let handle = tokio::spawn(async move {
        let outcome = refresh_task(store, client, config, last_refresh_ms).await;
        let mut guard = lock_slot(&slot);
        if guard.generation == generation {
            guard.current = None;
        }
        outcome
    });

    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "token refresh task did not complete");
                None
            }
        }
    }
    .boxed()
    .shared()
}

fn skew_ms(config: &OAuthConfig) -> u64 {
    config.refresh_skew.as_millis() as u64
}

/// Whether `credential` must be refreshed before use at `now`.
///
/// Inside the skew window (`now >= expires - skew`) a refresh is due, except
/// right after a refresh: within one skew window of the last refresh a token
/// that is still nominally valid is used as is. This keeps a server issuing
/// lifetimes shorter than the skew from triggering a refresh on every call.
/// A token past its hard expiry is always refreshed.
fn needs_refresh(credential: &Credential, now: u64, skew: u64, last_refresh: u64) -> bool {
    if now.saturating_add(skew) < credential.expires {
        return false;
    }
    let recently_refreshed = last_refresh != 0 && now.saturating_sub(last_refresh) < skew;
    !(recently_refreshed && now < credential.expires)
}

/// One refresh attempt against the token endpoint.
///
/// Re-reads the store first: a caller that saw the old token may arrive just
/// after another refresh completed, and must not spend the refresh token again.
async fn refresh_task(
    store: Arc<CredentialStore>,
    client: reqwest::Client,
    config: Arc<OAuthConfig>,
    last_refresh_ms: Arc<AtomicU64>,
) -> Option<String> {
    let credential = store.load_credential()?;
    if !needs_refresh(
        &credential,
        now_millis(),
        skew_ms(&config),
        last_refresh_ms.load(Ordering::SeqCst),
    ) {
        return Some(credential.access);
    }

    if credential.refresh.is_empty() {
        warn!("access token expiring and no refresh token stored, ending session");
        metrics::counter!("auth_token_refresh_total", "outcome" => "rejected").increment(1);
        end_session(&store);
        return None;
    }

    match token::refresh_token(&client, &config, &credential.refresh).await {
        Ok(response) => {
            let tokens = TokenSet::from_response(response, Some(&credential.refresh), now_millis());

            // Logout during the request wins; don't resurrect the session.
            match store.save_credential_if_refresh(&credential.refresh, &tokens.credential()) {
                Ok(true) => {}
                Ok(false) => {
                    info!("session changed during refresh, discarding refreshed token");
                    return None;
                }
                Err(e) => warn!(error = %e, "failed to persist refreshed token"),
            }
            last_refresh_ms.store(now_millis(), Ordering::SeqCst);
            metrics::counter!("auth_token_refresh_total", "outcome" => "success").increment(1);
            info!(
                expires_at_ms = tokens.expires_at_ms,
                rotated = tokens.refresh_token != credential.refresh,
                "access token refreshed"
            );
            Some(tokens.access_token)
        }
        Err(Error::RefreshFailed(msg)) => {
            warn!(error = %msg, "refresh token rejected, ending session");
            metrics::counter!("auth_token_refresh_total", "outcome" => "rejected").increment(1);
            end_session(&store);
            None
        }
        Err(e) => {
            warn!(error = %e, "token refresh failed, session kept");
            metrics::counter!("auth_token_refresh_total", "outcome" => "error").increment(1);
            None
        }
    }
}

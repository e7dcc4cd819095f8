//! In-process stub of the token endpoint for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::routing::post;
use tokio::net::TcpListener;

use crate::config::OAuthConfig;

#[derive(Clone)]
struct StubState {
    status: StatusCode,
    body: serde_json::Value,
    delay: Duration,
    hits: Arc<AtomicUsize>,
    forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

/// Handle to a running stub token endpoint.
pub(crate) struct StubTokenServer {
    pub url: String,
    hits: Arc<AtomicUsize>,
    forms: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl StubTokenServer {
    /// Answer every POST with `status` and `body`.
    pub async fn start(status: StatusCode, body: serde_json::Value) -> Self {
        Self::start_with_delay(status, body, Duration::ZERO).await
    }

    /// Same as `start`, but hold each response for `delay` so concurrent
    /// callers overlap with the in-flight request.
    pub async fn start_with_delay(
        status: StatusCode,
        body: serde_json::Value,
        delay: Duration,
    ) -> Self {
        let hits = Arc::new(AtomicUsize::new(0));
        let forms = Arc::new(Mutex::new(Vec::new()));
        let state = StubState {
            status,
            body,
            delay,
            hits: hits.clone(),
            forms: forms.clone(),
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/token", listener.local_addr().unwrap());
        let app = Router::new()
            .route("/api/token", post(token_handler))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, hits, forms }
    }

    /// Number of requests received so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Form bodies received so far, in arrival order.
    pub fn forms(&self) -> Vec<HashMap<String, String>> {
        self.forms.lock().unwrap().clone()
    }

    pub fn config(&self) -> OAuthConfig {
        OAuthConfig::new("client-1", "http://127.0.0.1:8080/callback")
            .with_token_endpoint(self.url.clone())
    }
}

async fn token_handler(
    State(state): State<StubState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, axum::Json<serde_json::Value>) {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.forms.lock().unwrap().push(form);
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, axum::Json(state.body))
}

/// A successful token response body.
pub(crate) fn token_body(access: &str, refresh: Option<&str>, expires_in: u64) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "scope": "user-read-private user-top-read",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::Value::String(refresh.to_string());
    }
    body
}

/// A token endpoint rejection body.
pub(crate) fn error_body(error: &str, description: &str) -> serde_json::Value {
    serde_json::json!({"error": error, "error_description": description})
}

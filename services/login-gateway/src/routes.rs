//! HTTP routes for the login flow and the proxied resource calls
//!
//! Endpoints:
//! - GET  /login          : persist a fresh verifier, 302 to the authorization server
//! - GET  /callback       : exchange `?code=` (or report `?error=`) and store tokens
//! - POST /logout         : end the session
//! - GET  /session        : whether a usable credential exists
//! - GET  /me             : profile of the logged-in user
//! - GET  /me/top-artists : top artists, `?time_range=&limit=`
//! - GET  /me/top-tracks  : top tracks, `?time_range=&limit=`
//! - GET  /me/recently-played : listening history, `?limit=`
//! - GET  /search/artists : artist search, `?q=`
//! - GET  /health, /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, LOCATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pkce_auth::{CallbackParams, Error, ResourceClient, Session, TimeRange};
use serde::Deserialize;
use tracing::{error, info, warn};

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub resources: ResourceClient,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` caps concurrently handled requests.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/login", get(login_handler))
        .route("/callback", get(callback_handler))
        .route("/logout", post(logout_handler))
        .route("/session", get(session_handler))
        .route("/me", get(me_handler))
        .route("/me/top-artists", get(top_artists_handler))
        .route("/me/top-tracks", get(top_tracks_handler))
        .route("/me/recently-played", get(recently_played_handler))
        .route("/search/artists", get(search_artists_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Map an auth error to a JSON error response.
///
/// The `message` field is the user-facing text; `detail` carries the
/// diagnostic description.
fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::UserDenied => StatusCode::FORBIDDEN,
        Error::AuthorizationRejected(_)
        | Error::MissingCode
        | Error::MissingVerifier
        | Error::ExchangeFailed(_) => StatusCode::BAD_REQUEST,
        Error::RefreshFailed(_) | Error::NotAuthenticated => StatusCode::UNAUTHORIZED,
        Error::Http(_) | Error::Resource(_) => StatusCode::BAD_GATEWAY,
        Error::InvalidVerifierLength(_)
        | Error::Storage(_)
        | Error::CredentialParse(_)
        | Error::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(error = %err, kind = err.kind(), "request failed");
    }

    json_response(
        status,
        serde_json::json!({
            "error": {
                "type": err.kind(),
                "message": err.user_message(),
                "detail": err.to_string(),
                "login_required": err.requires_login(),
            }
        }),
    )
}

/// GET /login: start a login attempt and redirect the user agent.
async fn login_handler(State(state): State<AppState>) -> Response {
    match state.session.begin_login() {
        Ok(url) => {
            info!("redirecting to authorization server");
            (StatusCode::FOUND, [(LOCATION, url.to_string())]).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /callback: the authorization server's redirect target.
async fn callback_handler(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    match state.session.handle_callback(params).await {
        Ok(tokens) => json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "authenticated",
                "scope": tokens.scope,
                "expires_at_ms": tokens.expires_at_ms,
            }),
        ),
        Err(e) => error_response(&e),
    }
}

/// POST /logout: idempotent.
async fn logout_handler(State(state): State<AppState>) -> Response {
    state.session.logout();
    json_response(
        StatusCode::OK,
        serde_json::json!({ "status": "logged_out" }),
    )
}

async fn session_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({ "authenticated": state.session.is_authenticated() }),
    )
}

async fn me_handler(State(state): State<AppState>) -> Response {
    match state.resources.current_user().await {
        Ok(profile) => (StatusCode::OK, axum::Json(profile)).into_response(),
        Err(e) => {
            warn!(error = %e, "profile request failed");
            error_response(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TopItemsQuery {
    #[serde(default)]
    time_range: TimeRange,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    20
}

async fn top_artists_handler(
    State(state): State<AppState>,
    Query(query): Query<TopItemsQuery>,
) -> Response {
    match state
        .resources
        .top_artists(query.time_range, query.limit)
        .await
    {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(e) => {
            warn!(error = %e, "top artists request failed");
            error_response(&e)
        }
    }
}

async fn top_tracks_handler(
    State(state): State<AppState>,
    Query(query): Query<TopItemsQuery>,
) -> Response {
    match state
        .resources
        .top_tracks(query.time_range, query.limit)
        .await
    {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(e) => {
            warn!(error = %e, "top tracks request failed");
            error_response(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RecentlyPlayedQuery {
    #[serde(default = "default_history_limit")]
    limit: u32,
}

fn default_history_limit() -> u32 {
    50
}

async fn recently_played_handler(
    State(state): State<AppState>,
    Query(query): Query<RecentlyPlayedQuery>,
) -> Response {
    match state.resources.recently_played(query.limit).await {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(e) => {
            warn!(error = %e, "recently played request failed");
            error_response(&e)
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

/// GET /search/artists: a blank `q` is a client error, not an upstream one.
async fn search_artists_handler(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Response {
    if query.q.trim().is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": {
                    "type": "invalid_query",
                    "message": "Search query must not be empty.",
                    "detail": "missing or blank q parameter",
                    "login_required": false,
                }
            }),
        );
    }
    match state.resources.search_artists(&query.q).await {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(e) => {
            warn!(error = %e, "artist search failed");
            error_response(&e)
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Response {
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use pkce_auth::error::{DENIED_MESSAGE, RELOGIN_MESSAGE};
    use pkce_auth::{CredentialStore, OAuthConfig};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    /// Stand-in for both the token endpoint and the resource API.
    struct Upstream {
        url: String,
        token_hits: Arc<AtomicUsize>,
    }

    async fn start_upstream(token_status: StatusCode, token_body: serde_json::Value) -> Upstream {
        let token_hits = Arc::new(AtomicUsize::new(0));
        let hits = token_hits.clone();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let app = axum::Router::new()
            .route(
                "/api/token",
                post(move || {
                    let hits = hits.clone();
                    let body = token_body.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        (token_status, axum::Json(body))
                    }
                }),
            )
            .route(
                "/v1/me",
                get(|headers: HeaderMap| async move {
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("");
                    if bearer != "Bearer at_1" {
                        return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({})));
                    }
                    (
                        StatusCode::OK,
                        axum::Json(serde_json::json!({"id": "user-1", "display_name": "Listener"})),
                    )
                }),
            )
            .route(
                "/v1/me/top/artists",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    axum::Json(serde_json::json!({
                        "items": [{"id": "a1", "name": q["time_range"].clone()}],
                        "total": 1,
                        "limit": q["limit"].parse::<u32>().unwrap(),
                        "offset": 0
                    }))
                }),
            )
            .route(
                "/v1/me/top/tracks",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    axum::Json(serde_json::json!({
                        "items": [{
                            "id": "t1",
                            "name": q["time_range"].clone(),
                            "artists": [{"id": "a1", "name": "Artist One"}]
                        }],
                        "total": 1,
                        "limit": q["limit"].parse::<u32>().unwrap(),
                        "offset": 0
                    }))
                }),
            )
            .route(
                "/v1/me/player/recently-played",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    axum::Json(serde_json::json!({
                        "items": [{
                            "track": {"id": "t2", "name": "Track Two"},
                            "played_at": "2024-05-01T12:00:00.000Z"
                        }],
                        "limit": q["limit"].parse::<u32>().unwrap()
                    }))
                }),
            )
            .route(
                "/v1/search",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    axum::Json(serde_json::json!({
                        "artists": {
                            "items": [{"id": "a9", "name": q["q"].clone()}],
                            "total": 1,
                            "limit": q["limit"].parse::<u32>().unwrap(),
                            "offset": 0
                        }
                    }))
                }),
            );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Upstream { url, token_hits }
    }

    fn test_state(upstream: &Upstream) -> AppState {
        let config = OAuthConfig::new("client-1", "http://127.0.0.1:8080/callback")
            .with_token_endpoint(format!("{}/api/token", upstream.url));
        let session = Arc::new(
            Session::new(config, CredentialStore::in_memory(), reqwest::Client::new()).unwrap(),
        );
        let resources = ResourceClient::new(
            session.clone(),
            format!("{}/v1", upstream.url),
            Duration::from_secs(5),
        );
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        AppState {
            session,
            resources,
            prometheus: recorder.handle(),
            started_at: Instant::now(),
        }
    }

    fn token_ok() -> serde_json::Value {
        serde_json::json!({
            "access_token": "at_1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt_1",
            "scope": "user-read-private user-top-read"
        })
    }

    async fn send(state: &AppState, method: &str, uri: &str) -> Response {
        build_router(state.clone(), 100)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn login_redirects_with_challenge() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/login").await;
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[LOCATION].to_str().unwrap();
        assert!(location.starts_with("https://accounts.spotify.com/authorize?"));
        assert!(location.contains("code_challenge_method=S256"));
        assert!(location.contains("client_id=client-1"));
        assert_eq!(upstream.token_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn full_login_session_and_logout() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let json = body_json(send(&state, "GET", "/session").await).await;
        assert_eq!(json["authenticated"], false);

        send(&state, "GET", "/login").await;
        let response = send(&state, "GET", "/callback?code=abc").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "authenticated");
        assert_eq!(json["scope"], "user-read-private user-top-read");
        assert!(json["expires_at_ms"].as_u64().unwrap() > 0);

        let json = body_json(send(&state, "GET", "/session").await).await;
        assert_eq!(json["authenticated"], true);

        let json = body_json(send(&state, "POST", "/logout").await).await;
        assert_eq!(json["status"], "logged_out");
        let json = body_json(send(&state, "POST", "/logout").await).await;
        assert_eq!(json["status"], "logged_out");

        let json = body_json(send(&state, "GET", "/session").await).await;
        assert_eq!(json["authenticated"], false);
        assert_eq!(upstream.token_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn denied_callback_is_forbidden_with_denial_message() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);
        send(&state, "GET", "/login").await;

        let response = send(&state, "GET", "/callback?error=access_denied").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "user_denied");
        assert_eq!(json["error"]["message"], DENIED_MESSAGE);
        assert_eq!(upstream.token_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn callback_without_login_is_bad_request() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/callback?code=abc").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "missing_verifier");
        assert_eq!(json["error"]["message"], RELOGIN_MESSAGE);
        assert_eq!(upstream.token_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_exchange_is_bad_request_with_description() {
        let upstream = start_upstream(
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid authorization code"
            }),
        )
        .await;
        let state = test_state(&upstream);
        send(&state, "GET", "/login").await;

        let response = send(&state, "GET", "/callback?code=stale").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "exchange_failed");
        assert!(
            json["error"]["detail"]
                .as_str()
                .unwrap()
                .contains("Invalid authorization code")
        );
        assert_eq!(json["error"]["login_required"], true);
    }

    #[tokio::test]
    async fn me_requires_authentication() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/me").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_authenticated");
    }

    #[tokio::test]
    async fn me_and_top_artists_after_login() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);
        send(&state, "GET", "/login").await;
        send(&state, "GET", "/callback?code=abc").await;

        let response = send(&state, "GET", "/me").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["id"], "user-1");

        let response = send(&state, "GET", "/me/top-artists?time_range=short_term&limit=99").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["items"][0]["name"], "short_term");
        assert_eq!(json["limit"], 50);

        let json = body_json(send(&state, "GET", "/me/top-artists").await).await;
        assert_eq!(json["items"][0]["name"], "medium_term");
        assert_eq!(json["limit"], 20);
    }

    #[tokio::test]
    async fn tracks_history_and_search_after_login() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);
        send(&state, "GET", "/login").await;
        send(&state, "GET", "/callback?code=abc").await;

        let response = send(&state, "GET", "/me/top-tracks?time_range=long_term").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["items"][0]["name"], "long_term");
        assert_eq!(json["items"][0]["artists"][0]["name"], "Artist One");
        assert_eq!(json["limit"], 20);

        let response = send(&state, "GET", "/me/recently-played?limit=0").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["items"][0]["track"]["name"], "Track Two");
        assert_eq!(json["limit"], 1);

        let json = body_json(send(&state, "GET", "/me/recently-played").await).await;
        assert_eq!(json["limit"], 50);

        let response = send(&state, "GET", "/search/artists?q=slowdive").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["items"][0]["name"], "slowdive");
        assert_eq!(json["limit"], 5);
    }

    #[tokio::test]
    async fn blank_search_is_bad_request() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/search/artists?q=%20").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "invalid_query");
    }

    #[tokio::test]
    async fn top_tracks_requires_authentication() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/me/top-tracks").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn health_endpoint_returns_json() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert!(json["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_format() {
        let upstream = start_upstream(StatusCode::OK, token_ok()).await;
        let state = test_state(&upstream);

        let response = send(&state, "GET", "/metrics").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}

//! Authenticated calls to the resource API
//!
//! Bearer tokens come from `Session::valid_access_token` and nowhere else.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::Session;

/// Profile of the logged-in user (`GET /me`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserProfile {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    /// Subscription level, e.g. "premium" or "free"
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub popularity: u32,
}

/// Artist as embedded in a track.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlbumRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub popularity: u32,
}

/// One entry of the listening history.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlayHistory {
    pub track: Track,
    /// ISO 8601 timestamp as sent by the API
    pub played_at: String,
}

#[derive(Debug, Deserialize)]
struct ArtistSearch {
    artists: Page<Artist>,
}

/// Results requested per artist search.
pub const SEARCH_LIMIT: u32 = 5;

/// One page of a paged listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

/// Affinity window for top-item listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    /// About four weeks
    ShortTerm,
    /// About six months
    #[default]
    MediumTerm,
    /// Several years
    LongTerm,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

/// Client for the protected resource API.
#[derive(Clone)]
pub struct ResourceClient {
    session: Arc<Session>,
    base_url: String,
    timeout: Duration,
}

impl ResourceClient {
    pub fn new(session: Arc<Session>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            session,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// GET `path` with a bearer token and decode the JSON body.
    ///
    /// Fails with `NotAuthenticated` before any request when the session
    /// cannot provide a token.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let token = self
            .session
            .valid_access_token()
            .await
            .ok_or(Error::NotAuthenticated)?;

        let url = format!("{}{}", self.base_url, path);
        let mut url = reqwest::Url::parse(&url)
            .map_err(|e| Error::Resource(format!("invalid resource URL {url}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        debug!(path, "resource request");
        let response = self
            .session
            .http_client()
            .get(url)
            .header(reqwest::header::AUTHORIZATION, token.bearer())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Http(format!("resource request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::Resource(format!("{path} returned {status}: {body}")));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Resource(format!("invalid {path} response: {e}")))
    }

    pub async fn current_user(&self) -> Result<UserProfile> {
        self.get_json("/me", &[]).await
    }

    /// The user's top artists; `limit` is clamped to the API's 1..=50.
    pub async fn top_artists(&self, range: TimeRange, limit: u32) -> Result<Page<Artist>> {
        let limit = limit.clamp(1, 50);
        self.get_json(
            "/me/top/artists",
            &[
                ("time_range", range.as_str().to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// The user's top tracks; `limit` is clamped to the API's 1..=50.
    pub async fn top_tracks(&self, range: TimeRange, limit: u32) -> Result<Page<Track>> {
        let limit = limit.clamp(1, 50);
        self.get_json(
            "/me/top/tracks",
            &[
                ("time_range", range.as_str().to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }

    /// Most recently played tracks, newest first.
    pub async fn recently_played(&self, limit: u32) -> Result<Page<PlayHistory>> {
        let limit = limit.clamp(1, 50);
        self.get_json("/me/player/recently-played", &[("limit", limit.to_string())])
            .await
    }

    /// Artists matching `query`, at most `SEARCH_LIMIT` of them.
    pub async fn search_artists(&self, query: &str) -> Result<Page<Artist>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Resource("search query must not be empty".into()));
        }
        let found: ArtistSearch = self
            .get_json(
                "/search",
                &[
                    ("q", query.to_string()),
                    ("type", "artist".to_string()),
                    ("limit", SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;
        Ok(found.artists)
    }
}

//! Default OAuth endpoints and scopes
//!
//! Public configuration of the Spotify accounts service. None of these are
//! secrets; the client id and redirect URI come from deployment config, and
//! tokens live in the credential store.

/// Authorization endpoint the user agent is redirected to.
pub const AUTHORIZE_ENDPOINT: &str = "https://accounts.spotify.com/authorize";

/// Token endpoint for code exchange and token refresh.
pub const TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Base URL of the protected resource API.
pub const API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Scopes requested at login.
///
/// - `user-read-private`: subscription details and country
/// - `user-read-email`: account email
/// - `user-top-read`: top artists and tracks
/// - `user-library-read`: saved tracks and albums
/// - `user-read-recently-played`: recently played tracks
pub const SCOPES: &[&str] = &[
    "user-read-private",
    "user-read-email",
    "user-top-read",
    "user-library-read",
    "user-read-recently-played",
];

/// Tokens are refreshed once they are within this many milliseconds of expiry.
pub const REFRESH_SKEW_MS: u64 = 60_000;

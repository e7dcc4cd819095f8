//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The OAuth client id may come from `OAUTH_CLIENT_ID` so deployments can
//! keep it out of the TOML file.

use pkce_auth::OAuthConfig;
use pkce_auth::constants::{API_BASE_URL, AUTHORIZE_ENDPOINT, REFRESH_SKEW_MS, SCOPES, TOKEN_ENDPOINT};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthSection,
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// OAuth client settings
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    /// May be left empty when `OAUTH_CLIENT_ID` is set.
    #[serde(default)]
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorize_endpoint")]
    pub authorize_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    #[serde(default)]
    pub show_dialog: bool,
}

/// Where credentials are persisted
#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub credentials_path: PathBuf,
}

/// Resource API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_authorize_endpoint() -> String {
    AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_endpoint() -> String {
    TOKEN_ENDPOINT.to_string()
}

fn default_scopes() -> Vec<String> {
    SCOPES.iter().map(|s| s.to_string()).collect()
}

fn default_refresh_skew_secs() -> u64 {
    REFRESH_SKEW_MS / 1000
}

fn default_api_base_url() -> String {
    API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(client_id) = std::env::var("OAUTH_CLIENT_ID") {
            config.oauth.client_id = client_id.trim().to_owned();
        }

        config
            .oauth_config()
            .validate()
            .map_err(|e| Error::Config(e.to_string()))?;

        if !config.api.base_url.starts_with("http://") && !config.api.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "api.base_url must start with http:// or https://, got: {}",
                config.api.base_url
            )));
        }

        if config.api.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }

        if config.server.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(config)
    }

    /// OAuth settings for the auth core.
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.oauth.client_id.clone(),
            redirect_uri: self.oauth.redirect_uri.clone(),
            authorize_endpoint: self.oauth.authorize_endpoint.clone(),
            token_endpoint: self.oauth.token_endpoint.clone(),
            scopes: self.oauth.scopes.clone(),
            refresh_skew: Duration::from_secs(self.oauth.refresh_skew_secs),
            show_dialog: self.oauth.show_dialog,
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_secs)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("pkce-login-gateway.toml")
    }
}

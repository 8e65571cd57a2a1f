//! Application configuration, sourced from environment variables.
//!
//! opsdec is configured entirely through `OPSDEC_*` variables so it drops
//! into a container without a config file. Every knob defaults sensibly;
//! [`Config::validate`] reports non-fatal problems as warnings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::ServerKind;

/// A server definition supplied through the environment. Becomes a
/// `servers` row with `origin = 'environment'` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapServer {
    pub name: String,
    pub kind: ServerKind,
    pub url: String,
    /// API token / access token for the upstream. Encrypted before storage.
    pub token: String,
}

/// Root application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for the database file and image cache.
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    /// Secret for signing access tokens. `None` means derive an ephemeral
    /// one at startup (sessions will not survive a restart).
    pub token_secret: Option<String>,
    /// Key material for encrypting stored upstream credentials.
    pub encryption_key: Option<String>,
    /// "development" or "production"; controls cookie `Secure` flag.
    pub env: String,
    /// Session engine poll cadence in seconds.
    pub poll_interval_secs: u64,
    /// Per-adapter fetch deadline in seconds.
    pub adapter_timeout_secs: u64,
    /// Access-token lifetime in minutes.
    pub access_ttl_mins: i64,
    /// Refresh-token lifetime in days.
    pub refresh_ttl_days: i64,
    /// Servers defined through the environment.
    pub bootstrap_servers: Vec<BootstrapServer>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            host: "0.0.0.0".into(),
            port: 8787,
            token_secret: None,
            encryption_key: None,
            env: "development".into(),
            poll_interval_secs: 5,
            adapter_timeout_secs: 10,
            access_ttl_mins: 15,
            refresh_ttl_days: 30,
            bootstrap_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Build a config from `OPSDEC_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let bootstrap_servers = match std::env::var("OPSDEC_SERVERS") {
            Ok(json) => match serde_json::from_str::<Vec<BootstrapServer>>(&json) {
                Ok(servers) => servers,
                Err(e) => {
                    tracing::warn!("Failed to parse OPSDEC_SERVERS: {e}");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Self {
            data_dir: std::env::var("OPSDEC_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            host: std::env::var("OPSDEC_HOST").unwrap_or(defaults.host),
            port: env_parse("OPSDEC_PORT", defaults.port),
            token_secret: std::env::var("OPSDEC_TOKEN_SECRET").ok(),
            encryption_key: std::env::var("OPSDEC_ENCRYPTION_KEY").ok(),
            env: std::env::var("OPSDEC_ENV").unwrap_or(defaults.env),
            poll_interval_secs: env_parse("OPSDEC_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            adapter_timeout_secs: env_parse(
                "OPSDEC_ADAPTER_TIMEOUT_SECS",
                defaults.adapter_timeout_secs,
            ),
            access_ttl_mins: env_parse("OPSDEC_ACCESS_TTL_MINS", defaults.access_ttl_mins),
            refresh_ttl_days: env_parse("OPSDEC_REFRESH_TTL_DAYS", defaults.refresh_ttl_days),
            bootstrap_servers,
        }
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("opsdec.db")
    }

    /// Directory holding cached thumbnail files.
    pub fn image_cache_dir(&self) -> PathBuf {
        self.data_dir.join("image-cache")
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.token_secret.is_none() {
            warnings.push(
                "OPSDEC_TOKEN_SECRET is not set; an ephemeral secret will be derived and \
                 all sessions will be invalidated on restart"
                    .into(),
            );
        }
        if self.encryption_key.is_none() && !self.bootstrap_servers.is_empty() {
            warnings.push(
                "OPSDEC_ENCRYPTION_KEY is not set but OPSDEC_SERVERS provides credentials".into(),
            );
        }
        if self.poll_interval_secs == 0 {
            warnings.push("OPSDEC_POLL_INTERVAL_SECS is 0; falling back to 5".into());
        }

        for (i, s) in self.bootstrap_servers.iter().enumerate() {
            if s.url.is_empty() {
                warnings.push(format!("OPSDEC_SERVERS[{i}].url is empty"));
            }
            if s.token.is_empty() {
                warnings.push(format!("OPSDEC_SERVERS[{i}].token is empty"));
            }
        }

        warnings
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

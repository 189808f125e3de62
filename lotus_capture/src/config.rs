//! Capture process configuration loaded from environment variables

use lotus_common::constants;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,

    /// Port for lifecycle ingress, REST and session WebSockets
    pub port: u16,

    /// Where the durable snapshot of every tab's history lives
    pub store_path: PathBuf,

    /// History cap per tab (oldest entries are evicted first)
    pub max_requests_per_tab: usize,

    /// Pending assemblies older than this are dropped by the sweeper
    pub pending_ttl: Duration,

    /// Whether finalized records are enriched with a re-fetched response body
    pub body_capture: bool,

    /// Timeout for a single body-capture fetch
    pub body_capture_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_requests_per_tab: usize =
            parse_var("LOTUS_MAX_REQUESTS_PER_TAB", constants::MAX_REQUESTS_PER_TAB)?;
        if max_requests_per_tab == 0 {
            return Err(ConfigError::InvalidValue("LOTUS_MAX_REQUESTS_PER_TAB"));
        }

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "4455".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
            store_path: env::var("LOTUS_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_store_path()),
            max_requests_per_tab,
            pending_ttl: Duration::from_secs(parse_var("LOTUS_PENDING_TTL_SECS", 300)?),
            body_capture: parse_var("LOTUS_BODY_CAPTURE", true)?,
            body_capture_timeout: Duration::from_secs(parse_var(
                "LOTUS_BODY_CAPTURE_TIMEOUT_SECS",
                30,
            )?),
        })
    }

    /// Address string for the listener (e.g. "127.0.0.1:4455")
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4455,
            store_path: default_store_path(),
            max_requests_per_tab: constants::MAX_REQUESTS_PER_TAB,
            pending_ttl: Duration::from_secs(300),
            body_capture: true,
            body_capture_timeout: Duration::from_secs(30),
        }
    }
}

/// `<data dir>/lotus/requests.json`
fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lotus")
        .join("requests.json")
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("Invalid port number")]
    InvalidPort,
}

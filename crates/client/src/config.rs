//! Client configuration from environment variables.

use thiserror::Error;
use url::Url;

use crate::stores::HistoryWindow;
use crate::ws::ReconnectConfig;

/// Default per-device realtime sample history.
pub const DEFAULT_SAMPLE_HISTORY: usize = 500;

/// Default socket endpoint for local development.
pub const DEFAULT_LOCAL_URL: &str = "ws://localhost:8080/ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a number, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("{var} must be true or false, got {value:?}")]
    InvalidFlag { var: &'static str, value: String },
    #[error("{var} must be `points:N` or `minutes:N`, got {value:?}")]
    InvalidWindow { var: &'static str, value: String },
    #[error("{var} is required for the `{environment}` environment")]
    MissingUrl {
        var: &'static str,
        environment: String,
    },
    #[error("invalid socket url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Deployment environment, which decides the socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Other(String),
}

impl Environment {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "" | "dev" | "development" => Environment::Development,
            other => Environment::Other(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Environment::Development => "development",
            Environment::Other(name) => name,
        }
    }
}

/// Realtime client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub environment: Environment,
    /// Host the app is served from; picks local vs tunnel in development.
    pub hostname: String,
    /// Endpoint for every non-development environment.
    pub ws_url: Option<String>,
    pub ws_url_local: String,
    pub ws_url_tunnel: Option<String>,
    pub reconnect: ReconnectConfig,
    pub history_window: HistoryWindow,
    pub sample_history: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            hostname: "localhost".to_string(),
            ws_url: None,
            ws_url_local: DEFAULT_LOCAL_URL.to_string(),
            ws_url_tunnel: None,
            reconnect: ReconnectConfig::default(),
            history_window: HistoryWindow::default(),
            sample_history: DEFAULT_SAMPLE_HISTORY,
        }
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        var,
        value: value.to_string(),
    })
}

/// `localhost` or `127.0.0.1`, with or without a port.
fn is_loopback_host(hostname: &str) -> bool {
    let host = hostname.trim();
    let host = host.rsplit_once(':').map_or(host, |(host, _)| host);
    matches!(host.to_ascii_lowercase().as_str(), "localhost" | "127.0.0.1")
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CALIBRA_ENV`: "development" | anything else (default: "development")
    /// - `CALIBRA_HOSTNAME`: host the portal runs on (default: "localhost")
    /// - `CALIBRA_WS_URL`: socket endpoint outside development
    /// - `CALIBRA_WS_URL_LOCAL`: development endpoint on a local host
    /// - `CALIBRA_WS_URL_TUNNEL`: development endpoint behind a tunnel
    /// - `CALIBRA_RECONNECT_DELAY_MS`: delay before reconnecting (default: 2000)
    /// - `CALIBRA_RECONNECT_MAX_ATTEMPTS`: 0 = unlimited (default: 0)
    /// - `CALIBRA_RECONNECT_AFTER_ERROR`: keep retrying after errors (default: false)
    /// - `CALIBRA_HISTORY_WINDOW`: `points:N` | `minutes:N` (default: `points:100`)
    /// - `CALIBRA_SAMPLE_HISTORY`: realtime samples kept per device (default: 500)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Parse configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(env) = lookup("CALIBRA_ENV") {
            config.environment = Environment::parse(&env);
        }
        if let Some(hostname) = lookup("CALIBRA_HOSTNAME") {
            config.hostname = hostname;
        }
        config.ws_url = lookup("CALIBRA_WS_URL");
        if let Some(url) = lookup("CALIBRA_WS_URL_LOCAL") {
            config.ws_url_local = url;
        }
        config.ws_url_tunnel = lookup("CALIBRA_WS_URL_TUNNEL");

        if let Some(v) = lookup("CALIBRA_RECONNECT_DELAY_MS") {
            config.reconnect.delay_ms = parse_number("CALIBRA_RECONNECT_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("CALIBRA_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = parse_number("CALIBRA_RECONNECT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("CALIBRA_RECONNECT_AFTER_ERROR") {
            config.reconnect.retry_after_error = parse_flag("CALIBRA_RECONNECT_AFTER_ERROR", &v)?;
        }
        if let Some(v) = lookup("CALIBRA_HISTORY_WINDOW") {
            config.history_window = v.parse().map_err(|_| ConfigError::InvalidWindow {
                var: "CALIBRA_HISTORY_WINDOW",
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("CALIBRA_SAMPLE_HISTORY") {
            config.sample_history = parse_number("CALIBRA_SAMPLE_HISTORY", &v)?;
        }

        Ok(config)
    }

    /// The endpoint selected for the current environment.
    pub fn endpoint(&self) -> Result<&str, ConfigError> {
        match &self.environment {
            Environment::Development if is_loopback_host(&self.hostname) => {
                Ok(self.ws_url_local.as_str())
            }
            Environment::Development => {
                self.ws_url_tunnel
                    .as_deref()
                    .ok_or_else(|| ConfigError::MissingUrl {
                        var: "CALIBRA_WS_URL_TUNNEL",
                        environment: self.environment.name().to_string(),
                    })
            }
            Environment::Other(_) => self.ws_url.as_deref().ok_or_else(|| ConfigError::MissingUrl {
                var: "CALIBRA_WS_URL",
                environment: self.environment.name().to_string(),
            }),
        }
    }

    /// Full socket URL with the access token appended as `token`.
    pub fn socket_url(&self, token: Option<&str>) -> Result<Url, ConfigError> {
        let endpoint = self.endpoint()?;
        let mut url = Url::parse(endpoint).map_err(|source| ConfigError::InvalidUrl {
            url: endpoint.to_string(),
            source,
        })?;
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }
}

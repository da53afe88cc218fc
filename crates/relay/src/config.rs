// Relay server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Every knob the hub reads lives here.

use std::{net::SocketAddr, time::Duration};

const DEV_SESSION_SECRET: &str = "intelhub_local_development_session_secret_32c";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HMAC secret for session tokens issued by the login path.
    pub session_secret: String,
    /// Name of the cookie carrying the session token.
    pub session_cookie: String,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `intelhub_relay=debug`).
    pub log_filter: String,
    pub log_format: LogFormat,
    /// Frames buffered per connection before the peer counts as a slow consumer.
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `INTELHUB_RELAY_HOST` | `0.0.0.0` |
    /// | `INTELHUB_RELAY_PORT` | `5000` |
    /// | `INTELHUB_RELAY_SESSION_SECRET` | dev-only placeholder |
    /// | `INTELHUB_RELAY_SESSION_COOKIE` | `intelhub_session` |
    /// | `INTELHUB_RELAY_CORS_ORIGINS` | *(unset: local dev origins)* |
    /// | `INTELHUB_RELAY_LOG_FILTER` | `info` |
    /// | `INTELHUB_RELAY_LOG_FORMAT` | `text` |
    /// | `INTELHUB_RELAY_OUTBOUND_BUFFER` | `256` |
    /// | `INTELHUB_RELAY_HEARTBEAT_INTERVAL_MS` | `30000` |
    /// | `INTELHUB_RELAY_HEARTBEAT_TIMEOUT_MS` | `10000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("INTELHUB_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("INTELHUB_RELAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let session_secret =
            env("INTELHUB_RELAY_SESSION_SECRET").unwrap_or_else(|_| DEV_SESSION_SECRET.into());
        let session_cookie = env("INTELHUB_RELAY_SESSION_COOKIE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "intelhub_session".into());

        let cors_origins = env("INTELHUB_RELAY_CORS_ORIGINS").ok();
        let log_filter = env("INTELHUB_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("INTELHUB_RELAY_LOG_FORMAT").ok().as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let outbound_buffer = env("INTELHUB_RELAY_OUTBOUND_BUFFER")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(DEFAULT_OUTBOUND_BUFFER)
            .max(1);
        let heartbeat_interval = Duration::from_millis(parse_millis(
            &env,
            "INTELHUB_RELAY_HEARTBEAT_INTERVAL_MS",
            DEFAULT_HEARTBEAT_INTERVAL_MS,
        ));
        let heartbeat_timeout = Duration::from_millis(parse_millis(
            &env,
            "INTELHUB_RELAY_HEARTBEAT_TIMEOUT_MS",
            DEFAULT_HEARTBEAT_TIMEOUT_MS,
        ));

        Self {
            listen_addr,
            session_secret,
            session_cookie,
            cors_origins,
            log_filter,
            log_format,
            outbound_buffer,
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    /// Returns true when using the development-only session secret.
    pub fn is_dev_session_secret(&self) -> bool {
        self.session_secret == DEV_SESSION_SECRET
    }
}

fn parse_millis<F>(env: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    env(key).ok().and_then(|v| v.parse::<u64>().ok()).filter(|v| *v > 0).unwrap_or(default)
}

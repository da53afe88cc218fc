// Client connection parameters.

use std::time::Duration;

use anyhow::{anyhow, Result};
use url::Url;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_TYPING_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub websocket endpoint (e.g. "wss://intel.example.org/ws").
    pub url: Url,
    /// Session token sent as `Authorization: Bearer`.
    pub session_token: Option<String>,
    pub reconnect_delay: Duration,
    /// Input inactivity after which `typing_end` is sent.
    pub typing_debounce: Duration,
    /// Messages held while disconnected; the oldest are dropped past this.
    pub queue_capacity: usize,
}

impl ClientConfig {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: parse_hub_url(url)?,
            session_token: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            typing_debounce: DEFAULT_TYPING_DEBOUNCE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        })
    }

    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(token.into()).filter(|token: &String| !token.trim().is_empty());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_typing_debounce(mut self, window: Duration) -> Self {
        self.typing_debounce = window;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

fn parse_hub_url(value: &str) -> Result<Url> {
    let parsed = Url::parse(value).map_err(|error| anyhow!("invalid hub url `{value}`: {error}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(anyhow!("hub url must use ws or wss, got `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = ClientConfig::new("ws://localhost:5000/ws").expect("url should parse");
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
        assert_eq!(config.typing_debounce, Duration::from_millis(500));
        assert_eq!(config.queue_capacity, 1024);
        assert!(config.session_token.is_none());
    }

    #[test]
    fn rejects_non_websocket_schemes() {
        let error = ClientConfig::new("https://intel.example.org/ws").expect_err("https rejected");
        assert!(error.to_string().contains("ws or wss"));
        assert!(ClientConfig::new("not a url").is_err());
    }

    #[test]
    fn blank_token_is_ignored_and_capacity_is_at_least_one() {
        let config = ClientConfig::new("wss://intel.example.org/ws")
            .expect("url should parse")
            .with_session_token("   ")
            .with_queue_capacity(0);
        assert!(config.session_token.is_none());
        assert_eq!(config.queue_capacity, 1);
    }
}

//! Configuration management

use anyhow::Result;
use std::time::Duration;

use crate::instagram::{EngineConfig, ExtractorConfig, SessionConfig};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// DevTools endpoint of the logged-in browser
    pub browser_url: String,

    /// Pause between rounds of an "all" fetch
    pub round_delay: Duration,

    /// Keep-alive notification interval
    pub keep_alive_interval: Duration,

    /// Upper bound on one extraction round
    pub round_timeout: Duration,

    /// Probe the next offset instead of the full-batch heuristic
    pub probe_has_more: bool,

    /// Scroll attempts while discovering posts
    pub max_scrolls: usize,

    /// Wait after navigation or scrolling
    pub settle: Duration,

    /// How long shutdown waits for in-flight tool calls
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_url: "http://127.0.0.1:9222".to_string(),
            round_delay: Duration::from_millis(1500),
            keep_alive_interval: Duration::from_secs(10),
            round_timeout: Duration::from_secs(90),
            probe_has_more: false,
            max_scrolls: 25,
            settle: Duration::from_millis(1200),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        let browser_url = lookup("CHROME_DEBUG_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.browser_url);

        if !(browser_url.starts_with("http://")
            || browser_url.starts_with("https://")
            || browser_url.starts_with("ws://")
            || browser_url.starts_with("wss://"))
        {
            anyhow::bail!(
                "CHROME_DEBUG_URL must be an http(s):// or ws(s):// URL, got '{}'",
                browser_url
            );
        }

        let round_delay = number("INSTAGRAM_ROUND_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.round_delay);

        let keep_alive_interval = number("INSTAGRAM_KEEPALIVE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.keep_alive_interval);

        let round_timeout = number("INSTAGRAM_ROUND_TIMEOUT_SECS")
            .filter(|&s| s > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.round_timeout);

        let probe_has_more = lookup("INSTAGRAM_PROBE_HAS_MORE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.probe_has_more);

        let max_scrolls = number("INSTAGRAM_MAX_SCROLLS")
            .map(|n| n as usize)
            .unwrap_or(defaults.max_scrolls);

        let settle = number("INSTAGRAM_SETTLE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.settle);

        let shutdown_grace = number("MCP_SHUTDOWN_GRACE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        Ok(Self {
            browser_url,
            round_delay,
            keep_alive_interval,
            round_timeout,
            probe_has_more,
            max_scrolls,
            settle,
            shutdown_grace,
        })
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            round_delay: self.round_delay,
            keep_alive_interval: self.keep_alive_interval,
            round_timeout: self.round_timeout,
            probe_has_more: self.probe_has_more,
        }
    }

    pub fn extractor(&self) -> ExtractorConfig {
        ExtractorConfig {
            max_scrolls: self.max_scrolls,
            settle: self.settle,
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            browser_url: self.browser_url.clone(),
            ..SessionConfig::default()
        }
    }
}

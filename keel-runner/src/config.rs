//! Runner configuration
//!
//! Defines all configurable parameters for the runner including
//! polling intervals, log flushing and orchestrator connection settings.

use anyhow::Context;
use std::collections::BTreeMap;
use std::time::Duration;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Name this runner registers under. Unique across the fleet.
    pub runner_name: String,

    /// Orchestrator base URL (e.g., "http://localhost:8080")
    pub orchestrator_url: String,

    /// Pause between loop iterations
    pub poll_interval: Duration,

    /// Debounce for sending buffered job output
    pub log_flush_interval: Duration,

    /// Heartbeat period while a job is executing
    pub heartbeat_interval: Duration,

    /// Image for jobs that do not name one
    pub default_image: String,

    /// Reported with every heartbeat and claim
    pub labels: BTreeMap<String, String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(runner_name: String, orchestrator_url: String) -> Self {
        Self {
            runner_name,
            orchestrator_url,
            poll_interval: Duration::from_millis(1000),
            log_flush_interval: Duration::from_millis(300),
            heartbeat_interval: Duration::from_secs(15),
            default_image: "alpine:3.20".to_string(),
            labels: BTreeMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Recognized variables, all optional:
    /// - RUNNER_NAME (default: runner-<random>)
    /// - ORCHESTRATOR_URL (default: http://localhost:8080)
    /// - POLL_INTERVAL_MS (default: 1000)
    /// - LOG_FLUSH_INTERVAL_MS (default: 300)
    /// - HEARTBEAT_INTERVAL_SECS (default: 15)
    /// - DEFAULT_IMAGE (default: alpine:3.20)
    /// - RUNNER_LABELS (comma separated `key=value` pairs)
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(name) = std::env::var("RUNNER_NAME") {
            config.runner_name = name;
        }
        if let Ok(url) = std::env::var("ORCHESTRATOR_URL") {
            config.orchestrator_url = url;
        }
        if let Some(ms) = parse_u64("POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64("LOG_FLUSH_INTERVAL_MS")? {
            config.log_flush_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_u64("HEARTBEAT_INTERVAL_SECS")? {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Ok(image) = std::env::var("DEFAULT_IMAGE") {
            config.default_image = image;
        }
        if let Ok(labels) = std::env::var("RUNNER_LABELS") {
            config.labels = parse_labels(&labels)?;
        }

        Ok(config)
    }

    /// Adds a label reported to the orchestrator
    #[allow(dead_code)]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.runner_name.trim().is_empty() {
            anyhow::bail!("runner_name cannot be empty");
        }

        if self.runner_name.len() > 150 {
            anyhow::bail!("runner_name cannot be longer than 150 characters");
        }

        if !self.orchestrator_url.starts_with("http://")
            && !self.orchestrator_url.starts_with("https://")
        {
            anyhow::bail!("orchestrator_url must start with http:// or https://");
        }

        if self.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.log_flush_interval.is_zero() {
            anyhow::bail!("log_flush_interval must be greater than 0");
        }

        if self.heartbeat_interval.is_zero() {
            anyhow::bail!("heartbeat_interval must be greater than 0");
        }

        if self.default_image.trim().is_empty() {
            anyhow::bail!("default_image cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self::new(
            format!("runner-{}", &suffix[..8]),
            "http://localhost:8080".to_string(),
        )
    }
}

fn parse_u64(name: &str) -> anyhow::Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {}: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}

fn parse_labels(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => anyhow::bail!("invalid label '{}', expected key=value", pair),
        })
        .collect()
}

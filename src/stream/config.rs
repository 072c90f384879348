// src/stream/config.rs - Streamer configuration
//
// Built in code with `set_*` or loaded from TOML; every key has a default and
// is range-checked by `validate`.

use crate::error::{Error, Result};
use crate::stream::frame_queue::{DEFAULT_MAX_ENCODE_CONCURRENT, DEFAULT_MAX_SEND_CONCURRENT};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "localhost:8181";

const RETRY_SECS_RANGE: (f32, f32) = (0.0, 10.0);
const PING_SECS_RANGE: (f32, f32) = (1.0, 10.0);
const SEND_FRAME_RATE_RANGE: (f32, f32) = (1.0, 90.0);

/// Streamer configuration.
///
/// Can be built in code with the `set_*` methods or loaded from TOML, where
/// every key is optional:
///
/// ```toml
/// hosts = ["10.0.0.2:8181", "10.0.0.3:8181"]
/// retry_secs = 2.5
/// only_send_latest = true
/// send_frame_rate = 30
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamerConfig {
    /// Endpoints tried in round-robin order.
    #[serde(default = "default_hosts")]
    hosts: Vec<String>,
    /// Delay between connect attempts while disconnected.
    #[serde(default = "default_retry_secs")]
    retry_secs: f32,
    /// Delay before the very first connect attempt.
    #[serde(default = "default_initial_retry_secs")]
    initial_retry_secs: f32,
    /// Keep-alive interval. Accepted and validated, but no keep-alive traffic is sent.
    #[serde(default = "default_ping_secs")]
    ping_secs: f32,
    #[serde(default = "default_max_encode_concurrent")]
    max_encode_concurrent: usize,
    #[serde(default = "default_max_send_concurrent")]
    max_send_concurrent: usize,
    #[serde(default)]
    only_send_latest: bool,
    /// Frames per second accepted from the producer; keyframes are exempt.
    #[serde(default = "default_send_frame_rate")]
    send_frame_rate: f32,
    /// Encode on worker threads instead of inline on the control loop.
    #[serde(default)]
    async_encode: bool,
}

fn default_hosts() -> Vec<String> {
    vec![DEFAULT_HOST.to_string()]
}
fn default_retry_secs() -> f32 {
    5.0
}
fn default_initial_retry_secs() -> f32 {
    1.0
}
fn default_ping_secs() -> f32 {
    10.0
}
fn default_max_encode_concurrent() -> usize {
    DEFAULT_MAX_ENCODE_CONCURRENT
}
fn default_max_send_concurrent() -> usize {
    DEFAULT_MAX_SEND_CONCURRENT
}
fn default_send_frame_rate() -> f32 {
    60.0
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            retry_secs: default_retry_secs(),
            initial_retry_secs: default_initial_retry_secs(),
            ping_secs: default_ping_secs(),
            max_encode_concurrent: default_max_encode_concurrent(),
            max_send_concurrent: default_max_send_concurrent(),
            only_send_latest: false,
            send_frame_rate: default_send_frame_rate(),
            async_encode: false,
        }
    }
}

impl StreamerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: StreamerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value is in range.
    ///
    /// An empty host list is accepted here: it is reported at connect time
    /// and retried, so hosts can be supplied later.
    pub fn validate(&self) -> Result<()> {
        check_range("retry_secs", self.retry_secs, RETRY_SECS_RANGE)?;
        if !self.initial_retry_secs.is_finite() || self.initial_retry_secs < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "initial_retry_secs must be a non-negative number, got {}",
                self.initial_retry_secs
            )));
        }
        check_range("ping_secs", self.ping_secs, PING_SECS_RANGE)?;
        check_range("send_frame_rate", self.send_frame_rate, SEND_FRAME_RATE_RANGE)?;
        if self.max_encode_concurrent == 0 {
            return Err(Error::InvalidConfig(
                "max_encode_concurrent must be at least 1".to_string(),
            ));
        }
        if self.max_send_concurrent == 0 {
            return Err(Error::InvalidConfig(
                "max_send_concurrent must be at least 1".to_string(),
            ));
        }
        if let Some(host) = self.hosts.iter().find(|h| h.trim().is_empty()) {
            return Err(Error::InvalidConfig(format!("blank host entry {host:?}")));
        }
        Ok(())
    }

    pub fn set_hosts<S: Into<String>>(mut self, hosts: impl IntoIterator<Item = S>) -> Self {
        self.hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the host list with a single host.
    pub fn set_host(self, host: impl Into<String>) -> Self {
        let host: String = host.into();
        self.set_hosts([host])
    }

    pub fn set_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_secs = interval.as_secs_f32();
        self
    }

    pub fn set_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.initial_retry_secs = delay.as_secs_f32();
        self
    }

    pub fn set_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_secs = interval.as_secs_f32();
        self
    }

    pub fn set_max_encode_concurrent(mut self, max: usize) -> Self {
        self.max_encode_concurrent = max;
        self
    }

    pub fn set_max_send_concurrent(mut self, max: usize) -> Self {
        self.max_send_concurrent = max;
        self
    }

    pub fn set_only_send_latest(mut self, only_send_latest: bool) -> Self {
        self.only_send_latest = only_send_latest;
        self
    }

    pub fn set_send_frame_rate(mut self, frames_per_second: f32) -> Self {
        self.send_frame_rate = frames_per_second;
        self
    }

    pub fn set_async_encode(mut self, async_encode: bool) -> Self {
        self.async_encode = async_encode;
        self
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn retry_interval(&self) -> Duration {
        secs(self.retry_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        secs(self.initial_retry_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        secs(self.ping_secs)
    }

    pub fn max_encode_concurrent(&self) -> usize {
        self.max_encode_concurrent
    }

    pub fn max_send_concurrent(&self) -> usize {
        self.max_send_concurrent
    }

    pub fn only_send_latest(&self) -> bool {
        self.only_send_latest
    }

    pub fn send_frame_rate(&self) -> f32 {
        self.send_frame_rate
    }

    /// Minimum spacing between accepted non-keyframes.
    pub fn send_delay(&self) -> Duration {
        secs(1.0 / self.send_frame_rate)
    }

    pub fn async_encode(&self) -> bool {
        self.async_encode
    }
}

fn check_range(name: &str, value: f32, (min, max): (f32, f32)) -> Result<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!(
            "{name} must be within {min}..={max}, got {value}"
        )))
    }
}

fn secs(value: f32) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f32(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StreamerConfig::default();
        assert_eq!(config.hosts(), &["localhost:8181".to_string()]);
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
        assert_eq!(config.initial_retry_delay(), Duration::from_secs(1));
        assert_eq!(config.ping_interval(), Duration::from_secs(10));
        assert_eq!(config.max_encode_concurrent(), 3);
        assert_eq!(config.max_send_concurrent(), 3);
        assert!(!config.only_send_latest());
        assert!(!config.async_encode());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_send_delay_follows_rate() {
        let config = StreamerConfig::new().set_send_frame_rate(10.0);
        let delay = config.send_delay();
        assert!(delay > Duration::from_millis(99) && delay < Duration::from_millis(101));
    }

    #[test]
    fn test_set_host_replaces_list() {
        let config = StreamerConfig::new()
            .set_hosts(["a:1", "b:2"])
            .set_host("c:3");
        assert_eq!(config.hosts(), &["c:3".to_string()]);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = StreamerConfig::from_toml_str(
            r#"
            hosts = ["10.0.0.2:8181", "10.0.0.3:8181"]
            retry_secs = 2.5
            only_send_latest = true
            "#,
        )
        .unwrap();
        assert_eq!(config.hosts().len(), 2);
        assert_eq!(config.retry_interval(), Duration::from_millis(2500));
        assert!(config.only_send_latest());
        assert_eq!(config.send_frame_rate(), 60.0);
    }

    #[test]
    fn test_from_toml_rejects_unknown_keys() {
        let err = StreamerConfig::from_toml_str("retries = 3").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(StreamerConfig::new().set_send_frame_rate(0.0).validate().is_err());
        assert!(StreamerConfig::new().set_send_frame_rate(91.0).validate().is_err());
        assert!(StreamerConfig::new()
            .set_retry_interval(Duration::from_secs(11))
            .validate()
            .is_err());
        assert!(StreamerConfig::new()
            .set_ping_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(StreamerConfig::new().set_max_send_concurrent(0).validate().is_err());
        assert!(StreamerConfig::new().set_host(" ").validate().is_err());
    }

    #[test]
    fn test_empty_host_list_is_valid() {
        let config = StreamerConfig::new().set_hosts(Vec::<String>::new());
        assert!(config.validate().is_ok());
        assert!(config.hosts().is_empty());
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use promstat_core::error::{Result, StatsError};
use promstat_core::Tag;

pub const DEFAULT_STATS_PORT: u16 = 7418;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 500;
pub const DEFAULT_METRIC_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Prepended to every metric name.
    #[serde(default)]
    pub prefix: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Series not flushed for this long drop out of `/metrics`. 0 keeps them forever.
    #[serde(default = "default_metric_timeout_ms")]
    pub metric_timeout_ms: u64,

    #[serde(default)]
    pub mode: RouterMode,

    /// Tags attached to every metric.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    #[serde(default)]
    pub log: LogSection,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            port: default_port(),
            flush_interval_ms: default_flush_interval_ms(),
            metric_timeout_ms: default_metric_timeout_ms(),
            mode: RouterMode::default(),
            tags: BTreeMap::new(),
            log: LogSection::default(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(10..=60_000).contains(&self.flush_interval_ms) {
            return Err(StatsError::Config(
                "flush_interval_ms must be between 10 and 60000".into(),
            ));
        }
        if self.tags.keys().any(|k| k.is_empty()) {
            return Err(StatsError::Config("tag names must not be empty".into()));
        }
        Ok(())
    }

    pub fn flush_every(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn metric_timeout(&self) -> Option<Duration> {
        (self.metric_timeout_ms > 0).then(|| Duration::from_millis(self.metric_timeout_ms))
    }

    pub fn tag_list(&self) -> Vec<Tag> {
        self.tags.iter().map(|(k, v)| Tag::new(k, v)).collect()
    }
}

/// `debug` installs the request logging middleware; `release` serves bare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouterMode {
    #[default]
    Debug,
    Release,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

fn default_port() -> u16 {
    DEFAULT_STATS_PORT
}
fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL_MS
}
fn default_metric_timeout_ms() -> u64 {
    DEFAULT_METRIC_TIMEOUT_MS
}

//! Prometheus text exposition.
//!
//! The handler keeps the last flushed sample of every series and renders them
//! on demand. Families are sorted by metric name and series by label set, so
//! output is deterministic regardless of recording or flush order. Series that
//! stop being flushed (for example the untagged copies left behind by a
//! re-tag) expire after the handler's timeout.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;
use std::io;
use std::time::{Duration, SystemTime};

use parking_lot::RwLock;

use crate::error::Result;
use crate::measure::{Aggregate, Measure, MetricKind};
use crate::tag::Tag;

/// Receives flushed measures from an [`Engine`](crate::Engine).
pub trait MeasureSink: Send + Sync {
    fn handle_measures(&self, time: SystemTime, measures: &[Measure]) -> Result<()>;
}

/// A sink that can also render its buffer for scraping.
pub trait Exposition: MeasureSink {
    fn render(&self) -> String;

    fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }
}

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Series not refreshed for this long are dropped.
pub const DEFAULT_METRIC_TIMEOUT: Duration = Duration::from_secs(120);

/// Helper to escape label values.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn sanitize(name: &str, allow_colon: bool) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Map a dotted measure name onto the Prometheus metric name charset.
pub fn metric_name(name: &str) -> String {
    sanitize(name, true)
}

/// Label names allow `[A-Za-z0-9_]` only; no colons.
pub fn label_name(name: &str) -> String {
    sanitize(name, false)
}

/// Empty tag names are dropped. Names that collide after sanitising keep the
/// last value.
fn label_set(tags: &[Tag]) -> String {
    let labels: BTreeMap<String, &str> = tags
        .iter()
        .filter(|t| !t.name.is_empty())
        .map(|t| (label_name(&t.name), t.value.as_str()))
        .collect();
    if labels.is_empty() {
        return String::new();
    }
    let inner = labels
        .iter()
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label(value)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{inner}}}")
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        if v > 0.0 { "+Inf".into() } else { "-Inf".into() }
    } else {
        // f64 Display prints whole numbers without a fraction.
        format!("{v}")
    }
}

#[derive(Debug, Clone)]
struct Sample {
    aggregate: Aggregate,
    timestamp_ms: Option<i64>,
    // flush time of the last update
    updated: SystemTime,
}

#[derive(Debug)]
struct Family {
    kind: MetricKind,
    // rendered label set -> latest sample
    series: BTreeMap<String, Sample>,
}

pub struct PrometheusHandler {
    timeout: Option<Duration>,
    buffer: RwLock<BTreeMap<String, Family>>,
}

impl Default for PrometheusHandler {
    fn default() -> Self {
        Self::with_timeout(Some(DEFAULT_METRIC_TIMEOUT))
    }
}

impl PrometheusHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler whose series expire `timeout` after their last flush.
    /// `None` keeps every series forever.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            buffer: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Drop everything flushed so far.
    pub fn reset(&self) {
        self.buffer.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Write the rendered buffer to `w`.
    pub fn write_stats<W: io::Write>(&self, mut w: W) -> io::Result<()> {
        w.write_all(self.render().as_bytes())
    }

    fn is_stale(&self, sample: &Sample, now: SystemTime) -> bool {
        match (self.timeout, now.duration_since(sample.updated)) {
            (Some(timeout), Ok(age)) => age > timeout,
            _ => false,
        }
    }

    fn evict(&self, buffer: &mut BTreeMap<String, Family>, now: SystemTime) {
        if self.timeout.is_none() {
            return;
        }
        let mut expired = 0usize;
        buffer.retain(|_, family| {
            let before = family.series.len();
            family.series.retain(|_, sample| !self.is_stale(sample, now));
            expired += before - family.series.len();
            !family.series.is_empty()
        });
        if expired > 0 {
            tracing::debug!(expired, "expired stale series");
        }
    }
}

impl MeasureSink for PrometheusHandler {
    /// Within one flush the first kind seen for a name wins; later series of
    /// that name with another kind are dropped.
    fn handle_measures(&self, time: SystemTime, measures: &[Measure]) -> Result<()> {
        let mut buffer = self.buffer.write();
        let mut kinds: HashMap<String, MetricKind> = HashMap::new();
        for m in measures {
            let name = metric_name(&m.name);
            let kind = m.kind();
            if let Some(&first) = kinds.get(&name) {
                if first != kind {
                    tracing::warn!(metric = %name, kept = %first, dropped = %kind, "conflicting metric kinds in one flush");
                    continue;
                }
            }
            let family = buffer.entry(name.clone()).or_insert_with(|| Family {
                kind,
                series: BTreeMap::new(),
            });
            if family.kind != kind {
                family.kind = kind;
                family.series.clear();
            }
            family.series.insert(
                label_set(&m.tags),
                Sample {
                    aggregate: m.aggregate,
                    timestamp_ms: m.timestamp_ms,
                    updated: time,
                },
            );
            kinds.insert(name, kind);
        }
        self.evict(&mut buffer, time);
        Ok(())
    }
}

impl Exposition for PrometheusHandler {
    fn render(&self) -> String {
        let now = SystemTime::now();
        let buffer = self.buffer.read();
        let mut out = String::new();
        for (name, family) in buffer.iter() {
            let live: Vec<(&String, &Sample)> = family
                .series
                .iter()
                .filter(|(_, sample)| !self.is_stale(sample, now))
                .collect();
            if live.is_empty() {
                continue;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            let _ = writeln!(out, "# TYPE {} {}", name, family.kind);
            for (labels, sample) in live {
                let ts = sample
                    .timestamp_ms
                    .map(|t| format!(" {t}"))
                    .unwrap_or_default();
                match sample.aggregate {
                    Aggregate::Counter(v) | Aggregate::Gauge(v) => {
                        let _ = writeln!(out, "{}{} {}{}", name, labels, format_value(v), ts);
                    }
                    Aggregate::Histogram { count, sum } => {
                        let _ = writeln!(out, "{}_count{} {}{}", name, labels, count, ts);
                        let _ = writeln!(out, "{}_sum{} {}{}", name, labels, format_value(sum), ts);
                    }
                }
            }
        }
        out
    }
}

impl std::fmt::Debug for PrometheusHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusHandler")
            .field("timeout", &self.timeout)
            .field("families", &self.buffer.read().len())
            .finish()
    }
}

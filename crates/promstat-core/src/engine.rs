//! Aggregation engine.
//!
//! Application code records measurements from any thread; a flush pushes every
//! accumulated series to the bound sink in a single call. Series are keyed by
//! name plus call-site tags, while engine-level tags (and the prefix) are only
//! applied at flush time, so a re-tagged engine can carry its state forward.

use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::Result;
use crate::exposition::MeasureSink;
use crate::measure::{unix_millis, Aggregate, Measure, Measurement, MetricKind, ToValue};
use crate::tag::{self, Tag};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    tags: Vec<Tag>,
}

#[derive(Debug, Clone)]
struct Series {
    aggregate: Aggregate,
    timestamp_ms: Option<i64>,
}

pub struct Engine {
    prefix: String,
    tags: Vec<Tag>,
    series: DashMap<SeriesKey, Series>,
    sink: RwLock<Option<Arc<dyn MeasureSink>>>,
}

impl Engine {
    pub fn new(prefix: impl Into<String>, tags: &[Tag]) -> Self {
        Self {
            prefix: prefix.into(),
            tags: tag::normalize(tags),
            series: DashMap::new(),
            sink: RwLock::new(None),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Engine-level tags, normalised.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Number of distinct series recorded so far.
    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Route future flushes to `sink`, replacing any previous binding.
    pub fn set_sink(&self, sink: Arc<dyn MeasureSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn clear_sink(&self) {
        *self.sink.write() = None;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.read().is_some()
    }

    pub fn record(&self, m: Measurement) {
        let key = SeriesKey {
            name: m.name,
            tags: tag::normalize(&m.tags),
        };
        let ts = m.time.map(unix_millis);
        self.series
            .entry(key)
            .and_modify(|s| {
                s.aggregate.apply(m.kind, m.value);
                if ts.is_some() {
                    s.timestamp_ms = ts;
                }
            })
            .or_insert_with(|| Series {
                aggregate: Aggregate::start(m.kind, m.value),
                timestamp_ms: ts,
            });
    }

    /// Add 1 to a counter.
    pub fn incr(&self, name: &str, tags: &[Tag]) {
        self.add(name, 1.0, tags);
    }

    pub fn add(&self, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(Measurement::new(name, MetricKind::Counter, value.to_value()).with_tags(tags));
    }

    /// Set a gauge; `bool` values map to 0/1.
    pub fn set(&self, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(Measurement::new(name, MetricKind::Gauge, value.to_value()).with_tags(tags));
    }

    /// Feed a histogram; `Duration` values are recorded in seconds.
    pub fn observe(&self, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(Measurement::new(name, MetricKind::Histogram, value.to_value()).with_tags(tags));
    }

    pub fn incr_at(&self, time: SystemTime, name: &str, tags: &[Tag]) {
        self.add_at(time, name, 1.0, tags);
    }

    pub fn add_at(&self, time: SystemTime, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(
            Measurement::new(name, MetricKind::Counter, value.to_value())
                .with_tags(tags)
                .at(time),
        );
    }

    pub fn set_at(&self, time: SystemTime, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(
            Measurement::new(name, MetricKind::Gauge, value.to_value())
                .with_tags(tags)
                .at(time),
        );
    }

    pub fn observe_at(&self, time: SystemTime, name: &str, value: impl ToValue, tags: &[Tag]) {
        self.record(
            Measurement::new(name, MetricKind::Histogram, value.to_value())
                .with_tags(tags)
                .at(time),
        );
    }

    /// Current state of every series, with prefix and engine tags applied.
    /// Sorted by name, then tags.
    pub fn snapshot(&self) -> Vec<Measure> {
        let mut measures: Vec<Measure> = self
            .series
            .iter()
            .map(|entry| {
                let key = entry.key();
                let s = entry.value();
                Measure {
                    name: self.full_name(&key.name),
                    tags: tag::merge(&self.tags, &key.tags),
                    aggregate: s.aggregate,
                    timestamp_ms: s.timestamp_ms,
                }
            })
            .collect();
        measures.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.tags.cmp(&b.tags)));
        measures
    }

    /// Push the current state to the sink. No sink or no series is a no-op.
    pub fn flush(&self) -> Result<()> {
        let Some(sink) = self.sink.read().clone() else {
            return Ok(());
        };
        let measures = self.snapshot();
        if measures.is_empty() {
            return Ok(());
        }
        tracing::trace!(prefix = %self.prefix, series = measures.len(), "flushing engine");
        sink.handle_measures(SystemTime::now(), &measures)
    }

    /// Derive an engine with the same prefix, `tags` merged over the current
    /// set, and a copy of every accumulated series. The result has no sink.
    pub fn with_tags(&self, tags: &[Tag]) -> Engine {
        let series = DashMap::with_capacity(self.series.len());
        for entry in self.series.iter() {
            series.insert(entry.key().clone(), entry.value().clone());
        }
        Engine {
            prefix: self.prefix.clone(),
            tags: tag::merge(&self.tags, tags),
            series,
            sink: RwLock::new(None),
        }
    }

    fn full_name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new("", &[])
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("prefix", &self.prefix)
            .field("tags", &self.tags)
            .field("series", &self.series.len())
            .field("has_sink", &self.has_sink())
            .finish()
    }
}

//! Measurement events and flushed aggregates.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::tag::Tag;

/// Instrument kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    /// Name used in `# TYPE` lines.
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single recorded event. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: Vec<Tag>,
    pub time: Option<SystemTime>,
}

impl Measurement {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            tags: Vec::new(),
            time: None,
        }
    }

    pub fn with_tags(mut self, tags: &[Tag]) -> Self {
        self.tags = tags.to_vec();
        self
    }

    pub fn at(mut self, time: SystemTime) -> Self {
        self.time = Some(time);
        self
    }
}

/// Accumulated state of one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// Running sum.
    Counter(f64),
    /// Last value set.
    Gauge(f64),
    Histogram { count: u64, sum: f64 },
}

impl Aggregate {
    /// Initial aggregate for a first observation.
    pub fn start(kind: MetricKind, value: f64) -> Self {
        match kind {
            MetricKind::Counter => Aggregate::Counter(value),
            MetricKind::Gauge => Aggregate::Gauge(value),
            MetricKind::Histogram => Aggregate::Histogram { count: 1, sum: value },
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Aggregate::Counter(_) => MetricKind::Counter,
            Aggregate::Gauge(_) => MetricKind::Gauge,
            Aggregate::Histogram { .. } => MetricKind::Histogram,
        }
    }

    /// Fold one more observation in. A kind mismatch restarts the series.
    pub fn apply(&mut self, kind: MetricKind, value: f64) {
        match (self, kind) {
            (Aggregate::Counter(total), MetricKind::Counter) => *total += value,
            (Aggregate::Gauge(last), MetricKind::Gauge) => *last = value,
            (Aggregate::Histogram { count, sum }, MetricKind::Histogram) => {
                *count += 1;
                *sum += value;
            }
            (agg, kind) => *agg = Aggregate::start(kind, value),
        }
    }
}

/// One series as pushed to a sink on flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Measure {
    /// Full dotted name, engine prefix included.
    pub name: String,
    /// Normalised tag set (engine tags overlaid with call-site tags).
    pub tags: Vec<Tag>,
    pub aggregate: Aggregate,
    /// Latest recorded timestamp, milliseconds since the Unix epoch.
    pub timestamp_ms: Option<i64>,
}

impl Measure {
    pub fn kind(&self) -> MetricKind {
        self.aggregate.kind()
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ {}({}", self.name, self.kind())?;
        match self.aggregate {
            Aggregate::Counter(v) | Aggregate::Gauge(v) => write!(f, "={v}")?,
            Aggregate::Histogram { count, sum } => write!(f, ":count={count}:sum={sum}")?,
        }
        let tags: Vec<String> = self.tags.iter().map(|t| t.to_string()).collect();
        write!(f, ") [{}] }}", tags.join(" "))
    }
}

/// Values accepted by gauges and histograms.
pub trait ToValue {
    fn to_value(self) -> f64;
}

impl ToValue for bool {
    fn to_value(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
}

impl ToValue for Duration {
    /// Seconds.
    fn to_value(self) -> f64 {
        self.as_secs_f64()
    }
}

macro_rules! impl_to_value {
    ($($t:ty),*) => {
        $(impl ToValue for $t {
            fn to_value(self) -> f64 {
                self as f64
            }
        })*
    };
}

impl_to_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64);

/// Milliseconds since the Unix epoch; negative for earlier times.
pub fn unix_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

//! promstat core: measurement primitives, the aggregation engine, and the
//! Prometheus exposition handler.
//!
//! This crate carries no transport or runtime dependencies. The server crate
//! drives flushing and serves the rendered buffer over HTTP.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! Fallible paths surface as `StatsError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod engine;
pub mod error;
pub mod exposition;
pub mod measure;
pub mod tag;

pub use engine::Engine;
pub use error::{Result, StatsError};
pub use exposition::{Exposition, MeasureSink, PrometheusHandler, DEFAULT_METRIC_TIMEOUT};
pub use measure::{Aggregate, Measure, Measurement, MetricKind, ToValue};
pub use tag::{tag, Tag};

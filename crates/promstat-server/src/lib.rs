//! promstat server library entry.
//!
//! Wires the route table, the metrics server (listener + flush loop), and the
//! re-taggable `Metrics` facade. Consumed by the binary (`main.rs`) and by
//! integration tests.

pub mod config;
pub mod method;
pub mod metrics;
pub mod obs;
pub mod router;
pub mod server;

pub use method::HttpMethod;
pub use metrics::Metrics;
pub use router::{endpoint, middleware, MiddlewareEntry, RouteEntry, RouteGroup, RouteTable};
pub use server::{Server, ServerSettings, DEFAULT_FLUSH_DURATION, METRICS_PATH};

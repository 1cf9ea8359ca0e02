//! Logging setup and request logging middleware.
//!
//! The subscriber is installed once by the binary; library code only emits
//! `tracing` events.

use std::time::Instant;

use axum::{extract::Request, middleware::Next};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogFormat;
use crate::router::{middleware, Middleware};

/// Install the global subscriber. Filter comes from `RUST_LOG`, default `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter);
    let res = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = res {
        // A subscriber is already installed (tests, embedding apps).
        tracing::debug!(error = %e, "tracing subscriber not installed");
    }
}

/// Logs method, path, status and latency for every request.
pub fn request_logger() -> Middleware {
    middleware(|req: Request, next: Next| async move {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let started = Instant::now();
        let resp = next.run(req).await;
        tracing::info!(
            %method,
            %path,
            status = resp.status().as_u16(),
            latency_us = started.elapsed().as_micros() as u64,
            "request"
        );
        resp
    })
}

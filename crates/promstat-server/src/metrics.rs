//! Long-lived metrics handle with runtime re-tagging.
//!
//! The facade publishes one `(engine, server)` pair at a time. Every change of
//! that pair (re-tagging, rebuilding a closed server) runs under a single swap
//! lock and follows the same order: stop the old server's flush loop, build the
//! replacement seeded from the old engine's state, publish both together.
//! Exactly one flush loop is therefore alive per engine, and readers never see
//! an engine paired with another engine's server.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tokio::sync::Mutex;

use promstat_core::error::Result;
use promstat_core::{Engine, PrometheusHandler, Tag};

use crate::config::MetricsConfig;
use crate::server::{Server, ServerSettings};

#[derive(Clone)]
struct Slot {
    engine: Arc<Engine>,
    server: Arc<Server>,
}

pub struct Metrics {
    config: MetricsConfig,
    handler: Arc<PrometheusHandler>,
    slot: RwLock<Slot>,
    swap: Mutex<()>,
}

impl Metrics {
    /// Engine built from the config's prefix and tags. Needs a Tokio runtime.
    pub fn new(config: MetricsConfig, handler: Arc<PrometheusHandler>) -> Self {
        let engine = Arc::new(Engine::new(config.prefix.clone(), &config.tag_list()));
        Self::with_engine(config, handler, engine)
    }

    /// Fresh handler expiring series after the config's metric timeout.
    pub fn from_config(config: MetricsConfig) -> Self {
        let handler = Arc::new(PrometheusHandler::with_timeout(config.metric_timeout()));
        Self::new(config, handler)
    }

    pub fn with_engine(config: MetricsConfig, handler: Arc<PrometheusHandler>, engine: Arc<Engine>) -> Self {
        let server = Arc::new(build_server(&config, &handler, &engine));
        Self {
            config,
            handler,
            slot: RwLock::new(Slot { engine, server }),
            swap: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<PrometheusHandler> {
        &self.handler
    }

    /// Current engine. Re-fetch after `with_tags`; a held handle goes stale.
    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.slot.read().engine)
    }

    pub fn server(&self) -> Arc<Server> {
        Arc::clone(&self.slot.read().server)
    }

    /// Replace the engine with one carrying `tags` merged over the current set.
    ///
    /// Accumulated series carry over. If the facade is serving, `run` moves
    /// on to the replacement server.
    pub async fn with_tags(&self, tags: &[Tag]) -> Result<()> {
        let _guard = self.swap.lock().await;
        let old = self.slot.read().clone();

        old.server.close().await?;
        let engine = Arc::new(old.engine.with_tags(tags));
        old.engine.clear_sink();
        let server = Arc::new(build_server(&self.config, &self.handler, &engine));

        tracing::info!(prefix = %engine.prefix(), tags = engine.tags().len(), "metrics engine re-tagged");
        *self.slot.write() = Slot { engine, server };
        Ok(())
    }

    /// Serve `/metrics` until `close`. Surfaces bind failures.
    pub async fn run(&self) -> Result<()> {
        let mut server = {
            let _guard = self.swap.lock().await;
            self.live_server()
        };
        self.startup_stats();

        loop {
            server.run().await?;

            let _guard = self.swap.lock().await;
            let current = self.server();
            if Arc::ptr_eq(&current, &server) {
                return Ok(());
            }
            tracing::info!(port = current.port(), "serving replacement metrics server");
            server = current;
        }
    }

    pub async fn close(&self) -> Result<()> {
        let _guard = self.swap.lock().await;
        self.server().close().await
    }

    /// Force a flush of the current engine outside the periodic loop.
    pub fn flush(&self) -> Result<()> {
        self.engine().flush()
    }

    /// Current server, rebuilt on the same engine when it has been closed.
    /// Callers hold the swap lock.
    fn live_server(&self) -> Arc<Server> {
        let mut slot = self.slot.write();
        if slot.server.is_closed() {
            tracing::debug!(port = self.config.port, "rebuilding closed metrics server");
            let server = Arc::new(build_server(&self.config, &self.handler, &slot.engine));
            slot.server = server;
        }
        Arc::clone(&slot.server)
    }

    fn startup_stats(&self) {
        let engine = self.engine();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        engine.set("start.time", now, &[]);
        if let Err(e) = engine.flush() {
            tracing::warn!(error = %e, "startup flush failed");
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("config", &self.config)
            .field("server", &self.server())
            .finish()
    }
}

fn build_server(config: &MetricsConfig, handler: &Arc<PrometheusHandler>, engine: &Arc<Engine>) -> Server {
    Server::with_settings(
        ServerSettings::from_config(config),
        Arc::clone(handler),
        Arc::clone(engine),
    )
}

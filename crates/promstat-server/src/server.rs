//! Metrics server: the `/metrics` listener plus the background flush loop.
//!
//! Lifecycle:
//! - construction binds the handler as the engine's sink, builds the router
//!   and spawns the flush loop (no network access yet)
//! - `run`/`serve` accept scrapes until `close`
//! - `close` flips a one-shot shutdown flag seen by both the listener and the
//!   flush loop, then waits for the loop to exit

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::Request, http::header, Router};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use promstat_core::error::{Result, StatsError};
use promstat_core::{Engine, Exposition};

use crate::config::{MetricsConfig, RouterMode, schema::DEFAULT_STATS_PORT};
use crate::method::HttpMethod;
use crate::obs;
use crate::router::{endpoint, MiddlewareEntry, RouteEntry, RouteTable};

pub const DEFAULT_FLUSH_DURATION: Duration = Duration::from_millis(500);
pub const METRICS_PATH: &str = "/metrics";

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub flush_every: Duration,
    pub mode: RouterMode,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_STATS_PORT,
            flush_every: DEFAULT_FLUSH_DURATION,
            mode: RouterMode::Debug,
        }
    }
}

impl ServerSettings {
    pub fn from_config(cfg: &MetricsConfig) -> Self {
        Self {
            port: cfg.port,
            flush_every: cfg.flush_every(),
            mode: cfg.mode,
        }
    }
}

/// `/metrics` for every verb, rendering the handler's buffer.
pub fn stats_route(handler: Arc<dyn Exposition>) -> RouteEntry {
    RouteEntry::new(
        HttpMethod::Any,
        METRICS_PATH,
        endpoint(move |_req: Request| {
            let body = handler.render();
            let content_type = handler.content_type();
            async move { ([(header::CONTENT_TYPE, content_type)], body) }
        }),
    )
}

fn build_router(mode: RouterMode, handler: Arc<dyn Exposition>) -> Router {
    let mut table = RouteTable::new();
    if mode == RouterMode::Debug {
        table = table.middleware(MiddlewareEntry::global(vec![obs::request_logger()]));
    }
    table.route(stats_route(handler)).build()
}

pub struct Server {
    settings: ServerSettings,
    engine: Arc<Engine>,
    handler: Arc<dyn Exposition>,
    router: Router,
    shutdown: watch::Sender<bool>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    /// Server on `port` with the default flush interval.
    /// Must be called from within a Tokio runtime.
    pub fn new<H: Exposition + 'static>(port: u16, handler: Arc<H>, engine: Arc<Engine>) -> Self {
        Self::with_settings(
            ServerSettings {
                port,
                ..ServerSettings::default()
            },
            handler,
            engine,
        )
    }

    pub fn with_settings<H: Exposition + 'static>(
        settings: ServerSettings,
        handler: Arc<H>,
        engine: Arc<Engine>,
    ) -> Self {
        engine.set_sink(handler.clone());
        let handler: Arc<dyn Exposition> = handler;
        let router = build_router(settings.mode, Arc::clone(&handler));

        let (shutdown, stop_rx) = watch::channel(false);
        let task = spawn_flush_loop(Arc::clone(&engine), settings.flush_every, stop_rx);

        Self {
            settings,
            engine,
            handler,
            router,
            shutdown,
            flush_task: Mutex::new(Some(task)),
        }
    }

    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub fn flush_every(&self) -> Duration {
        self.settings.flush_every
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn handler(&self) -> &Arc<dyn Exposition> {
        &self.handler
    }

    /// The servable router, for in-process dispatch.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Push the engine's state to the handler now.
    pub fn flush(&self) -> Result<()> {
        self.engine.flush()
    }

    /// Bind `0.0.0.0:port` and serve until `close`. Bind failures are returned as-is.
    pub async fn run(&self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.settings.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| StatsError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until `close`.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        if self.is_closed() {
            tracing::debug!(port = self.settings.port, "server already closed; not serving");
            return Ok(());
        }
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "metrics server listening");

        let mut stop = self.shutdown.subscribe();
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move {
                let _ = stop.wait_for(|closed| *closed).await;
            })
            .await
            .map_err(|e| StatsError::Serve(e.to_string()))?;

        tracing::info!(addr = ?local, "metrics server stopped");
        Ok(())
    }

    /// Stop the flush loop and the listener. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let was_closed = self.shutdown.send_replace(true);
        let task = self.flush_task.lock().take();
        match task {
            Some(task) => {
                if let Err(e) = task.await {
                    tracing::warn!(error = %e, "flush loop ended abnormally");
                }
                tracing::debug!(port = self.settings.port, "flush loop stopped");
            }
            None if was_closed => tracing::debug!(port = self.settings.port, "close on closed server"),
            None => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("settings", &self.settings)
            .field("engine", &self.engine)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn spawn_flush_loop(engine: Arc<Engine>, every: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    // interval panics on a zero period
    let every = every.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut tick = time::interval_at(Instant::now() + every, every);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = engine.flush() {
                        tracing::warn!(error = %e, prefix = %engine.prefix(), "flush failed");
                    }
                }
                changed = stop.changed() => {
                    // Sender gone: the server was dropped without close.
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }
        }
        tracing::debug!(prefix = %engine.prefix(), "flush loop exited");
    })
}

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::{Method, StatusCode};
use tokio::net::TcpListener;
use tokio::time::timeout;

use promstat_core::{tag, Engine, Exposition, Measure, MeasureSink, PrometheusHandler, StatsError};
use promstat_server::config::RouterMode;
use promstat_server::{Server, ServerSettings};

use common::{call, free_port, scrape, scrape_until, wait_refused};

fn settings(flush_every: Duration) -> ServerSettings {
    ServerSettings {
        port: 0,
        flush_every,
        mode: RouterMode::Release,
    }
}

fn setup(prefix: &str, flush_every: Duration) -> (Arc<Server>, Arc<Engine>, Arc<PrometheusHandler>) {
    let handler = Arc::new(PrometheusHandler::new());
    let engine = Arc::new(Engine::new(prefix, &[]));
    let server = Arc::new(Server::with_settings(settings(flush_every), handler.clone(), engine.clone()));
    (server, engine, handler)
}

async fn serve_local(server: &Arc<Server>) -> (u16, tokio::task::JoinHandle<promstat_core::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let s = Arc::clone(server);
    let task = tokio::spawn(async move { s.serve(listener).await });
    (port, task)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scrape_shows_prefixed_counters() {
    let (server, eng, _h) = setup("test_stats", Duration::from_secs(3600));
    let (port, task) = serve_local(&server).await;

    eng.incr("test.counter.A", &[]);
    eng.incr("test.tagged.B", &[tag("val1", "testB")]);
    server.flush().unwrap();

    let body = scrape_until(port, |b| !b.is_empty()).await;
    assert!(body.contains("# TYPE test_stats_test_counter_A counter\ntest_stats_test_counter_A 1\n"));
    assert!(body.contains("# TYPE test_stats_test_tagged_B counter\ntest_stats_test_tagged_B{val1=\"testB\"} 1\n"));

    server.close().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn flush_loop_publishes_without_manual_flush() {
    let (server, eng, _h) = setup("", Duration::from_millis(20));
    let (port, task) = serve_local(&server).await;

    eng.set("flag", false, &[]);
    eng.set("flag", true, &[]);

    let body = scrape_until(port, |b| b.contains("flag")).await;
    assert_eq!(body, "# TYPE flag gauge\nflag 1\n");

    server.close().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn metrics_route_accepts_any_verb() {
    let (server, eng, _h) = setup("", Duration::from_secs(3600));
    eng.add("bytes", 42, &[]);
    server.flush().unwrap();

    let mut bodies = Vec::new();
    for m in [Method::GET, Method::POST, Method::PUT] {
        let (status, body) = call(server.router(), m, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        bodies.push(body);
    }
    assert_eq!(bodies[0], "# TYPE bytes counter\nbytes 42\n");
    assert!(bodies.iter().all(|b| *b == bodies[0]));

    server.close().await.unwrap();
}

#[tokio::test]
async fn close_before_first_tick_does_not_hang() {
    let (server, eng, h) = setup("", Duration::from_secs(3600));
    eng.incr("never.flushed", &[]);

    timeout(Duration::from_secs(2), server.close()).await.expect("close hung").unwrap();
    assert!(server.is_closed());
    // No final flush on exit.
    assert!(h.is_empty());
}

#[tokio::test]
async fn double_close_is_idempotent() {
    let (server, _eng, _h) = setup("", Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(30)).await;

    timeout(Duration::from_secs(2), server.close()).await.expect("first close hung").unwrap();
    timeout(Duration::from_secs(2), server.close()).await.expect("second close hung").unwrap();
}

#[tokio::test]
async fn closed_server_stops_flushing() {
    let (server, eng, h) = setup("", Duration::from_millis(10));
    server.close().await.unwrap();

    eng.incr("late", &[]);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(h.is_empty());

    // A forced flush still works on demand.
    server.flush().unwrap();
    assert_eq!(h.render(), "# TYPE late counter\nlate 1\n");
}

struct Flaky {
    calls: AtomicUsize,
}

impl MeasureSink for Flaky {
    fn handle_measures(&self, _time: SystemTime, _measures: &[Measure]) -> promstat_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StatsError::Sink("buffer unavailable".into()))
    }
}

impl Exposition for Flaky {
    fn render(&self) -> String {
        String::new()
    }
}

#[tokio::test]
async fn flush_failures_do_not_stop_the_loop() {
    let sink = Arc::new(Flaky { calls: AtomicUsize::new(0) });
    let engine = Arc::new(Engine::new("", &[]));
    engine.incr("x", &[]);
    let server = Server::with_settings(settings(Duration::from_millis(10)), sink.clone(), engine);

    for _ in 0..100 {
        if sink.calls.load(Ordering::SeqCst) >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sink.calls.load(Ordering::SeqCst) >= 3);
    server.close().await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_returned_and_close_still_works() {
    let blocker = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let handler = Arc::new(PrometheusHandler::new());
    let engine = Arc::new(Engine::new("", &[]));
    let server = Server::new(port, handler, engine);

    let err = server.run().await.expect_err("port is taken");
    assert!(matches!(err, StatsError::Bind { .. }));
    assert!(err.is_transport());

    timeout(Duration::from_secs(2), server.close()).await.expect("close hung").unwrap();
    drop(blocker);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scrape_after_close_is_a_connection_error() {
    let port = free_port();
    let handler = Arc::new(PrometheusHandler::new());
    let engine = Arc::new(Engine::new("", &[]));
    let server = Arc::new(Server::with_settings(
        ServerSettings {
            port,
            flush_every: Duration::from_millis(20),
            mode: RouterMode::Debug,
        },
        handler,
        engine.clone(),
    ));
    let task = tokio::spawn({
        let s = Arc::clone(&server);
        async move { s.run().await }
    });

    engine.incr("up", &[]);
    scrape_until(port, |b| b.contains("up 1")).await;

    server.close().await.unwrap();
    task.await.unwrap().unwrap();
    wait_refused(port).await;
    assert!(scrape(port).await.is_err());
}

#[tokio::test]
async fn serve_after_close_returns_immediately() {
    let (server, _eng, _h) = setup("", Duration::from_secs(3600));
    server.close().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    timeout(Duration::from_secs(2), server.serve(listener))
        .await
        .expect("serve hung")
        .unwrap();
}

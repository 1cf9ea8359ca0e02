//! promstat server binary.
//!
//! - Loads `promstat.yaml` style config (path as first argument, defaults otherwise)
//! - Installs the tracing subscriber
//! - Serves `/metrics` until Ctrl-C, then closes the flush loop

use std::process::ExitCode;

use promstat_core::error::Result;
use promstat_server::{config, obs, Metrics};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match std::env::args().nth(1) {
        Some(path) => config::load_from_file(&path),
        None => Ok(config::MetricsConfig::default()),
    };
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("promstat-server: {e}");
            return ExitCode::FAILURE;
        }
    };
    obs::init_tracing(cfg.log.format);

    match serve(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "promstat-server failed");
            ExitCode::FAILURE
        }
    }
}

async fn serve(cfg: config::MetricsConfig) -> Result<()> {
    tracing::info!(port = cfg.port, prefix = %cfg.prefix, "promstat-server starting");
    let metrics = Metrics::from_config(cfg);

    tokio::select! {
        res = metrics.run() => res?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown requested"),
    }

    metrics.flush()?;
    metrics.close().await
}

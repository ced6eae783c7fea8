//! Call-center pipeline binary entrypoint.
//! Loads config, starts the background scheduler, and serves the read API.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use call_center_pipeline::config::PipelineConfig;
use call_center_pipeline::ingest::scheduler::Scheduler;
use call_center_pipeline::metrics::Metrics;
use call_center_pipeline::{api, build_pipeline};

/// `LOG_FORMAT=json` switches to JSON lines; compact text otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("call_center_pipeline=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Bad config is the one fatal path: refuse to serve a broken pipeline.
    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let metrics = Metrics::init().context("installing metrics recorder")?;

    let pipeline = build_pipeline(&cfg).await.context("building pipeline")?;
    let scheduler = Scheduler::new(Arc::new(pipeline));

    let (stop_tx, stop_rx) = watch::channel(false);
    let ticker = scheduler.clone().spawn(cfg.interval(), stop_rx);

    let app = api::router(api::AppState::new(scheduler)).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;
    tracing::info!(addr = %cfg.listen_addr, table = %cfg.table, "serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    let _ = stop_tx.send(true);
    ticker.await.context("scheduler task")?;
    Ok(())
}

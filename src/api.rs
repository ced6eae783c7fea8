//! HTTP read path for the dashboard.
//!
//! Handlers only read the published [`SnapshotHandle`] or poke the
//! scheduler; none of them waits on a running cycle.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tower_http::cors::CorsLayer;

use crate::aggregate::AggregateSnapshot;
use crate::ingest::scheduler::{Scheduler, SchedulerState, TriggerOutcome};
use crate::ingest::SourceReport;
use crate::pipeline::SnapshotHandle;

#[derive(Clone)]
pub struct AppState {
    pub snapshots: SnapshotHandle,
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            snapshots: scheduler.pipeline().snapshots(),
            scheduler,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/snapshot", get(snapshot))
        .route("/status", get(status))
        .route("/refresh", post(refresh))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct SnapshotOut {
    as_of: Option<DateTime<Utc>>,
    snapshot: Option<AggregateSnapshot>,
}

async fn snapshot(State(state): State<AppState>) -> Json<SnapshotOut> {
    let latest = state.snapshots.latest();
    Json(SnapshotOut {
        as_of: latest.as_ref().map(|r| r.finished_at),
        snapshot: latest.map(|r| r.snapshot.clone()),
    })
}

#[derive(serde::Serialize)]
struct CycleOut {
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    sources: Vec<SourceReport>,
    kept: usize,
    rejected: BTreeMap<&'static str, usize>,
    persisted: bool,
    persist_error: Option<String>,
}

#[derive(serde::Serialize)]
struct StatusOut {
    scheduler: SchedulerState,
    table: String,
    last_cycle: Option<CycleOut>,
}

async fn status(State(state): State<AppState>) -> Json<StatusOut> {
    let last_cycle = state.snapshots.latest().map(|r| CycleOut {
        started_at: r.started_at,
        finished_at: r.finished_at,
        sources: r.sources.clone(),
        kept: r.kept,
        rejected: r.rejected.clone(),
        persisted: r.persisted,
        persist_error: r.persist_error.clone(),
    });
    Json(StatusOut {
        scheduler: state.scheduler.state(),
        table: state.scheduler.pipeline().table().to_string(),
        last_cycle,
    })
}

#[derive(serde::Serialize)]
struct RefreshOut {
    outcome: TriggerOutcome,
}

async fn refresh(State(state): State<AppState>) -> (StatusCode, Json<RefreshOut>) {
    let outcome = state.scheduler.trigger();
    let code = match outcome {
        TriggerOutcome::Started => StatusCode::ACCEPTED,
        TriggerOutcome::Skipped => StatusCode::CONFLICT,
        TriggerOutcome::Stopped => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(RefreshOut { outcome }))
}

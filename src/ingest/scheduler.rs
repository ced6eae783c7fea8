// src/ingest/scheduler.rs
//! Fixed-interval driver for [`Pipeline::run_cycle`].
//!
//! Two states: `Idle` and `Running`. A trigger that lands while a cycle is
//! running is dropped and logged, so at most one cycle is ever in flight per
//! scheduler. The ticker runs in its own task and each cycle in another, so
//! neither blocks the HTTP read path.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running { since: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started,
    /// A cycle was already running.
    Skipped,
    /// Shutdown has begun; no new cycles.
    Stopped,
}

struct Inner {
    state: SchedulerState,
    in_flight: Option<JoinHandle<()>>,
    stopped: bool,
}

#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    inner: Arc<Mutex<Inner>>,
}

/// Flips the state back to `Idle` when the cycle task ends, panics included.
struct RunningGuard {
    inner: Arc<Mutex<Inner>>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        lock(&self.inner).state = SchedulerState::Idle;
    }
}

fn lock(m: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            inner: Arc::new(Mutex::new(Inner {
                state: SchedulerState::Idle,
                in_flight: None,
                stopped: false,
            })),
        }
    }

    pub fn state(&self) -> SchedulerState {
        lock(&self.inner).state
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Start a cycle unless one is already running.
    pub fn trigger(&self) -> TriggerOutcome {
        let mut inner = lock(&self.inner);
        if inner.stopped {
            return TriggerOutcome::Stopped;
        }
        if let SchedulerState::Running { since } = inner.state {
            counter!("pipeline_ticks_skipped_total").increment(1);
            tracing::info!(target: "scheduler", %since, "cycle still running; trigger skipped");
            return TriggerOutcome::Skipped;
        }

        inner.state = SchedulerState::Running { since: Utc::now() };
        // Guard lives inside the task body: dropping the unpolled future
        // (runtime shutting down) must not touch `inner`, which is locked here.
        let state = Arc::clone(&self.inner);
        let pipeline = Arc::clone(&self.pipeline);
        inner.in_flight = Some(tokio::spawn(async move {
            let _guard = RunningGuard { inner: state };
            if let Err(e) = pipeline.run_cycle().await {
                // Already logged by the pipeline; the next tick retries.
                tracing::debug!(target: "scheduler", error = %e, "cycle ended with error");
            }
        }));
        TriggerOutcome::Started
    }

    /// Wait for the in-flight cycle, if any.
    pub async fn wait_idle(&self) {
        let handle = lock(&self.inner).in_flight.take();
        if let Some(h) = handle {
            if let Err(e) = h.await {
                tracing::error!(target: "scheduler", error = %e, "cycle task panicked");
            }
        }
    }

    /// Refuse new cycles and wait for the running one to finish, so the
    /// table write is never cut off midway.
    pub async fn shutdown(&self) {
        lock(&self.inner).stopped = true;
        self.wait_idle().await;
    }

    /// Tick every `interval` (first tick immediately) until `shutdown`
    /// flips to `true` or its sender is dropped.
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(target: "scheduler", ?interval, "scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.trigger();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!(target: "scheduler", "scheduler stopping; waiting for in-flight cycle");
            self.shutdown().await;
            tracing::info!(target: "scheduler", "scheduler stopped");
        })
    }
}

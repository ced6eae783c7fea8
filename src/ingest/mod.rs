// src/ingest/mod.rs
pub mod normalize;
pub mod providers;
pub mod scheduler;
pub mod types;

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::ingest::normalize::{Normalizer, Rejection};
use crate::ingest::types::{CallRecord, RawRecord, SourceAdapter, SourceTag};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_records_fetched_total",
            "Raw records returned by a source."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Source fetches that failed (network, auth, non-2xx, malformed body)."
        );
        describe_counter!(
            "ingest_source_timeouts_total",
            "Source fetches abandoned at their deadline."
        );
        describe_counter!(
            "ingest_records_rejected_total",
            "Records that failed normalization, by reason."
        );
        describe_counter!(
            "ingest_records_kept_total",
            "Records that passed normalization."
        );
        describe_counter!(
            "ingest_malformed_items_total",
            "Non-object items inside a source response."
        );
        describe_histogram!("ingest_fetch_ms", "Source fetch time in milliseconds.");
        describe_counter!("pipeline_cycles_total", "Completed pipeline cycles.");
        describe_counter!(
            "pipeline_cycle_failures_total",
            "Cycles whose table write failed."
        );
        describe_counter!(
            "pipeline_ticks_skipped_total",
            "Triggers dropped because a cycle was already running."
        );
        describe_histogram!("pipeline_persist_ms", "Table replace time in milliseconds.");
        describe_gauge!(
            "pipeline_last_success_ts",
            "Unix ts of the last cycle whose write succeeded."
        );
    });
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FetchStatus {
    Ok,
    Failed(String),
    TimedOut,
}

/// What one source contributed to a cycle.
#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source: SourceTag,
    pub records: Vec<RawRecord>,
    pub status: FetchStatus,
    pub elapsed_ms: f64,
}

/// Fetch one source under its deadline. Never fails: errors and timeouts
/// become an empty record list plus a logged, counted status.
pub async fn fetch(adapter: &dyn SourceAdapter, default_timeout: Duration) -> SourceFetch {
    ensure_metrics_described();
    let tag = adapter.source();
    let deadline = adapter.timeout().unwrap_or(default_timeout);
    let t0 = Instant::now();

    let (records, status) = match tokio::time::timeout(deadline, adapter.fetch_latest()).await {
        Ok(Ok(v)) => (v, FetchStatus::Ok),
        Ok(Err(e)) => {
            tracing::warn!(target: "ingest", source = %tag, error = %e, "source fetch failed");
            counter!("ingest_source_errors_total", "source" => tag.as_str()).increment(1);
            (Vec::new(), FetchStatus::Failed(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(target: "ingest", source = %tag, ?deadline, "source fetch timed out");
            counter!("ingest_source_timeouts_total", "source" => tag.as_str()).increment(1);
            (Vec::new(), FetchStatus::TimedOut)
        }
    };

    let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("ingest_fetch_ms", "source" => tag.as_str()).record(elapsed_ms);
    counter!("ingest_records_fetched_total", "source" => tag.as_str()).increment(records.len() as u64);

    SourceFetch {
        source: tag,
        records,
        status,
        elapsed_ms,
    }
}

/// Fetch every source concurrently; results come back in adapter order.
pub async fn fetch_all(
    adapters: &[Arc<dyn SourceAdapter>],
    default_timeout: Duration,
) -> Vec<SourceFetch> {
    let handles: Vec<_> = adapters
        .iter()
        .map(|a| {
            let a = Arc::clone(a);
            (
                a.source(),
                tokio::spawn(async move { fetch(a.as_ref(), default_timeout).await }),
            )
        })
        .collect();

    let mut out = Vec::with_capacity(handles.len());
    for (tag, h) in handles {
        match h.await {
            Ok(f) => out.push(f),
            Err(e) => {
                // Adapter panicked; same treatment as any other source failure.
                tracing::error!(target: "ingest", source = %tag, error = %e, "source task aborted");
                counter!("ingest_source_errors_total", "source" => tag.as_str()).increment(1);
                out.push(SourceFetch {
                    source: tag,
                    records: Vec::new(),
                    status: FetchStatus::Failed(format!("task aborted: {e}")),
                    elapsed_ms: 0.0,
                });
            }
        }
    }
    out
}

/// Per-source line of a cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceTag,
    pub fetched: usize,
    pub kept: usize,
    pub rejected: usize,
    pub status: FetchStatus,
    pub elapsed_ms: f64,
}

/// Merged, normalized batch from one ingest pass.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    pub records: Vec<CallRecord>,
    pub rejections: Vec<Rejection>,
    pub sources: Vec<SourceReport>,
}

/// Fetch all sources, normalize each batch, merge. Unioning keeps
/// `(source, call_id)` unique since each source batch is deduplicated.
pub async fn run_once(
    adapters: &[Arc<dyn SourceAdapter>],
    normalizer: &Normalizer,
    default_timeout: Duration,
) -> IngestOutcome {
    let fetched = fetch_all(adapters, default_timeout).await;

    let mut outcome = IngestOutcome::default();
    for f in fetched {
        let n_fetched = f.records.len();
        let (kept, rejected) = normalizer.normalize_batch(f.records, f.source);

        for r in &rejected {
            tracing::debug!(
                target: "ingest",
                source = %r.source,
                reason = %r.reason,
                "record rejected"
            );
            counter!("ingest_records_rejected_total", "reason" => r.reason.label()).increment(1);
        }
        counter!("ingest_records_kept_total").increment(kept.len() as u64);

        outcome.sources.push(SourceReport {
            source: f.source,
            fetched: n_fetched,
            kept: kept.len(),
            rejected: rejected.len(),
            status: f.status,
            elapsed_ms: f.elapsed_ms,
        });
        outcome.records.extend(kept);
        outcome.rejections.extend(rejected);
    }

    if !outcome.rejections.is_empty() {
        tracing::warn!(
            target: "ingest",
            rejected = outcome.rejections.len(),
            kept = outcome.records.len(),
            "records rejected during normalization"
        );
    }
    outcome
}

// src/pipeline.rs
//! One fetch → normalize → aggregate → persist cycle, plus the shared handle
//! the read path uses to get the latest snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::aggregate::{aggregate, feedback_label_variants, AggregateSnapshot};
use crate::error::{PipelineError, Result};
use crate::ingest::normalize::{tally_rejections, Normalizer};
use crate::ingest::types::{CallRecord, SourceAdapter};
use crate::ingest::{self, SourceReport};
use crate::storage::{validate_table_name, PersistenceGateway, TableLocks};

/// Summary of one finished cycle. The snapshot is computed from the records
/// fetched in this cycle, whether or not the table write succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub kept: usize,
    pub rejected: BTreeMap<&'static str, usize>,
    pub persisted: bool,
    pub persist_error: Option<String>,
    pub snapshot: AggregateSnapshot,
}

impl CycleReport {
    pub fn total_rejected(&self) -> usize {
        self.rejected.values().sum()
    }
}

/// Latest published cycle, shared read-only with the HTTP layer.
#[derive(Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Option<Arc<CycleReport>>>>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: CycleReport) {
        let report = Arc::new(report);
        match self.inner.write() {
            Ok(mut g) => *g = Some(report),
            Err(poison) => *poison.into_inner() = Some(report),
        }
    }

    pub fn latest(&self) -> Option<Arc<CycleReport>> {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn latest_snapshot(&self) -> Option<AggregateSnapshot> {
        self.latest().map(|r| r.snapshot.clone())
    }
}

pub struct Pipeline {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    normalizer: Normalizer,
    gateway: Arc<dyn PersistenceGateway>,
    table: String,
    fetch_timeout: Duration,
    locks: Arc<TableLocks>,
    snapshots: SnapshotHandle,
}

impl Pipeline {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        gateway: Arc<dyn PersistenceGateway>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        if adapters.is_empty() {
            return Err(PipelineError::Configuration("pipeline has no sources".into()));
        }
        Ok(Self {
            adapters,
            normalizer: Normalizer::new(),
            gateway,
            table,
            fetch_timeout: Duration::from_secs(10),
            locks: Arc::new(TableLocks::new()),
            snapshots: SnapshotHandle::new(),
        })
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Share write locks with other pipelines targeting the same store.
    pub fn with_table_locks(mut self, locks: Arc<TableLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Run one cycle. Source and record problems are absorbed into the
    /// report; only a failed table write comes back as an error, after the
    /// snapshot has been published.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        ingest::ensure_metrics_described();
        let started_at = Utc::now();

        let outcome = ingest::run_once(&self.adapters, &self.normalizer, self.fetch_timeout).await;
        let snapshot = aggregate(&outcome.records);

        for group in feedback_label_variants(&snapshot) {
            tracing::warn!(
                target: "pipeline",
                labels = ?group,
                "feedback labels differ only by case/whitespace; kept as separate buckets"
            );
        }

        let persisted = self.persist(&outcome.records).await;

        let report = CycleReport {
            started_at,
            finished_at: Utc::now(),
            sources: outcome.sources,
            kept: outcome.records.len(),
            rejected: tally_rejections(&outcome.rejections),
            persisted: persisted.is_ok(),
            persist_error: persisted.as_ref().err().map(|e| e.to_string()),
            snapshot,
        };
        self.snapshots.publish(report.clone());
        counter!("pipeline_cycles_total").increment(1);

        match persisted {
            Ok(()) => {
                gauge!("pipeline_last_success_ts").set(report.finished_at.timestamp() as f64);
                tracing::info!(
                    target: "pipeline",
                    table = %self.table,
                    kept = report.kept,
                    rejected = report.total_rejected(),
                    average_duration = ?report.snapshot.average_duration,
                    "cycle complete"
                );
                Ok(report)
            }
            Err(e) => {
                counter!("pipeline_cycle_failures_total").increment(1);
                tracing::error!(target: "pipeline", table = %self.table, error = %e, "cycle failed; prior table kept");
                Err(e)
            }
        }
    }

    async fn persist(&self, records: &[CallRecord]) -> Result<()> {
        let lock = self.locks.lock_for(&self.table);
        let _guard = lock.lock().await;

        let t0 = Instant::now();
        let res = self.gateway.replace(&self.table, records).await;
        histogram!("pipeline_persist_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res
    }
}

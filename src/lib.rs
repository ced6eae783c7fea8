// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod storage;

use std::sync::Arc;

// ---- Re-exports for stable public API ----
pub use crate::aggregate::{aggregate, AggregateSnapshot};
pub use crate::api::router;
pub use crate::error::{PipelineError, Result};
pub use crate::ingest::types::{CallRecord, SourceAdapter, SourceTag};
pub use crate::pipeline::{CycleReport, Pipeline, SnapshotHandle};

use crate::config::PipelineConfig;
use crate::ingest::providers::{SheetProvider, TelephonyProvider};
use crate::storage::{PersistenceGateway, SqliteGateway};

/// One adapter per configured source.
pub fn build_adapters(cfg: &PipelineConfig) -> Result<Vec<Arc<dyn SourceAdapter>>> {
    let s = &cfg.sources;
    let mut out: Vec<Arc<dyn SourceAdapter>> = Vec::new();
    if let Some(a) = &s.telephony_a {
        out.push(Arc::new(TelephonyProvider::from_config(SourceTag::TelephonyA, a)?));
    }
    if let Some(b) = &s.telephony_b {
        out.push(Arc::new(TelephonyProvider::from_config(SourceTag::TelephonyB, b)?));
    }
    if let Some(f) = &s.form_sheet {
        out.push(Arc::new(SheetProvider::from_config(f)?));
    }
    Ok(out)
}

/// Adapters + SQLite gateway + field maps, wired from config.
pub async fn build_pipeline(cfg: &PipelineConfig) -> Result<Pipeline> {
    let gateway: Arc<dyn PersistenceGateway> =
        Arc::new(SqliteGateway::connect(&cfg.database_url).await?);
    let pipeline = Pipeline::new(build_adapters(cfg)?, gateway, cfg.table.clone())?
        .with_normalizer(cfg.normalizer())
        .with_fetch_timeout(cfg.fetch_timeout());
    Ok(pipeline)
}

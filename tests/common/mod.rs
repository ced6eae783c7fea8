// tests/common/mod.rs
//
// Shared fakes for integration tests: fixed/slow/failing adapters and a
// gateway that records whether two writes ever overlapped.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};

use call_center_pipeline::error::{PipelineError, Result};
use call_center_pipeline::ingest::types::RawRecord;
use call_center_pipeline::storage::PersistenceGateway;
use call_center_pipeline::{CallRecord, SourceAdapter, SourceTag};

pub fn raw(v: Value) -> RawRecord {
    match v {
        Value::Object(m) => m,
        other => panic!("fixture must be an object, got {other}"),
    }
}

pub fn call(source: SourceTag, id: &str, agent: Option<&str>, minutes: f64, fb: Option<&str>) -> CallRecord {
    CallRecord {
        source,
        call_id: id.to_string(),
        agent_name: agent.map(str::to_string),
        call_duration: minutes,
        call_date: Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap(),
        customer_feedback: fb.map(str::to_string),
    }
}

/// Returns the same records every fetch, optionally after a delay.
pub struct StaticAdapter {
    pub tag: SourceTag,
    pub records: Vec<RawRecord>,
    pub delay: Duration,
    pub fetches: AtomicUsize,
}

impl StaticAdapter {
    pub fn new(tag: SourceTag, records: Vec<RawRecord>) -> Self {
        Self {
            tag,
            records,
            delay: Duration::ZERO,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn one_call(tag: SourceTag) -> Self {
        Self::new(
            tag,
            vec![raw(json!({
                "id": "c1", "agent": "Jo", "duration": 4, "date": "2024-01-01", "feedback": "Good"
            }))],
        )
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.records.clone())
    }

    fn source(&self) -> SourceTag {
        self.tag
    }
}

/// Always unreachable.
pub struct DownAdapter(pub SourceTag);

#[async_trait]
impl SourceAdapter for DownAdapter {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        Err(PipelineError::source_unavailable(self.0, "connection refused"))
    }

    fn source(&self) -> SourceTag {
        self.0
    }
}

/// In-memory gateway that flags any overlapping `replace` calls.
#[derive(Default)]
pub struct RecordingGateway {
    pub write_delay: Duration,
    pub fail_writes: bool,
    active: AtomicBool,
    overlapped: AtomicBool,
    writes: AtomicUsize,
    tables: Mutex<std::collections::HashMap<String, Vec<CallRecord>>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PersistenceGateway for RecordingGateway {
    async fn replace(&self, table: &str, records: &[CallRecord]) -> Result<()> {
        if self.active.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        let res = if self.fail_writes {
            Err(PipelineError::persistence(table, "disk full"))
        } else {
            self.tables
                .lock()
                .unwrap()
                .insert(table.to_string(), records.to_vec());
            Ok(())
        };
        self.active.store(false, Ordering::SeqCst);
        res
    }

    async fn load(&self, table: &str) -> Result<Vec<CallRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}

// tests/pipeline_e2e.rs
//
// Full cycle over fixture-backed providers and a real SQLite file:
// fetch → normalize → aggregate → replace table → publish snapshot.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use call_center_pipeline::ingest::providers::{SheetProvider, TelephonyProvider};
use call_center_pipeline::ingest::FetchStatus;
use call_center_pipeline::storage::{PersistenceGateway, SqliteGateway};
use call_center_pipeline::{Pipeline, PipelineError, SourceAdapter, SourceTag};

use common::{DownAdapter, RecordingGateway};

const TELEPHONY_A: &str = r#"[
  {"id": "A1", "agent": "Jo", "duration": "10", "date": "2024-01-01", "feedback": "Good"}
]"#;

const TELEPHONY_B: &str = "[]";

const FORM_SHEET: &str = r#"{
  "range": "'Form Responses'!A1:E2",
  "majorDimension": "ROWS",
  "values": [
    ["id", "agent", "duration", "date", "feedback"],
    ["F1", "Jo", "bad", "2024-01-02"]
  ]
}"#;

fn fixture_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(TelephonyProvider::from_fixture(SourceTag::TelephonyA, TELEPHONY_A)),
        Arc::new(TelephonyProvider::from_fixture(SourceTag::TelephonyB, TELEPHONY_B)),
        Arc::new(SheetProvider::from_fixture(FORM_SHEET)),
    ]
}

async fn sqlite_in(dir: &tempfile::TempDir) -> Arc<SqliteGateway> {
    let url = format!("sqlite://{}", dir.path().join("calls.db").display());
    Arc::new(SqliteGateway::connect(&url).await.expect("open sqlite"))
}

#[tokio::test]
async fn three_sources_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = sqlite_in(&dir).await;
    let pipeline = Pipeline::new(fixture_adapters(), gateway.clone(), "call_data").unwrap();

    let report = pipeline.run_cycle().await.expect("cycle should persist");

    let snap = &report.snapshot;
    assert_eq!(snap.average_duration, Some(10.0));
    assert_eq!(snap.agent_average(Some("Jo")), Some(10.0));
    assert_eq!(snap.agent_performance.as_ref().map(Vec::len), Some(1));
    assert_eq!(snap.feedback_count(Some("Good")), Some(1));
    assert_eq!(snap.feedback_distribution.as_ref().map(Vec::len), Some(1));

    assert_eq!(report.kept, 1);
    assert_eq!(report.rejected.get("invalid_duration"), Some(&1));
    assert_eq!(report.total_rejected(), 1);
    assert!(report.persisted);
    assert!(report
        .sources
        .iter()
        .all(|s| s.status == FetchStatus::Ok));

    let stored = gateway.load("call_data").await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].call_id, "A1");
    assert_eq!(stored[0].source, SourceTag::TelephonyA);
    assert_eq!(stored[0].agent_name.as_deref(), Some("Jo"));

    let published = pipeline.snapshots().latest_snapshot().expect("published");
    assert_eq!(&published, snap);
}

#[tokio::test]
async fn each_cycle_replaces_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = sqlite_in(&dir).await;

    let first = Pipeline::new(fixture_adapters(), gateway.clone(), "call_data").unwrap();
    first.run_cycle().await.unwrap();

    let second_batch = r#"[
      {"id": "A7", "agent": "Sam", "duration": 3.5, "date": "2024-02-01T10:00:00Z"},
      {"id": "A8", "agent": "Sam", "duration": 6.5, "date": "2024-02-01T11:00:00Z"}
    ]"#;
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![Arc::new(TelephonyProvider::from_fixture(
        SourceTag::TelephonyA,
        second_batch,
    ))];
    let second = Pipeline::new(adapters, gateway.clone(), "call_data").unwrap();
    let report = second.run_cycle().await.unwrap();
    assert_eq!(report.snapshot.agent_average(Some("Sam")), Some(5.0));
    // No feedback field at all: both land in the no-feedback bucket.
    assert_eq!(report.snapshot.feedback_count(None), Some(2));

    let ids: HashSet<String> = gateway
        .load("call_data")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.call_id)
        .collect();
    assert_eq!(ids, HashSet::from(["A7".to_string(), "A8".to_string()]));
}

#[tokio::test]
async fn unreachable_source_is_absorbed() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = sqlite_in(&dir).await;
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(TelephonyProvider::from_fixture(SourceTag::TelephonyA, TELEPHONY_A)),
        Arc::new(DownAdapter(SourceTag::TelephonyB)),
    ];
    let pipeline = Pipeline::new(adapters, gateway.clone(), "call_data").unwrap();

    let report = pipeline.run_cycle().await.expect("a down source is not fatal");
    assert_eq!(report.kept, 1);
    let b = report
        .sources
        .iter()
        .find(|s| s.source == SourceTag::TelephonyB)
        .unwrap();
    assert!(matches!(b.status, FetchStatus::Failed(_)));
    assert_eq!(b.fetched, 0);
}

#[tokio::test]
async fn every_source_empty_gives_no_data_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = sqlite_in(&dir).await;
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(TelephonyProvider::from_fixture(SourceTag::TelephonyA, "[]")),
        Arc::new(DownAdapter(SourceTag::TelephonyB)),
    ];
    let pipeline = Pipeline::new(adapters, gateway.clone(), "call_data").unwrap();

    let report = pipeline.run_cycle().await.unwrap();
    assert!(report.snapshot.is_empty());
    assert_eq!(report.snapshot.average_duration, None);
    assert_eq!(report.snapshot.agent_performance, None);
    assert_eq!(report.snapshot.feedback_distribution, None);
    assert!(gateway.load("call_data").await.unwrap().is_empty());
}

#[tokio::test]
async fn slow_source_times_out_and_cycle_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = sqlite_in(&dir).await;
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(TelephonyProvider::from_fixture(SourceTag::TelephonyA, TELEPHONY_A)),
        Arc::new(
            common::StaticAdapter::one_call(SourceTag::FormSheet)
                .with_delay(Duration::from_secs(5)),
        ),
    ];
    let pipeline = Pipeline::new(adapters, gateway, "call_data")
        .unwrap()
        .with_fetch_timeout(Duration::from_millis(100));

    let report = tokio::time::timeout(Duration::from_secs(2), pipeline.run_cycle())
        .await
        .expect("cycle bounded by the fetch deadline")
        .unwrap();
    let sheet = report
        .sources
        .iter()
        .find(|s| s.source == SourceTag::FormSheet)
        .unwrap();
    assert_eq!(sheet.status, FetchStatus::TimedOut);
    assert_eq!(report.kept, 1);
}

#[tokio::test]
async fn failed_write_still_publishes_snapshot() {
    let gateway = Arc::new(RecordingGateway::failing());
    let pipeline = Pipeline::new(fixture_adapters(), gateway, "call_data").unwrap();

    let err = pipeline.run_cycle().await.unwrap_err();
    assert!(matches!(err, PipelineError::Persistence { .. }));

    let latest = pipeline.snapshots().latest().expect("published despite write failure");
    assert!(!latest.persisted);
    assert!(latest.persist_error.is_some());
    assert_eq!(latest.snapshot.average_duration, Some(10.0));
}

#[tokio::test]
async fn pipeline_refuses_bad_table_or_no_sources() {
    let gateway = Arc::new(RecordingGateway::new());
    let err = Pipeline::new(fixture_adapters(), gateway.clone(), "drop table;")
        .err()
        .expect("table name must be rejected");
    assert!(matches!(err, PipelineError::Configuration(_)));

    let err = Pipeline::new(Vec::new(), gateway, "call_data")
        .err()
        .expect("empty source list must be rejected");
    assert!(matches!(err, PipelineError::Configuration(_)));
}

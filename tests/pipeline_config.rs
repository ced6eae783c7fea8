// tests/pipeline_config.rs
//
// Loading pipeline config from disk and the environment. Env-mutating tests
// run under #[serial] since the process environment is shared.

use std::io::Write;

use serial_test::serial;

use call_center_pipeline::config::PipelineConfig;
use call_center_pipeline::{build_adapters, PipelineError, SourceTag};

const FULL: &str = r#"
interval_secs = 120
table = "calls_today"
database_url = "sqlite://data/test.db"
listen_addr = "127.0.0.1:9000"
fetch_timeout_secs = 7

[sources.telephony_a]
endpoint = "https://telephony-a.example.test/v1/calls"
token = "ENV:CCP_TEST_TOKEN_A"
timeout_secs = 3
retry_count = 2

[sources.telephony_a.fields]
call_id = ["uuid"]
call_duration = ["minutes"]

[sources.telephony_b]
endpoint = "https://telephony-b.example.test/calls"
token = "literal-b"

[sources.form_sheet]
spreadsheet_id = "1AbC"
token = "ENV:CCP_TEST_TOKEN_SHEET"
"#;

fn clear_env() {
    for k in [
        "CCP_TEST_TOKEN_A",
        "CCP_TEST_TOKEN_SHEET",
        "DATABASE_URL",
        "PIPELINE_INTERVAL_SECS",
        "LISTEN_ADDR",
        "PIPELINE_CONFIG_PATH",
    ] {
        std::env::remove_var(k);
    }
}

fn set_tokens() {
    std::env::set_var("CCP_TEST_TOKEN_A", "secret-a");
    std::env::set_var("CCP_TEST_TOKEN_SHEET", "secret-sheet");
}

#[test]
#[serial]
fn loads_file_and_resolves_env_tokens() {
    clear_env();
    set_tokens();

    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(FULL.as_bytes()).unwrap();
    let cfg = PipelineConfig::load_from_file(f.path()).unwrap();

    assert_eq!(cfg.interval_secs, 120);
    assert_eq!(cfg.table, "calls_today");
    assert_eq!(cfg.fetch_timeout_secs, 7);

    let a = cfg.sources.telephony_a.as_ref().unwrap();
    assert_eq!(a.token, "secret-a");
    assert_eq!(a.retry_count, 2);
    assert_eq!(a.timeout_secs, Some(3));
    assert_eq!(a.fields.call_id, vec!["uuid".to_string()]);
    // Fields left out of the override keep their default aliases.
    assert_eq!(a.fields.agent_name, vec!["agent_name".to_string(), "agent".to_string()]);

    assert_eq!(cfg.sources.telephony_b.as_ref().unwrap().token, "literal-b");
    assert_eq!(cfg.sources.form_sheet.as_ref().unwrap().token, "secret-sheet");

    let adapters = build_adapters(&cfg).unwrap();
    let tags: Vec<SourceTag> = adapters.iter().map(|a| a.source()).collect();
    assert_eq!(
        tags,
        vec![SourceTag::TelephonyA, SourceTag::TelephonyB, SourceTag::FormSheet]
    );
    clear_env();
}

#[test]
#[serial]
fn missing_token_env_var_is_a_configuration_error() {
    clear_env();
    std::env::set_var("CCP_TEST_TOKEN_SHEET", "secret-sheet");

    let err = PipelineConfig::from_toml_str(FULL).unwrap_err();
    match err {
        PipelineError::Configuration(msg) => assert!(msg.contains("CCP_TEST_TOKEN_A"), "{msg}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
    clear_env();
}

#[test]
#[serial]
fn env_overrides_win_over_file() {
    clear_env();
    set_tokens();
    std::env::set_var("DATABASE_URL", "sqlite://elsewhere.db");
    std::env::set_var("PIPELINE_INTERVAL_SECS", "30");
    std::env::set_var("LISTEN_ADDR", "127.0.0.1:8111");

    let cfg = PipelineConfig::from_toml_str(FULL).unwrap();
    assert_eq!(cfg.database_url, "sqlite://elsewhere.db");
    assert_eq!(cfg.interval_secs, 30);
    assert_eq!(cfg.listen_addr, "127.0.0.1:8111");
    assert_eq!(cfg.interval(), std::time::Duration::from_secs(30));

    std::env::set_var("PIPELINE_INTERVAL_SECS", "soon");
    let err = PipelineConfig::from_toml_str(FULL).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
    clear_env();
}

#[test]
#[serial]
fn load_default_follows_config_path_env() {
    clear_env();
    set_tokens();
    let mut f = tempfile::NamedTempFile::new().unwrap();
    f.write_all(FULL.as_bytes()).unwrap();
    std::env::set_var("PIPELINE_CONFIG_PATH", f.path());

    let cfg = PipelineConfig::load_default().unwrap();
    assert_eq!(cfg.table, "calls_today");

    std::env::set_var("PIPELINE_CONFIG_PATH", "/definitely/not/here.toml");
    let err = PipelineConfig::load_default().unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
    clear_env();
}

#[test]
#[serial]
fn field_overrides_reach_the_normalizer() {
    clear_env();
    set_tokens();
    let cfg = PipelineConfig::from_toml_str(FULL).unwrap();
    let n = cfg.normalizer();

    let raw = serde_json::json!({"uuid": "u-1", "agent": "Jo", "minutes": "2.5", "date": "2024-03-01"});
    let serde_json::Value::Object(raw) = raw else { unreachable!() };
    let rec = n.normalize(raw.clone(), SourceTag::TelephonyA).unwrap();
    assert_eq!(rec.call_id, "u-1");
    assert_eq!(rec.call_duration, 2.5);

    // telephony_b keeps default aliases, so `uuid`/`minutes` mean nothing there.
    assert!(n.normalize(raw, SourceTag::TelephonyB).is_err());
    clear_env();
}

#[test]
#[serial]
fn shipped_form_sheet_map_falls_back_to_timestamp() {
    use call_center_pipeline::ingest::providers::SheetProvider;

    clear_env();
    std::env::set_var("TELEPHONY_A_TOKEN", "a");
    std::env::set_var("TELEPHONY_B_TOKEN", "b");
    std::env::set_var("FORM_SHEET_ACCESS_TOKEN", "s");
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pipeline.toml");
    let cfg = PipelineConfig::load_from_file(&path).unwrap();
    let n = cfg.normalizer();

    // Google Forms exports a "Timestamp" column; "Call Date" left blank.
    let body = serde_json::json!({
        "values": [
            ["Timestamp", "Call ID", "Agent Name", "Call Duration", "Call Date", "Customer Feedback"],
            ["1/2/2024 10:11:12", "F1", "Jo", "4", "", "Good"],
            ["1/3/2024 09:00:00", "F2", "Ana", "6"]
        ]
    })
    .to_string();
    let rows = SheetProvider::parse_body(&body).unwrap();
    let (kept, rejected) = n.normalize_batch(rows, SourceTag::FormSheet);

    assert!(rejected.is_empty(), "{rejected:?}");
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].call_date.to_rfc3339(), "2024-01-02T10:11:12+00:00");
    assert_eq!(kept[1].customer_feedback, None);

    for k in ["TELEPHONY_A_TOKEN", "TELEPHONY_B_TOKEN", "FORM_SHEET_ACCESS_TOKEN"] {
        std::env::remove_var(k);
    }
    clear_env();
}

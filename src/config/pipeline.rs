// src/config/pipeline.rs
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::error::{PipelineError, Result};
use crate::ingest::normalize::{FieldMap, Normalizer};
use crate::ingest::types::SourceTag;
use crate::storage::validate_table_name;

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_INTERVAL_SECS: &str = "PIPELINE_INTERVAL_SECS";
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";

/// Tokens written as `ENV:NAME` are read from the environment variable `NAME`.
const ENV_TOKEN_PREFIX: &str = "ENV:";

fn default_interval_secs() -> u64 {
    300
}
fn default_table() -> String {
    "call_data".to_string()
}
fn default_database_url() -> String {
    "sqlite://data/call_center.db".to_string()
}
fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}
fn default_worksheet() -> String {
    "Form Responses".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Fallback deadline for sources without their own `timeout_secs`.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub sources: SourcesConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    pub telephony_a: Option<HttpSourceConfig>,
    pub telephony_b: Option<HttpSourceConfig>,
    pub form_sheet: Option<SheetSourceConfig>,
}

/// A telephony calls endpoint (GET, bearer token, JSON array body).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSourceConfig {
    pub endpoint: String,
    pub token: String,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_count: u8,
    #[serde(default)]
    pub fields: FieldMap,
}

/// A worksheet read through the spreadsheet values API.
#[derive(Debug, Clone, Deserialize)]
pub struct SheetSourceConfig {
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,
    pub spreadsheet_id: String,
    #[serde(default = "default_worksheet")]
    pub worksheet: String,
    pub token: String,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry_count: u8,
    #[serde(default)]
    pub fields: FieldMap,
}

impl PipelineConfig {
    /// Load using env var + fallback:
    /// 1) $PIPELINE_CONFIG_PATH
    /// 2) config/pipeline.toml
    pub fn load_default() -> Result<Self> {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("reading {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse, apply env overrides, resolve tokens, validate.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s)
            .map_err(|e| PipelineError::Configuration(format!("parsing pipeline config: {e}")))?;
        cfg.apply_env_overrides()?;
        cfg.resolve_tokens()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var(ENV_DATABASE_URL) {
            self.database_url = url;
        }
        if let Ok(addr) = env::var(ENV_LISTEN_ADDR) {
            self.listen_addr = addr;
        }
        if let Ok(raw) = env::var(ENV_INTERVAL_SECS) {
            self.interval_secs = raw.trim().parse().map_err(|_| {
                PipelineError::Configuration(format!("{ENV_INTERVAL_SECS}={raw:?} is not a number"))
            })?;
        }
        Ok(())
    }

    fn resolve_tokens(&mut self) -> Result<()> {
        let s = &mut self.sources;
        if let Some(a) = s.telephony_a.as_mut() {
            a.token = resolve_token(&a.token, SourceTag::TelephonyA)?;
        }
        if let Some(b) = s.telephony_b.as_mut() {
            b.token = resolve_token(&b.token, SourceTag::TelephonyB)?;
        }
        if let Some(f) = s.form_sheet.as_mut() {
            f.token = resolve_token(&f.token, SourceTag::FormSheet)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(PipelineError::Configuration(msg));

        if self.interval_secs == 0 {
            return bad("interval_secs must be > 0".into());
        }
        if self.fetch_timeout_secs == 0 {
            return bad("fetch_timeout_secs must be > 0".into());
        }
        validate_table_name(&self.table)?;
        if self.database_url.trim().is_empty() {
            return bad("database_url is empty".into());
        }
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return bad(format!("listen_addr {:?} is not host:port", self.listen_addr));
        }

        let s = &self.sources;
        if s.telephony_a.is_none() && s.telephony_b.is_none() && s.form_sheet.is_none() {
            return bad("no sources configured".into());
        }
        for (tag, http) in [
            (SourceTag::TelephonyA, s.telephony_a.as_ref()),
            (SourceTag::TelephonyB, s.telephony_b.as_ref()),
        ] {
            if let Some(h) = http {
                check_url(tag, &h.endpoint)?;
                check_timeout(tag, h.timeout_secs)?;
            }
        }
        if let Some(f) = s.form_sheet.as_ref() {
            check_url(SourceTag::FormSheet, &f.api_base)?;
            check_timeout(SourceTag::FormSheet, f.timeout_secs)?;
            if f.spreadsheet_id.trim().is_empty() {
                return bad("form_sheet.spreadsheet_id is empty".into());
            }
            if f.worksheet.trim().is_empty() {
                return bad("form_sheet.worksheet is empty".into());
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Field maps from the `[sources.*.fields]` sections.
    pub fn normalizer(&self) -> Normalizer {
        let s = &self.sources;
        let mut n = Normalizer::new();
        if let Some(a) = &s.telephony_a {
            n = n.with_field_map(SourceTag::TelephonyA, a.fields.clone());
        }
        if let Some(b) = &s.telephony_b {
            n = n.with_field_map(SourceTag::TelephonyB, b.fields.clone());
        }
        if let Some(f) = &s.form_sheet {
            n = n.with_field_map(SourceTag::FormSheet, f.fields.clone());
        }
        n
    }
}

fn resolve_token(raw: &str, tag: SourceTag) -> Result<String> {
    let raw = raw.trim();
    let token = match raw.strip_prefix(ENV_TOKEN_PREFIX) {
        Some(var) => env::var(var.trim()).map_err(|_| {
            PipelineError::Configuration(format!("{tag}: missing env var {} for token", var.trim()))
        })?,
        None => raw.to_string(),
    };
    if token.trim().is_empty() {
        return Err(PipelineError::Configuration(format!("{tag}: token is empty")));
    }
    Ok(token)
}

fn check_url(tag: SourceTag, raw: &str) -> Result<()> {
    match reqwest::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => Ok(()),
        _ => Err(PipelineError::Configuration(format!(
            "{tag}: {raw:?} is not an http(s) url"
        ))),
    }
}

fn check_timeout(tag: SourceTag, secs: Option<u64>) -> Result<()> {
    if secs == Some(0) {
        return Err(PipelineError::Configuration(format!(
            "{tag}: timeout_secs must be > 0"
        )));
    }
    Ok(())
}

// src/ingest/providers/sheet.rs
//! Form responses read from one worksheet through the spreadsheet values API.
//!
//! The API answers with a grid (`values: [[header...], [cell...], ...]`) and
//! drops trailing empty cells, so rows are padded back to the header width.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::Value;

use super::{build_client, get_text_with_retries};
use crate::config::SheetSourceConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::types::{RawRecord, SourceAdapter, SourceTag};

const TAG: SourceTag = SourceTag::FormSheet;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

pub struct SheetProvider {
    timeout: Option<Duration>,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        url: Url,
        token: String,
        retries: u8,
        client: Client,
    },
}

impl SheetProvider {
    pub fn from_config(cfg: &SheetSourceConfig) -> Result<Self> {
        let timeout = cfg.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            timeout,
            mode: Mode::Http {
                url: values_url(&cfg.api_base, &cfg.spreadsheet_id, &cfg.worksheet)?,
                token: cfg.token.clone(),
                retries: cfg.retry_count,
                client: build_client(TAG, timeout)?,
            },
        })
    }

    /// Serve a fixed values-API response body instead of calling out.
    pub fn from_fixture(body: &str) -> Self {
        Self {
            timeout: None,
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn parse_body(body: &str) -> Result<Vec<RawRecord>> {
        let range: ValueRange = serde_json::from_str(body)
            .map_err(|e| PipelineError::source_unavailable(TAG, format!("malformed JSON: {e}")))?;
        rows_to_records(range.values)
    }
}

/// `{api_base}/v4/spreadsheets/{id}/values/'{worksheet}'`, path-encoded.
pub fn values_url(api_base: &str, spreadsheet_id: &str, worksheet: &str) -> Result<Url> {
    let mut url = Url::parse(api_base)
        .map_err(|e| PipelineError::Configuration(format!("{TAG}: api_base: {e}")))?;
    let range = format!("'{}'", worksheet.replace('\'', "''"));
    url.path_segments_mut()
        .map_err(|_| PipelineError::Configuration(format!("{TAG}: api_base cannot be a base url")))?
        .pop_if_empty()
        .extend(["v4", "spreadsheets", spreadsheet_id, "values", range.as_str()]);
    Ok(url)
}

/// First row is the header; blank header cells drop their column.
pub fn rows_to_records(mut grid: Vec<Vec<Value>>) -> Result<Vec<RawRecord>> {
    if grid.is_empty() {
        return Ok(Vec::new());
    }
    let header: Vec<Option<String>> = grid
        .remove(0)
        .into_iter()
        .map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect();

    let mut seen = HashSet::new();
    for name in header.iter().flatten() {
        if !seen.insert(name.as_str()) {
            return Err(PipelineError::source_unavailable(
                TAG,
                format!("duplicate header {name:?}"),
            ));
        }
    }

    let mut out = Vec::with_capacity(grid.len());
    for row in grid {
        if row.iter().all(is_blank) {
            continue;
        }
        let mut rec = RawRecord::new();
        let mut cells = row.into_iter();
        for name in &header {
            let cell = cells.next().unwrap_or_else(|| Value::String(String::new()));
            if let Some(name) = name {
                rec.insert(name.clone(), cell);
            }
        }
        out.push(rec);
    }
    Ok(out)
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[async_trait]
impl SourceAdapter for SheetProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        match &self.mode {
            Mode::Fixture(body) => Self::parse_body(body),
            Mode::Http {
                url,
                token,
                retries,
                client,
            } => {
                let body =
                    get_text_with_retries(TAG, *retries, || client.get(url.clone()).bearer_auth(token))
                        .await?;
                Self::parse_body(&body)
            }
        }
    }

    fn source(&self) -> SourceTag {
        TAG
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

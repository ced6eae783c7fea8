// src/ingest/providers/telephony.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde_json::Value;

use super::{build_client, get_text_with_retries};
use crate::config::HttpSourceConfig;
use crate::error::{PipelineError, Result};
use crate::ingest::types::{RawRecord, SourceAdapter, SourceTag};

/// Telephony calls endpoint: GET with bearer token, JSON array of call objects.
pub struct TelephonyProvider {
    tag: SourceTag,
    timeout: Option<Duration>,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        endpoint: String,
        token: String,
        retries: u8,
        client: Client,
    },
}

impl TelephonyProvider {
    pub fn from_config(tag: SourceTag, cfg: &HttpSourceConfig) -> Result<Self> {
        let timeout = cfg.timeout_secs.map(Duration::from_secs);
        Ok(Self {
            tag,
            timeout,
            mode: Mode::Http {
                endpoint: cfg.endpoint.clone(),
                token: cfg.token.clone(),
                retries: cfg.retry_count,
                client: build_client(tag, timeout)?,
            },
        })
    }

    /// Serve a fixed response body instead of calling out.
    pub fn from_fixture(tag: SourceTag, body: &str) -> Self {
        Self {
            tag,
            timeout: None,
            mode: Mode::Fixture(body.to_string()),
        }
    }

    pub fn parse_body(tag: SourceTag, body: &str) -> Result<Vec<RawRecord>> {
        let v: Value = serde_json::from_str(body)
            .map_err(|e| PipelineError::source_unavailable(tag, format!("malformed JSON: {e}")))?;
        let Value::Array(items) = v else {
            return Err(PipelineError::source_unavailable(
                tag,
                "expected a JSON array of calls",
            ));
        };

        let mut out = Vec::with_capacity(items.len());
        let mut skipped = 0usize;
        for item in items {
            match item {
                Value::Object(m) => out.push(m),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(target: "ingest", source = %tag, skipped, "non-object items in calls array");
            counter!("ingest_malformed_items_total", "source" => tag.as_str()).increment(skipped as u64);
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for TelephonyProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>> {
        match &self.mode {
            Mode::Fixture(body) => Self::parse_body(self.tag, body),
            Mode::Http {
                endpoint,
                token,
                retries,
                client,
            } => {
                let body = get_text_with_retries(self.tag, *retries, || {
                    client.get(endpoint.as_str()).bearer_auth(token)
                })
                .await?;
                Self::parse_body(self.tag, &body)
            }
        }
    }

    fn source(&self) -> SourceTag {
        self.tag
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

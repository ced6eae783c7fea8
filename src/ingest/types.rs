// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One loosely-typed record in the source's native field names.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

/// Which adapter produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    TelephonyA,
    TelephonyB,
    FormSheet,
}

impl SourceTag {
    pub const ALL: [SourceTag; 3] = [Self::TelephonyA, Self::TelephonyB, Self::FormSheet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TelephonyA => "telephony_a",
            Self::TelephonyB => "telephony_b",
            Self::FormSheet => "form_sheet",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown source tag {s:?}"))
    }
}

/// One phone interaction in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub source: SourceTag,
    pub call_id: String, // unique per source, not globally
    pub agent_name: Option<String>,
    pub call_duration: f64, // minutes
    pub call_date: DateTime<Utc>,
    pub customer_feedback: Option<String>,
}

impl CallRecord {
    /// `source:call_id`, the key that stays unique across the merged batch.
    pub fn qualified_id(&self) -> String {
        format!("{}:{}", self.source, self.call_id)
    }

    pub fn has_valid_duration(&self) -> bool {
        self.call_duration.is_finite() && self.call_duration >= 0.0
    }
}

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Raw fetch. Errors here are absorbed by [`crate::ingest::fetch`].
    async fn fetch_latest(&self) -> Result<Vec<RawRecord>, PipelineError>;

    fn source(&self) -> SourceTag;

    /// Per-adapter deadline; `None` falls back to the pipeline default.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

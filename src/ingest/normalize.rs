// src/ingest/normalize.rs
//! Raw record → [`CallRecord`] mapping.
//!
//! Field names differ per source, so each source gets its own [`FieldMap`].
//! Coercion failures never abort a batch; they come back as [`Rejection`]s
//! that the caller counts and reports.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::ingest::types::{CallRecord, RawRecord, SourceTag};

/// Ordered alias lists, first match wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMap {
    pub call_id: Vec<String>,
    pub agent_name: Vec<String>,
    pub call_duration: Vec<String>,
    pub call_date: Vec<String>,
    pub customer_feedback: Vec<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        fn names(xs: &[&str]) -> Vec<String> {
            xs.iter().map(|s| s.to_string()).collect()
        }
        Self {
            call_id: names(&["call_id", "id"]),
            agent_name: names(&["agent_name", "agent"]),
            call_duration: names(&["call_duration", "duration"]),
            call_date: names(&["call_date", "date"]),
            customer_feedback: names(&["customer_feedback", "feedback"]),
        }
    }
}

impl FieldMap {
    /// First alias holding a non-blank value. A blank cell under one alias
    /// does not hide a value under a later one.
    fn pick<'a>(raw: &'a RawRecord, aliases: &[String]) -> Option<&'a Value> {
        aliases
            .iter()
            .filter_map(|k| raw.get(k))
            .find(|v| !is_blank(v))
    }
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("missing call id")]
    MissingCallId,
    #[error("missing call duration")]
    MissingDuration,
    #[error("invalid call duration {0:?}")]
    InvalidDuration(String),
    #[error("missing call date")]
    MissingDate,
    #[error("invalid call date {0:?}")]
    InvalidDate(String),
    #[error("duplicate call id {0:?} within source")]
    DuplicateCallId(String),
}

impl RejectReason {
    /// Label without the offending value, for metrics and tallies.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingCallId => "missing_call_id",
            Self::MissingDuration => "missing_duration",
            Self::InvalidDuration(_) => "invalid_duration",
            Self::MissingDate => "missing_date",
            Self::InvalidDate(_) => "invalid_date",
            Self::DuplicateCallId(_) => "duplicate_call_id",
        }
    }
}

/// A record that failed normalization, with its original payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub source: SourceTag,
    pub reason: RejectReason,
    pub payload: RawRecord,
}

impl From<Rejection> for PipelineError {
    fn from(r: Rejection) -> Self {
        PipelineError::RecordRejected {
            tag: r.source,
            reason: r.reason.to_string(),
        }
    }
}

/// Per-source field mapping; sources without an entry use [`FieldMap::default`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    maps: HashMap<SourceTag, FieldMap>,
    fallback: FieldMap,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_map(mut self, source: SourceTag, map: FieldMap) -> Self {
        self.maps.insert(source, map);
        self
    }

    pub fn field_map(&self, source: SourceTag) -> &FieldMap {
        self.maps.get(&source).unwrap_or(&self.fallback)
    }

    pub fn normalize(&self, raw: RawRecord, source: SourceTag) -> Result<CallRecord, Rejection> {
        let map = self.field_map(source);
        match map_fields(&raw, map, source) {
            Ok(rec) => Ok(rec),
            Err(reason) => Err(Rejection {
                source,
                reason,
                payload: raw,
            }),
        }
    }

    /// Normalize a whole source batch. Repeated `call_id`s within the batch are
    /// rejected after the first occurrence.
    pub fn normalize_batch(
        &self,
        raws: Vec<RawRecord>,
        source: SourceTag,
    ) -> (Vec<CallRecord>, Vec<Rejection>) {
        let mut kept = Vec::with_capacity(raws.len());
        let mut rejected = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let map = self.field_map(source);

        for raw in raws {
            match map_fields(&raw, map, source) {
                Ok(rec) if !seen.insert(rec.call_id.clone()) => rejected.push(Rejection {
                    source,
                    reason: RejectReason::DuplicateCallId(rec.call_id),
                    payload: raw,
                }),
                Ok(rec) => kept.push(rec),
                Err(reason) => rejected.push(Rejection {
                    source,
                    reason,
                    payload: raw,
                }),
            }
        }
        (kept, rejected)
    }
}

fn map_fields(raw: &RawRecord, map: &FieldMap, source: SourceTag) -> Result<CallRecord, RejectReason> {
    let call_id = FieldMap::pick(raw, &map.call_id)
        .and_then(scalar_text)
        .ok_or(RejectReason::MissingCallId)?;

    let duration_v =
        FieldMap::pick(raw, &map.call_duration).ok_or(RejectReason::MissingDuration)?;
    let call_duration = coerce_duration(duration_v)?;

    let date_v = FieldMap::pick(raw, &map.call_date).ok_or(RejectReason::MissingDate)?;
    let call_date = coerce_date(date_v)?;

    Ok(CallRecord {
        source,
        call_id,
        agent_name: FieldMap::pick(raw, &map.agent_name).and_then(scalar_text),
        call_duration,
        call_date,
        customer_feedback: FieldMap::pick(raw, &map.customer_feedback).and_then(scalar_text),
    })
}

/// Strings and numbers as text. Whitespace-only strings count as absent;
/// anything else is kept verbatim.
fn scalar_text(v: &Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

pub fn coerce_duration(v: &Value) -> Result<f64, RejectReason> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Err(RejectReason::MissingDuration),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(d) if d.is_finite() && d >= 0.0 => Ok(d),
        _ => Err(RejectReason::InvalidDuration(display_value(v))),
    }
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
];
const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse a call date. Naive values are taken as UTC.
pub fn coerce_date(v: &Value) -> Result<DateTime<Utc>, RejectReason> {
    let Value::String(raw) = v else {
        return Err(RejectReason::InvalidDate(display_value(v)));
    };
    let s = raw.trim();
    if s.is_empty() {
        return Err(RejectReason::MissingDate);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            if let Some(ndt) = d.and_hms_opt(0, 0, 0) {
                return Ok(ndt.and_utc());
            }
        }
    }
    Err(RejectReason::InvalidDate(raw.clone()))
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rejection counts keyed by reason label.
pub fn tally_rejections(rejections: &[Rejection]) -> BTreeMap<&'static str, usize> {
    let mut out = BTreeMap::new();
    for r in rejections {
        *out.entry(r.reason.label()).or_insert(0) += 1;
    }
    out
}

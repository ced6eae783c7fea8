// src/error.rs
//! Error taxonomy shared by every pipeline stage.
//!
//! Only [`PipelineError::Configuration`] is fatal, and only at startup.
//! Everything else is recovered inside the cycle or surfaced to the scheduler.

use crate::ingest::types::SourceTag;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network/auth failure, non-2xx response, or malformed body from a source.
    #[error("source {tag} unavailable: {reason}")]
    SourceUnavailable { tag: SourceTag, reason: String },

    /// A single record failed normalization.
    #[error("record from {tag} rejected: {reason}")]
    RecordRejected { tag: SourceTag, reason: String },

    /// Storage write or read failed; prior table contents are untouched.
    #[error("persistence failure on table {table}: {reason}")]
    Persistence { table: String, reason: String },

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PipelineError {
    pub fn source_unavailable(tag: SourceTag, reason: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            tag,
            reason: reason.to_string(),
        }
    }

    pub fn persistence(table: &str, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            table: table.to_string(),
            reason: err.to_string(),
        }
    }

    /// Short stable label, used as a metrics label and in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::RecordRejected { .. } => "record_rejected",
            Self::Persistence { .. } => "persistence",
            Self::Configuration(_) => "configuration",
        }
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

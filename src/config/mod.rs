// src/config/mod.rs
pub mod pipeline;

pub use pipeline::{HttpSourceConfig, PipelineConfig, SheetSourceConfig, SourcesConfig};

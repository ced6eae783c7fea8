// src/storage/mod.rs
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};
use crate::ingest::types::CallRecord;

pub use sqlite::SqliteGateway;

#[async_trait::async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Replace the whole table. Readers see the old rows or the new rows,
    /// never a mix; on error the old rows stay in place.
    async fn replace(&self, table: &str, records: &[CallRecord]) -> Result<()>;

    /// Current table contents. A table that was never written reads as empty.
    async fn load(&self, table: &str) -> Result<Vec<CallRecord>>;
}

/// Table names are interpolated into DDL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(PipelineError::Configuration(format!(
            "invalid table identifier {table:?}"
        )))
    }
}

/// One async mutex per destination table. Holding the guard is the only way
/// the pipeline calls [`PersistenceGateway::replace`].
#[derive(Debug, Default)]
pub struct TableLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TableLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, table: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        map.entry(table.to_string()).or_default().clone()
    }
}

// src/storage/sqlite.rs
//! SQLite-backed [`PersistenceGateway`].
//!
//! `replace` writes into `<table>__staging`, then drops the live table and
//! renames the staging table over it, all inside one transaction. SQLite DDL
//! is transactional, so a failure at any step rolls back to the prior table.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::{validate_table_name, PersistenceGateway};
use crate::error::{PipelineError, Result};
use crate::ingest::types::{CallRecord, SourceTag};

#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    /// Open (or create) the database at `url`, e.g. `sqlite://data/calls.db`.
    pub async fn connect(url: &str) -> Result<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| PipelineError::Configuration(format!("database url {url:?}: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        if let Some(dir) = opts.get_filename().parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .map_err(|e| PipelineError::persistence("<connect>", e))?;
            }
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| PipelineError::persistence("<connect>", e))?;
        tracing::info!(target: "storage", %url, "sqlite connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| PipelineError::persistence(table, e))?;
        Ok(found.is_some())
    }
}

fn create_table_sql(name: &str) -> String {
    format!(
        r#"
        CREATE TABLE {name} (
            source            TEXT NOT NULL,
            call_id           TEXT NOT NULL,
            agent_name        TEXT,
            call_duration     REAL NOT NULL,
            call_date         TEXT NOT NULL,
            customer_feedback TEXT,
            PRIMARY KEY (source, call_id)
        )
        "#
    )
}

fn encode_date(d: &DateTime<Utc>) -> String {
    d.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[async_trait::async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn replace(&self, table: &str, records: &[CallRecord]) -> Result<()> {
        validate_table_name(table)?;
        let staging = format!("{table}__staging");
        let err = |e: sqlx::Error| PipelineError::persistence(table, e);

        let mut tx = self.pool.begin().await.map_err(err)?;

        sqlx::query(&format!("DROP TABLE IF EXISTS {staging}"))
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        sqlx::query(&create_table_sql(&staging))
            .execute(&mut *tx)
            .await
            .map_err(err)?;

        let insert = format!(
            "INSERT INTO {staging} (source, call_id, agent_name, call_duration, call_date, customer_feedback) \
             VALUES (?, ?, ?, ?, ?, ?)"
        );
        for r in records {
            sqlx::query(&insert)
                .bind(r.source.as_str())
                .bind(&r.call_id)
                .bind(&r.agent_name)
                .bind(r.call_duration)
                .bind(encode_date(&r.call_date))
                .bind(&r.customer_feedback)
                .execute(&mut *tx)
                .await
                .map_err(err)?;
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        sqlx::query(&format!("ALTER TABLE {staging} RENAME TO {table}"))
            .execute(&mut *tx)
            .await
            .map_err(err)?;

        tx.commit().await.map_err(err)?;

        tracing::debug!(target: "storage", table, rows = records.len(), "table replaced");
        Ok(())
    }

    async fn load(&self, table: &str) -> Result<Vec<CallRecord>> {
        validate_table_name(table)?;
        if !self.table_exists(table).await? {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT source, call_id, agent_name, call_duration, call_date, customer_feedback FROM {table}"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::persistence(table, e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let decode = |e: sqlx::Error| PipelineError::persistence(table, e);
            let source: String = row.try_get("source").map_err(decode)?;
            let call_date: String = row.try_get("call_date").map_err(decode)?;
            out.push(CallRecord {
                source: SourceTag::from_str(&source)
                    .map_err(|e| PipelineError::persistence(table, e))?,
                call_id: row.try_get("call_id").map_err(decode)?,
                agent_name: row.try_get("agent_name").map_err(decode)?,
                call_duration: row.try_get("call_duration").map_err(decode)?,
                call_date: DateTime::parse_from_rfc3339(&call_date)
                    .map_err(|e| PipelineError::persistence(table, e))?
                    .with_timezone(&Utc),
                customer_feedback: row.try_get("customer_feedback").map_err(decode)?,
            });
        }
        Ok(out)
    }
}

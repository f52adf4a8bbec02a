use super::row::{ArtifactRow, StoredRecord};
use super::traits::{RecordStore, StoreRejection, may_replace};
use crate::config::schema::is_valid_table_name;
use anyhow::Context;
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

fn artifacts_schema(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
             conflict_key     TEXT NOT NULL UNIQUE,
             kind             TEXT NOT NULL,
             subject_id       TEXT NOT NULL,
             locale           TEXT NOT NULL,
             variant          TEXT NOT NULL,
             slot             TEXT,
             checksum         TEXT NOT NULL,
             storage_location TEXT,
             source_tag       TEXT NOT NULL,
             created_at       TEXT NOT NULL,
             model            TEXT,
             mime_type        TEXT,
             content_sha256   TEXT,
             byte_size        INTEGER,
             used_fallback    INTEGER,
             attempt_count    INTEGER,
             metadata         TEXT,
             prompt_excerpt   TEXT,
             anchors          TEXT
         )"
    )
}

/// SQLite-backed artifact records using a sqlx pool.
///
/// The table is created with a unique `conflict_key` when missing. An
/// existing table is used as found: columns it lacks surface as typed
/// rejections, and without a unique index on `conflict_key` writes degrade
/// to update-latest-or-insert.
pub struct SqliteRecordStore {
    pool: SqlitePool,
    table: String,
    unique: bool,
}

impl SqliteRecordStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: &Path, table: &str) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| {
                    format!("Failed to create storage directory: {}", parent.display())
                })?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&url)
            .await
            .with_context(|| format!("Failed to open artifact DB: {}", path.display()))?;

        Self::from_pool(pool, table).await
    }

    /// Single-connection in-memory database.
    pub async fn in_memory(table: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("open in-memory SQLite")?;
        Self::from_pool(pool, table).await
    }

    pub async fn from_pool(pool: SqlitePool, table: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(is_valid_table_name(table), "invalid table name: {table}");

        sqlx::query(&artifacts_schema(table))
            .execute(&pool)
            .await
            .with_context(|| format!("create {table} table"))?;

        let unique = detect_unique_conflict_key(&pool, table).await?;
        if !unique {
            tracing::warn!(
                table,
                "conflict_key is not unique; writes fall back to update-latest-or-insert"
            );
        }

        Ok(Self {
            pool,
            table: table.to_string(),
            unique,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    async fn upsert_unique(
        &self,
        row: &ArtifactRow,
        conflict_key: &str,
    ) -> Result<StoredRecord, StoreRejection> {
        let columns = quoted_columns(row)?;
        let table = &self.table;
        let placeholders = vec!["?"; columns.len()].join(", ");
        let updates = columns
            .iter()
            .filter(|column| column.as_str() != "\"conflict_key\"")
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({placeholders})
             ON CONFLICT(conflict_key) DO UPDATE SET {updates}
             WHERE NOT (excluded.source_tag = 'fallback'
                        AND \"{table}\".source_tag <> 'fallback'
                        AND \"{table}\".checksum = excluded.checksum)",
            columns.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in row.iter() {
            query = bind_value(query, value);
        }
        query.execute(&self.pool).await.map_err(rejection)?;

        self.load_latest(conflict_key).await
    }

    /// Update-latest-or-insert for tables without a unique conflict key.
    /// Not atomic: concurrent writers may both insert.
    async fn upsert_degraded(
        &self,
        row: &ArtifactRow,
        conflict_key: &str,
    ) -> Result<StoredRecord, StoreRejection> {
        let columns = quoted_columns(row)?;
        let table = &self.table;

        let latest: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT rowid FROM \"{table}\" WHERE conflict_key = ?1 ORDER BY rowid DESC LIMIT 1"
        ))
        .bind(conflict_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(rejection)?;

        if let Some((rowid,)) = latest {
            let existing = self.load_latest(conflict_key).await?;
            if !may_replace(&existing, row) {
                tracing::debug!(conflict_key, "Keeping existing non-fallback record");
                return Ok(existing);
            }

            let assignments = columns
                .iter()
                .map(|column| format!("{column} = ?"))
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!("UPDATE \"{table}\" SET {assignments} WHERE rowid = ?");
            let mut query = sqlx::query(&sql);
            for (_, value) in row.iter() {
                query = bind_value(query, value);
            }
            query
                .bind(rowid)
                .execute(&self.pool)
                .await
                .map_err(rejection)?;
        } else {
            let placeholders = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO \"{table}\" ({}) VALUES ({placeholders})",
                columns.join(", ")
            );
            let mut query = sqlx::query(&sql);
            for (_, value) in row.iter() {
                query = bind_value(query, value);
            }
            query.execute(&self.pool).await.map_err(rejection)?;
        }

        self.load_latest(conflict_key).await
    }

    async fn load_latest(&self, conflict_key: &str) -> Result<StoredRecord, StoreRejection> {
        self.fetch_latest(conflict_key)
            .await
            .map_err(|e| StoreRejection::from_message(format!("{e:#}")))?
            .ok_or_else(|| {
                StoreRejection::from_message(format!("record {conflict_key} missing after write"))
            })
    }

    async fn fetch_latest(&self, conflict_key: &str) -> anyhow::Result<Option<StoredRecord>> {
        let table = &self.table;
        let row = sqlx::query(&format!(
            "SELECT * FROM \"{table}\" WHERE conflict_key = ?1 ORDER BY rowid DESC LIMIT 1"
        ))
        .bind(conflict_key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("load record {conflict_key}"))?;

        row.map(|row| {
            Ok(StoredRecord {
                conflict_key: conflict_key.to_string(),
                row: decode_row(&row)?,
            })
        })
        .transpose()
    }
}

impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn enforces_uniqueness(&self) -> bool {
        self.unique
    }

    fn upsert<'a>(
        &'a self,
        row: &'a ArtifactRow,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<StoredRecord, StoreRejection>> + Send + 'a>> {
        Box::pin(async move {
            if self.unique {
                self.upsert_unique(row, conflict_key).await
            } else {
                self.upsert_degraded(row, conflict_key).await
            }
        })
    }

    fn find_latest<'a>(
        &'a self,
        conflict_key: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Option<StoredRecord>>> + Send + 'a>> {
        Box::pin(self.fetch_latest(conflict_key))
    }
}

/// True when a unique index covers exactly `conflict_key`.
async fn detect_unique_conflict_key(pool: &SqlitePool, table: &str) -> anyhow::Result<bool> {
    let indexes: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM pragma_index_list(?1) WHERE \"unique\" = 1")
            .bind(table)
            .fetch_all(pool)
            .await
            .with_context(|| format!("list indexes of {table}"))?;

    for (index,) in indexes {
        let columns: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_index_info(?1)")
            .bind(&index)
            .fetch_all(pool)
            .await
            .with_context(|| format!("inspect index {index}"))?;
        if columns.len() == 1 && columns[0].0 == "conflict_key" {
            return Ok(true);
        }
    }
    Ok(false)
}

fn quoted_columns(row: &ArtifactRow) -> Result<Vec<String>, StoreRejection> {
    row.field_names()
        .map(|name| {
            if is_valid_table_name(name) {
                Ok(format!("\"{name}\""))
            } else {
                Err(StoreRejection::from_message(format!("unknown field `{name}`")))
            }
        })
        .collect()
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &'q Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(flag) => query.bind(i64::from(*flag)),
        Value::Number(number) => match number.as_i64() {
            Some(int) => query.bind(int),
            None => query.bind(number.as_f64()),
        },
        Value::String(text) => query.bind(text.as_str()),
        Value::Array(_) | Value::Object(_) => query.bind(value.to_string()),
    }
}

fn rejection(err: sqlx::Error) -> StoreRejection {
    let message = err
        .as_database_error()
        .map_or_else(|| err.to_string(), |db| db.message().to_string());
    StoreRejection::from_message(message)
}

/// Decode any column layout into a field map. NULL columns are omitted.
fn decode_row(row: &SqliteRow) -> anyhow::Result<ArtifactRow> {
    let mut decoded = ArtifactRow::new();
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" | "BOOLEAN" => Value::from(row.try_get::<i64, _>(index)?),
            "REAL" => Value::from(row.try_get::<f64, _>(index)?),
            "BLOB" => Value::from(hex::encode(row.try_get::<Vec<u8>, _>(index)?)),
            _ => Value::from(row.try_get::<String, _>(index)?),
        };
        decoded.set(column.name(), value);
    }
    Ok(decoded)
}

use super::{CodeStore, InsertReport, RecentFilter};
use crate::error::{Error, Result};
use crate::record::{CodeRecord, DedupKey};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, instrument};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS codes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL,
        recipient TEXT NOT NULL,
        sender TEXT,
        subject TEXT NOT NULL,
        received_at_ms INTEGER NOT NULL,
        is_protected INTEGER NOT NULL DEFAULT 0,
        created_at_ms INTEGER NOT NULL,
        UNIQUE (code, recipient, received_at_ms)
    )",
    "CREATE INDEX IF NOT EXISTS idx_codes_received ON codes (received_at_ms DESC)",
    "CREATE INDEX IF NOT EXISTS idx_codes_recipient ON codes (recipient, received_at_ms DESC)",
];

/// Keys per lookup statement; three bound parameters each keeps us under
/// SQLite's default variable limit of 999.
const KEYS_PER_LOOKUP: usize = 300;

/// [`CodeStore`] backed by SQLite.
///
/// The `UNIQUE (code, recipient, received_at_ms)` constraint together with
/// `INSERT OR IGNORE` makes inserts idempotent even across processes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the database cannot be opened or migrated.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(store_error("connect"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(store_error("connect"))?;
        Self::from_pool(pool).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the schema cannot be applied.
    pub async fn in_memory() -> Result<Self> {
        // Each connection to :memory: is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(store_error("connect"))?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the schema cannot be applied.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(store_error("migrate"))?;
        }
        debug!("SQLite schema ready");
        Ok(Self { pool })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn store_error(operation: &'static str) -> impl Fn(sqlx::Error) -> Error {
    move |source| Error::Store { operation, source }
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| Error::MalformedResponse {
            context: "stored record",
            message: format!("received_at_ms out of range: {ms}"),
        })
}

fn record_from_row(row: &SqliteRow) -> Result<CodeRecord> {
    let get = store_error("decode");
    Ok(CodeRecord {
        code: row.try_get("code").map_err(&get)?,
        recipient: row.try_get("recipient").map_err(&get)?,
        sender: row.try_get("sender").map_err(&get)?,
        subject: row.try_get("subject").map_err(&get)?,
        received_at: millis_to_utc(row.try_get("received_at_ms").map_err(&get)?)?,
        is_protected: row.try_get("is_protected").map_err(&get)?,
    })
}

#[async_trait]
impl CodeStore for SqliteStore {
    #[instrument(name = "SqliteStore::find_matching", skip_all, fields(keys = keys.len()))]
    async fn find_matching(&self, keys: &[DedupKey]) -> Result<Vec<DedupKey>> {
        let mut found = Vec::new();

        for chunk in keys.chunks(KEYS_PER_LOOKUP) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT code, recipient, received_at_ms FROM codes WHERE ",
            );
            let mut clauses = query.separated(" OR ");
            for key in chunk {
                clauses.push("(code = ");
                clauses.push_bind_unseparated(key.code.as_str());
                clauses.push_unseparated(" AND recipient = ");
                clauses.push_bind_unseparated(key.recipient.as_str());
                clauses.push_unseparated(" AND received_at_ms = ");
                clauses.push_bind_unseparated(key.received_at_ms);
                clauses.push_unseparated(")");
            }

            let rows = query
                .build()
                .fetch_all(&self.pool)
                .await
                .map_err(store_error("find_matching"))?;

            for row in &rows {
                let get = store_error("decode");
                found.push(DedupKey {
                    code: row.try_get("code").map_err(&get)?,
                    recipient: row.try_get("recipient").map_err(&get)?,
                    received_at_ms: row.try_get("received_at_ms").map_err(&get)?,
                });
            }
        }

        Ok(found)
    }

    #[instrument(name = "SqliteStore::insert_many", skip_all, fields(records = records.len()))]
    async fn insert_many(&self, records: Vec<CodeRecord>) -> Result<InsertReport> {
        let mut report = InsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let now_ms = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.map_err(store_error("insert"))?;

        for record in &records {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO codes
                    (code, recipient, sender, subject, received_at_ms, is_protected, created_at_ms)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.code)
            .bind(&record.recipient)
            .bind(&record.sender)
            .bind(&record.subject)
            .bind(record.received_at.timestamp_millis())
            .bind(record.is_protected)
            .bind(now_ms)
            .execute(&mut *tx)
            .await
            .map_err(store_error("insert"))?;

            if result.rows_affected() == 0 {
                report.duplicates += 1;
            } else {
                report.inserted += 1;
            }
        }

        tx.commit().await.map_err(store_error("insert"))?;
        debug!(inserted = report.inserted, duplicates = report.duplicates, "Insert committed");
        Ok(report)
    }

    #[instrument(name = "SqliteStore::find_recent", skip_all, fields(since = %since))]
    async fn find_recent(
        &self,
        since: DateTime<Utc>,
        filter: &RecentFilter,
    ) -> Result<Vec<CodeRecord>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT code, recipient, sender, subject, received_at_ms, is_protected \
             FROM codes WHERE received_at_ms > ",
        );
        query.push_bind(since.timestamp_millis());
        if let Some(recipient) = &filter.recipient {
            query.push(" AND recipient = ").push_bind(recipient.as_str());
        }
        query.push(" ORDER BY received_at_ms DESC, id DESC");
        if let Some(limit) = filter.limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(store_error("find_recent"))?;

        rows.iter().map(record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, to: &str, ms: i64) -> CodeRecord {
        CodeRecord {
            code: code.into(),
            recipient: to.into(),
            sender: Some("no-reply@acme.com".into()),
            subject: "Your code".into(),
            received_at: Utc.timestamp_millis_opt(ms).unwrap(),
            is_protected: code.starts_with('9'),
        }
    }

    #[tokio::test]
    async fn test_unique_key_is_enforced() {
        let store = SqliteStore::in_memory().await.unwrap();
        let r = record("482913", "user@example.com", 1_700_000_000_123);

        let first = store.insert_many(vec![r.clone()]).await.unwrap();
        let second = store.insert_many(vec![r.clone(), r]).await.unwrap();

        assert_eq!(first.inserted, 1);
        assert_eq!(second, InsertReport { inserted: 0, duplicates: 2 });
    }

    #[tokio::test]
    async fn test_round_trip_preserves_fields() {
        let store = SqliteStore::in_memory().await.unwrap();
        let r = record("912345", "user@example.com", 1_700_000_000_123);
        store.insert_many(vec![r.clone()]).await.unwrap();

        let since = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let found = store.find_recent(since, &RecentFilter::default()).await.unwrap();
        assert_eq!(found, vec![r]);
    }

    #[tokio::test]
    async fn test_window_bound_is_exclusive() {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_many(vec![
                record("111111", "user@example.com", 1_700_000_000_000),
                record("222222", "user@example.com", 1_700_000_000_001),
            ])
            .await
            .unwrap();

        let since = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let found = store.find_recent(since, &RecentFilter::default()).await.unwrap();
        let codes: Vec<&str> = found.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, ["222222"]);
    }
}

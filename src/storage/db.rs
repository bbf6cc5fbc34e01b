//! Direct database storage backend
//!
//! One synchronous insert per entry into a fixed-column table, no batching
//! across entries. Structured map fields are stored as JSON strings. The
//! backend can attach to a pool the host already manages or open its own
//! single-connection pool from an explicitly configured URL.

use crate::config::DbStorageConfig;
use crate::model::LogEntry;
use anyhow::{bail, Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub struct DbStorage {
    pool: SqlitePool,
    table: String,
}

impl DbStorage {
    /// Open a dedicated connection from the configured URL, independent of
    /// any pool the host application manages.
    pub async fn connect(cfg: &DbStorageConfig) -> Result<Self> {
        if cfg.url.is_empty() {
            bail!("db storage url must not be empty");
        }

        let options = SqliteConnectOptions::from_str(&cfg.url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to connect to api log database")?;

        Self::with_pool(pool, cfg).await
    }

    /// Attach to an existing pool.
    pub async fn with_pool(pool: SqlitePool, cfg: &DbStorageConfig) -> Result<Self> {
        let table = vet_table_name(&cfg.table_name)?;
        let storage = Self { pool, table };

        if cfg.auto_create_table {
            storage.create_table_if_not_exists().await;
        }

        Ok(storage)
    }

    /// Idempotent schema creation. Failures are warnings, not fatal: the
    /// table may already exist or the credential may lack DDL rights.
    async fn create_table_if_not_exists(&self) {
        let t = &self.table;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                id                    TEXT PRIMARY KEY,
                app_name              TEXT,
                url                   TEXT NOT NULL,
                method                TEXT NOT NULL,
                query_params          TEXT,
                request_headers       TEXT,
                request_body          TEXT,
                response_status       INTEGER NOT NULL,
                response_content_type TEXT,
                response_body         TEXT,
                request_time          TIMESTAMP NOT NULL,
                response_time         TIMESTAMP NOT NULL,
                processing_time_ms    INTEGER NOT NULL,
                server_name           TEXT,
                server_port           INTEGER,
                remote_addr           TEXT,
                created_at            TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )"
        );

        let indexes = [
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_request_time ON {t} (request_time)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_response_status ON {t} (response_status)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_method ON {t} (method)"),
            format!("CREATE INDEX IF NOT EXISTS idx_{t}_app_name ON {t} (app_name)"),
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{t}_processing_time_ms ON {t} (processing_time_ms)"
            ),
        ];

        if let Err(e) = sqlx::query(&ddl).execute(&self.pool).await {
            warn!(error = %e, table = %t, "could not create api log table; it may already exist");
            return;
        }
        for sql in &indexes {
            if let Err(e) = sqlx::query(sql).execute(&self.pool).await {
                warn!(error = %e, table = %t, "could not create api log index");
            }
        }
        info!(table = %t, "api log table is ready");
    }

    pub async fn save(&self, entry: &LogEntry) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} \
             (id, app_name, url, method, query_params, request_headers, request_body, \
              response_status, response_content_type, response_body, \
              request_time, response_time, processing_time_ms, \
              server_name, server_port, remote_addr) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        sqlx::query(&sql)
            .bind(&entry.id)
            .bind(&entry.app_name)
            .bind(&entry.url)
            .bind(&entry.method)
            .bind(serde_json::to_string(&entry.query_params)?)
            .bind(serde_json::to_string(&entry.request_headers)?)
            .bind(&entry.request_body)
            .bind(entry.response_status)
            .bind(&entry.response_content_type)
            .bind(&entry.response_body)
            .bind(entry.request_time)
            .bind(entry.response_time)
            .bind(entry.processing_time_ms)
            .bind(&entry.server_name)
            .bind(entry.server_port)
            .bind(&entry.remote_addr)
            .execute(&self.pool)
            .await
            .context("failed to insert api log entry")?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// The table name is the one identifier interpolated into SQL text, so it
/// is restricted to a safe identifier charset.
pub(crate) fn vet_table_name(name: &str) -> Result<String> {
    if name.is_empty() {
        bail!("db storage table_name must not be empty");
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().unwrap().is_ascii_digit();
    if !valid {
        bail!("db storage table_name '{name}' is not a valid identifier");
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::Row;
    use std::collections::HashMap;

    async fn memory_storage() -> DbStorage {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        DbStorage::with_pool(pool, &DbStorageConfig::default())
            .await
            .unwrap()
    }

    fn entry() -> LogEntry {
        let mut params = HashMap::new();
        params.insert("page".to_string(), vec!["1".to_string()]);
        LogEntry {
            id: LogEntry::new_id(),
            app_name: Some("shop".to_string()),
            url: "/api/orders".to_string(),
            method: "GET".to_string(),
            query_params: params,
            request_headers: HashMap::new(),
            request_body: None,
            response_status: 200,
            response_content_type: Some("application/json".to_string()),
            response_body: Some("{}".to_string()),
            request_time: Utc::now(),
            response_time: Utc::now(),
            processing_time_ms: 17,
            server_name: Some("api-1".to_string()),
            server_port: Some(8080),
            remote_addr: Some("10.0.0.9".to_string()),
        }
    }

    #[test]
    fn test_vet_table_name() {
        assert!(vet_table_name("api_logs").is_ok());
        assert!(vet_table_name("logs2").is_ok());
        assert!(vet_table_name("api-logs").is_err());
        assert!(vet_table_name("api logs; DROP TABLE x").is_err());
        assert!(vet_table_name("1logs").is_err());
        assert!(vet_table_name("").is_err());
    }

    #[tokio::test]
    async fn test_save_inserts_row() {
        let storage = memory_storage().await;
        let e = entry();
        storage.save(&e).await.unwrap();

        let row = sqlx::query("SELECT url, query_params, response_status FROM api_logs WHERE id = ?")
            .bind(&e.id)
            .fetch_one(storage.pool())
            .await
            .unwrap();

        assert_eq!(row.get::<String, _>("url"), "/api/orders");
        assert_eq!(row.get::<i32, _>("response_status"), 200);
        let params: HashMap<String, Vec<String>> =
            serde_json::from_str(&row.get::<String, _>("query_params")).unwrap();
        assert_eq!(params["page"], vec!["1"]);
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let cfg = DbStorageConfig::default();
        let _first = DbStorage::with_pool(pool.clone(), &cfg).await.unwrap();
        // second construction against the same database must not fail
        let second = DbStorage::with_pool(pool, &cfg).await.unwrap();
        second.save(&entry()).await.unwrap();
    }
}

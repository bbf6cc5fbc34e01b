//! Fan-out of log entries to every active storage backend

use super::{DbStorage, HttpStorage, LocalFileStorage, ObjectStorage, Storage};
use crate::config::ApiLogConfig;
use crate::model::LogEntry;
use anyhow::Result;
use sqlx::SqlitePool;
use tracing::{error, info};

/// Holds the active backends in configuration order and delivers each entry
/// to all of them. One backend's failure is logged with its identity and
/// never prevents the remaining backends from receiving the entry.
pub struct StorageDispatcher {
    storages: Vec<Storage>,
}

impl StorageDispatcher {
    pub fn new(storages: Vec<Storage>) -> Self {
        Self { storages }
    }

    /// Build every enabled backend from the configuration. Order is fixed:
    /// local file, object, database, HTTP forwarder.
    ///
    /// When `shared_pool` is given the database backend attaches to it;
    /// otherwise it opens its own connection from the configured URL.
    pub async fn from_config(
        cfg: &ApiLogConfig,
        shared_pool: Option<SqlitePool>,
    ) -> Result<Self> {
        let mut storages = Vec::new();
        let storage_cfg = &cfg.storage;

        if storage_cfg.local_file.enabled {
            storages.push(Storage::LocalFile(LocalFileStorage::new(
                &storage_cfg.local_file,
            )?));
        }
        if storage_cfg.object.enabled {
            storages.push(Storage::Object(ObjectStorage::new(&storage_cfg.object)?));
        }
        if storage_cfg.db.enabled {
            let db = match shared_pool {
                Some(pool) => DbStorage::with_pool(pool, &storage_cfg.db).await?,
                None => DbStorage::connect(&storage_cfg.db).await?,
            };
            storages.push(Storage::Db(db));
        }
        if storage_cfg.http.enabled {
            storages.push(Storage::Http(HttpStorage::new(&storage_cfg.http)?));
        }

        info!(backends = storages.len(), "storage dispatcher ready");
        Ok(Self::new(storages))
    }

    /// Deliver one entry to every backend in order.
    pub async fn dispatch(&self, entry: &LogEntry) {
        for storage in &self.storages {
            if let Err(e) = storage.save(entry).await {
                error!(
                    backend = storage.name(),
                    error = %e,
                    id = %entry.id,
                    "failed to save api log entry"
                );
            }
        }
    }

    /// Shut every backend down in order, draining buffered work.
    pub async fn shutdown(&self) {
        for storage in &self.storages {
            storage.shutdown().await;
        }
    }

    pub fn len(&self) -> usize {
        self.storages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DbStorageConfig, LocalFileStorageConfig, LogFileFormat};
    use chrono::Utc;
    use std::collections::HashMap;

    fn entry() -> LogEntry {
        LogEntry {
            id: LogEntry::new_id(),
            app_name: None,
            url: "/api/ping".to_string(),
            method: "GET".to_string(),
            query_params: HashMap::new(),
            request_headers: HashMap::new(),
            request_body: None,
            response_status: 200,
            response_content_type: None,
            response_body: None,
            request_time: Utc::now(),
            response_time: Utc::now(),
            processing_time_ms: 1,
            server_name: None,
            server_port: None,
            remote_addr: None,
        }
    }

    #[tokio::test]
    async fn test_failing_backend_does_not_block_siblings() {
        // a db backend with no table (creation disabled) fails on save
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let broken = DbStorage::with_pool(
            pool,
            &DbStorageConfig {
                auto_create_table: false,
                ..DbStorageConfig::default()
            },
        )
        .await
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let file = LocalFileStorage::new(&LocalFileStorageConfig {
            enabled: true,
            path: dir.path().to_string_lossy().into_owned(),
            logs_per_file: 1,
            format: LogFileFormat::Json,
            flush_interval_seconds: 0,
        })
        .unwrap();

        let dispatcher = StorageDispatcher::new(vec![Storage::Db(broken), Storage::LocalFile(file)]);
        dispatcher.dispatch(&entry()).await;

        // the file backend after the failing db backend still got the entry
        let written = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(written, 1);
    }

    #[tokio::test]
    async fn test_empty_dispatcher_is_a_no_op() {
        let dispatcher = StorageDispatcher::new(Vec::new());
        assert!(dispatcher.is_empty());
        dispatcher.dispatch(&entry()).await;
        dispatcher.shutdown().await;
    }
}

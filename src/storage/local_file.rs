//! Local-disk file storage backend
//!
//! Entries are buffered in memory and written out as a new file whenever the
//! buffer reaches `logs_per_file` entries. The batch is swapped out under the
//! buffer lock and rendered/written outside it, so a slow disk never holds
//! the lock. An optional timer flushes partial batches on a fixed interval;
//! remaining entries are drained at shutdown.
//!
//! A failed write is logged and the batch is dropped. Delivery to disk is
//! best-effort, at-most-once.

use super::file_writer::{self, BatchBuffer};
use crate::config::{LocalFileStorageConfig, LogFileFormat};
use crate::model::LogEntry;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub struct LocalFileStorage {
    inner: Arc<Inner>,
    flush_task: Option<JoinHandle<()>>,
}

struct Inner {
    dir: PathBuf,
    logs_per_file: usize,
    format: LogFileFormat,
    buffer: BatchBuffer,
}

impl LocalFileStorage {
    pub fn new(cfg: &LocalFileStorageConfig) -> Result<Self> {
        let dir = PathBuf::from(&cfg.path);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;

        let inner = Arc::new(Inner {
            dir,
            logs_per_file: cfg.logs_per_file.max(1),
            format: cfg.format,
            buffer: BatchBuffer::new(),
        });

        info!(
            path = %inner.dir.display(),
            logs_per_file = inner.logs_per_file,
            "local file storage initialized"
        );

        let flush_task = if cfg.flush_interval_seconds > 0 {
            let inner = inner.clone();
            let period = Duration::from_secs(cfg.flush_interval_seconds);
            Some(tokio::spawn(async move {
                let mut timer = tokio::time::interval(period);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                timer.tick().await; // first tick fires immediately
                loop {
                    timer.tick().await;
                    let batch = inner.buffer.drain();
                    if !batch.is_empty() {
                        inner.write_batch(batch).await;
                    }
                }
            }))
        } else {
            None
        };

        Ok(Self { inner, flush_task })
    }

    pub async fn save(&self, entry: &LogEntry) -> Result<()> {
        if let Some(batch) = self
            .inner
            .buffer
            .push(entry.clone(), self.inner.logs_per_file)
        {
            self.inner.write_batch(batch).await;
        }
        Ok(())
    }

    /// Cancel the periodic timer, then flush whatever is still pending.
    pub async fn shutdown(&self) {
        if let Some(task) = &self.flush_task {
            task.abort();
        }
        let batch = self.inner.buffer.drain();
        if !batch.is_empty() {
            self.inner.write_batch(batch).await;
        }
    }
}

impl Inner {
    async fn write_batch(&self, batch: Vec<LogEntry>) {
        let name = self.buffer.next_artifact_name(self.format);
        let path = self.dir.join(&name);

        let text = match file_writer::render(&batch, self.format) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, count = batch.len(), "failed to render log batch");
                return;
            }
        };

        match tokio::fs::write(&path, text).await {
            Ok(()) => {
                debug!(count = batch.len(), path = %path.display(), "wrote log batch");
            }
            Err(e) => {
                // entries are not re-queued; at-most-once by design
                error!(error = %e, path = %path.display(), "failed to write log batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn test_config(dir: &std::path::Path, logs_per_file: usize) -> LocalFileStorageConfig {
        LocalFileStorageConfig {
            enabled: true,
            path: dir.to_string_lossy().into_owned(),
            logs_per_file,
            format: LogFileFormat::Json,
            flush_interval_seconds: 0,
        }
    }

    fn entry(n: usize) -> LogEntry {
        LogEntry {
            id: format!("e{n}"),
            app_name: None,
            url: format!("/api/items/{n}"),
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

    async fn written_files(dir: &std::path::Path) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        let mut rd = tokio::fs::read_dir(dir).await.unwrap();
        while let Some(f) = rd.next_entry().await.unwrap() {
            let name = f.file_name().to_string_lossy().into_owned();
            let text = tokio::fs::read_to_string(f.path()).await.unwrap();
            out.push((name, text.lines().count()));
        }
        out.sort();
        out
    }

    #[tokio::test]
    async fn test_flushes_at_threshold_and_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(&test_config(dir.path(), 3)).unwrap();

        for n in 0..7 {
            storage.save(&entry(n)).await.unwrap();
        }
        // two full batches of 3 so far
        let files = written_files(dir.path()).await;
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|(_, lines)| *lines == 3));

        storage.shutdown().await;
        let files = written_files(dir.path()).await;
        assert_eq!(files.len(), 3);
        let mut sizes: Vec<usize> = files.iter().map(|(_, l)| *l).collect();
        sizes.sort();
        assert_eq!(sizes, vec![1, 3, 3]);
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_buffer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalFileStorage::new(&test_config(dir.path(), 5)).unwrap();
        storage.shutdown().await;
        assert!(written_files(dir.path()).await.is_empty());
    }

    #[tokio::test]
    async fn test_periodic_flush_drains_partial_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path(), 1000);
        cfg.flush_interval_seconds = 1;
        let storage = LocalFileStorage::new(&cfg).unwrap();

        storage.save(&entry(0)).await.unwrap();
        storage.save(&entry(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let files = written_files(dir.path()).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, 2);

        storage.shutdown().await;
    }

    #[tokio::test]
    async fn test_csv_format_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path(), 2);
        cfg.format = LogFileFormat::Csv;
        let storage = LocalFileStorage::new(&cfg).unwrap();

        storage.save(&entry(0)).await.unwrap();
        storage.save(&entry(1)).await.unwrap();

        let files = written_files(dir.path()).await;
        assert_eq!(files.len(), 1);
        assert!(files[0].0.ends_with(".csv"));
        // header + 2 rows
        assert_eq!(files[0].1, 3);
    }
}

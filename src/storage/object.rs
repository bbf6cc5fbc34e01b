//! Object storage backend
//!
//! Specialization of the file backend for an S3-compatible HTTP object
//! store: batches are buffered and rendered exactly like the local-file
//! backend, then uploaded as a single object `PUT
//! <endpoint>/<bucket>/<key_prefix><artifact>` with a bearer credential.
//!
//! Upload failures are logged and the batch is dropped (at-most-once, no
//! retries).

use super::file_writer::{self, BatchBuffer};
use crate::config::{LogFileFormat, ObjectStorageConfig};
use crate::model::LogEntry;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ObjectStorage {
    inner: Arc<Inner>,
    flush_task: Option<JoinHandle<()>>,
}

struct Inner {
    client: reqwest::Client,
    endpoint_url: String,
    access_key: String,
    bucket: String,
    key_prefix: String,
    logs_per_file: usize,
    format: LogFileFormat,
    buffer: BatchBuffer,
}

impl ObjectStorage {
    pub fn new(cfg: &ObjectStorageConfig) -> Result<Self> {
        if cfg.endpoint_url.is_empty() {
            bail!("object storage endpoint_url must not be empty");
        }
        if cfg.access_key.is_empty() {
            bail!("object storage access_key must not be empty");
        }
        if cfg.bucket.is_empty() {
            bail!("object storage bucket must not be empty");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        let inner = Arc::new(Inner {
            client,
            endpoint_url: cfg.endpoint_url.trim_end_matches('/').to_string(),
            access_key: cfg.access_key.clone(),
            bucket: cfg.bucket.clone(),
            key_prefix: cfg.key_prefix.clone(),
            logs_per_file: cfg.logs_per_file.max(1),
            format: cfg.format,
            buffer: BatchBuffer::new(),
        });

        info!(bucket = %inner.bucket, "object storage initialized");

        let flush_task = if cfg.flush_interval_seconds > 0 {
            let inner = inner.clone();
            let period = Duration::from_secs(cfg.flush_interval_seconds);
            Some(tokio::spawn(async move {
                let mut timer = tokio::time::interval(period);
                timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                timer.tick().await;
                loop {
                    timer.tick().await;
                    let batch = inner.buffer.drain();
                    if !batch.is_empty() {
                        inner.upload_batch(batch).await;
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
            self.inner.upload_batch(batch).await;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        if let Some(task) = &self.flush_task {
            task.abort();
        }
        let batch = self.inner.buffer.drain();
        if !batch.is_empty() {
            self.inner.upload_batch(batch).await;
        }
    }
}

impl Inner {
    async fn upload_batch(&self, batch: Vec<LogEntry>) {
        let key = format!(
            "{}{}",
            self.key_prefix,
            self.buffer.next_artifact_name(self.format)
        );

        let text = match file_writer::render(&batch, self.format) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, count = batch.len(), "failed to render log batch");
                return;
            }
        };

        let url = format!("{}/{}/{}", self.endpoint_url, self.bucket, key);
        let result = self
            .client
            .put(&url)
            .bearer_auth(&self.access_key)
            .header("Content-Type", file_writer::content_type(self.format))
            .body(text)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(count = batch.len(), key = %key, "uploaded log batch");
            }
            Ok(response) => {
                warn!(status = %response.status(), key = %key, "object upload rejected");
            }
            Err(e) => {
                error!(error = %e, key = %key, "failed to upload log batch");
            }
        }
    }
}

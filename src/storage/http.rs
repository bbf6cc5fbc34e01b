//! HTTP forwarder storage backend
//!
//! POSTs each entry as JSON to a remote endpoint (typically another apilog
//! instance's `/logs/receive`). In async mode (default) delivery happens on
//! a small fixed-size worker pool and `save` returns immediately; inline
//! mode blocks the caller until the POST completes or times out.
//!
//! Non-2xx responses are warnings, transport errors are errors; both are
//! swallowed. Fire-and-forget, at-most-once, no retries.

use crate::config::HttpStorageConfig;
use crate::model::LogEntry;
use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct HttpStorage {
    client: reqwest::Client,
    endpoint_url: String,
    /// Present in async mode until shutdown takes it to close the queue.
    sender: Mutex<Option<mpsc::UnboundedSender<LogEntry>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpStorage {
    pub fn new(cfg: &HttpStorageConfig) -> Result<Self> {
        if cfg.endpoint_url.is_empty() {
            bail!("http storage endpoint_url must not be empty");
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.timeout_ms))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;

        let (sender, workers) = if cfg.async_send {
            let (tx, rx) = mpsc::unbounded_channel::<LogEntry>();
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            let count = cfg.workers.max(1);

            let handles = (0..count)
                .map(|_| {
                    let client = client.clone();
                    let endpoint = cfg.endpoint_url.clone();
                    let rx = rx.clone();
                    tokio::spawn(async move {
                        loop {
                            let next = rx.lock().await.recv().await;
                            match next {
                                Some(entry) => send_entry(&client, &endpoint, &entry).await,
                                None => break,
                            }
                        }
                    })
                })
                .collect();

            info!(endpoint = %cfg.endpoint_url, workers = count, "http storage initialized (async)");
            (Some(tx), handles)
        } else {
            info!(endpoint = %cfg.endpoint_url, "http storage initialized (inline)");
            (None, Vec::new())
        };

        Ok(Self {
            client,
            endpoint_url: cfg.endpoint_url.clone(),
            sender: Mutex::new(sender),
            workers: Mutex::new(workers),
        })
    }

    /// Queue (async mode) or perform (inline mode) the POST. Delivery
    /// failures never reach the caller.
    pub async fn save(&self, entry: &LogEntry) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .expect("http storage lock poisoned")
            .clone();

        match sender {
            Some(tx) => {
                // send fails only after shutdown closed the queue
                let _ = tx.send(entry.clone());
            }
            None => send_entry(&self.client, &self.endpoint_url, entry).await,
        }
        Ok(())
    }

    /// Close the queue and drain the worker pool with a bounded grace
    /// period; pending work past the deadline is abandoned.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().expect("http storage lock poisoned").take();
        drop(sender);

        let workers = std::mem::take(&mut *self.workers.lock().expect("http storage lock poisoned"));
        if workers.is_empty() {
            return;
        }

        let drain = async {
            for handle in workers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("http storage shutdown grace period expired; abandoning pending deliveries");
        }
    }
}

async fn send_entry(client: &reqwest::Client, endpoint: &str, entry: &LogEntry) {
    let result = client
        .post(endpoint)
        .header("Content-Type", "application/json")
        .json(entry)
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            debug!(id = %entry.id, "forwarded api log entry");
        }
        Ok(response) => {
            warn!(status = %response.status(), endpoint = %endpoint, "http storage received non-2xx response");
        }
        Err(e) => {
            error!(error = %e, endpoint = %endpoint, "failed to POST api log entry");
        }
    }
}

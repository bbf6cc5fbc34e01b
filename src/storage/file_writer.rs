//! Batch rendering of log entries to JSONL or CSV text
//!
//! Shared by the local-file and object storage backends. Also owns the
//! [`BatchBuffer`] those backends use: a locked pending list plus a strictly
//! increasing artifact counter.

use crate::config::LogFileFormat;
use crate::model::LogEntry;
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

const CSV_HEADERS: &[&str] = &[
    "id",
    "url",
    "method",
    "query_params",
    "request_headers",
    "request_body",
    "response_status",
    "response_content_type",
    "response_body",
    "request_time",
    "response_time",
    "processing_time_ms",
    "server_name",
    "server_port",
    "remote_addr",
];

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Render a batch of entries in the given format.
pub fn render(entries: &[LogEntry], format: LogFileFormat) -> Result<String> {
    match format {
        LogFileFormat::Json => render_jsonl(entries),
        LogFileFormat::Csv => render_csv(entries),
    }
}

/// MIME type matching the rendered format.
pub fn content_type(format: LogFileFormat) -> &'static str {
    match format {
        LogFileFormat::Json => "application/x-ndjson",
        LogFileFormat::Csv => "text/csv",
    }
}

fn render_jsonl(entries: &[LogEntry]) -> Result<String> {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&serde_json::to_string(entry)?);
        out.push('\n');
    }
    Ok(out)
}

fn render_csv(entries: &[LogEntry]) -> Result<String> {
    let mut out = String::new();
    out.push_str(&CSV_HEADERS.join(","));
    out.push('\n');

    for entry in entries {
        let row = [
            csv_escape(&entry.id),
            csv_escape(&entry.url),
            csv_escape(&entry.method),
            csv_escape(&serde_json::to_string(&entry.query_params)?),
            csv_escape(&serde_json::to_string(&entry.request_headers)?),
            csv_escape(entry.request_body.as_deref().unwrap_or("")),
            entry.response_status.to_string(),
            csv_escape(entry.response_content_type.as_deref().unwrap_or("")),
            csv_escape(entry.response_body.as_deref().unwrap_or("")),
            entry.request_time.format(TIME_FORMAT).to_string(),
            entry.response_time.format(TIME_FORMAT).to_string(),
            entry.processing_time_ms.to_string(),
            csv_escape(entry.server_name.as_deref().unwrap_or("")),
            entry.server_port.map(|p| p.to_string()).unwrap_or_default(),
            csv_escape(entry.remote_addr.as_deref().unwrap_or("")),
        ]
        .join(",");
        out.push_str(&row);
        out.push('\n');
    }
    Ok(out)
}

/// RFC4180 escaping: fields containing a comma, quote or newline are wrapped
/// in quotes with internal quotes doubled.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Pending entries plus the artifact-name counter for one file/object backend.
///
/// Appends and swaps happen under the lock; rendering and I/O are done by the
/// owning backend outside the lock on the batch returned here.
pub struct BatchBuffer {
    entries: Mutex<Vec<LogEntry>>,
    counter: AtomicU64,
}

impl BatchBuffer {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Append one entry. When the buffer reaches `threshold` the pending
    /// batch is swapped out and returned for the caller to flush.
    pub fn push(&self, entry: LogEntry, threshold: usize) -> Option<Vec<LogEntry>> {
        let mut entries = self.entries.lock().expect("batch buffer lock poisoned");
        entries.push(entry);
        if entries.len() >= threshold {
            Some(std::mem::take(&mut *entries))
        } else {
            None
        }
    }

    /// Swap out whatever is pending (periodic flush and shutdown path).
    /// Returns an empty vec when there is nothing to do.
    pub fn drain(&self) -> Vec<LogEntry> {
        let mut entries = self.entries.lock().expect("batch buffer lock poisoned");
        std::mem::take(&mut *entries)
    }

    /// Produce the next unique artifact name:
    /// `api_log_<timestamp>_<counter>.<ext>`.
    pub fn next_artifact_name(&self, format: LogFileFormat) -> String {
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("api_log_{}_{}.{}", timestamp, counter, format.extension())
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new()
    }
}

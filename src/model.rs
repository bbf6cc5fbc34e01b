//! API log entry data model
//!
//! A [`LogEntry`] is an immutable record of one HTTP request/response
//! exchange. It is built once by the interception layer after the handler
//! has completed and then handed to every active storage backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Value substituted for masked headers and masked bodies.
pub const MASK_TOKEN: &str = "***";

/// Marker appended to bodies cut at `max_body_size`.
pub const TRUNCATION_MARKER: &str = "...[truncated]";

/// One captured HTTP exchange.
///
/// JSON field names are camelCase. This is the wire format used by the
/// `/logs/receive` ingest endpoint, the HTTP forwarder backend and the
/// JSONL file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unique identifier, stable once created.
    pub id: String,

    /// Logical name of the application that produced this entry.
    pub app_name: Option<String>,

    /// Request URI path (e.g. `/api/users`).
    pub url: String,

    /// HTTP method (GET, POST, ...).
    pub method: String,

    /// Query parameters, name -> all values.
    #[serde(default)]
    pub query_params: HashMap<String, Vec<String>>,

    /// Request headers. Values of configured mask headers are `"***"`.
    #[serde(default)]
    pub request_headers: HashMap<String, String>,

    /// Request body, masked or truncated. `None` when empty.
    pub request_body: Option<String>,

    /// HTTP response status code.
    pub response_status: i32,

    /// Content-Type of the response.
    pub response_content_type: Option<String>,

    /// Response body, masked or truncated. `None` when empty.
    pub response_body: Option<String>,

    /// Wall-clock time the request was received.
    pub request_time: DateTime<Utc>,

    /// Wall-clock time the response was sent.
    pub response_time: DateTime<Utc>,

    /// Processing duration in milliseconds, measured with a monotonic
    /// clock. Not derived from the wall-clock timestamps above.
    pub processing_time_ms: i64,

    /// Server host name.
    pub server_name: Option<String>,

    /// Server port.
    pub server_port: Option<i32>,

    /// Client remote IP address.
    pub remote_addr: Option<String>,
}

impl LogEntry {
    /// Generate a fresh entry id.
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Apply the configured header mask list to a captured header map.
///
/// Header names are compared case-insensitively; a matched header keeps its
/// name but has its value replaced with [`MASK_TOKEN`] in full.
pub fn mask_headers(
    headers: HashMap<String, String>,
    mask_list: &[String],
) -> HashMap<String, String> {
    headers
        .into_iter()
        .map(|(name, value)| {
            if mask_list.iter().any(|m| m.eq_ignore_ascii_case(&name)) {
                (name, MASK_TOKEN.to_string())
            } else {
                (name, value)
            }
        })
        .collect()
}

/// Convert captured body bytes into the string that gets logged.
///
/// Returns `None` for an empty body. When `masked` is set the whole body is
/// replaced with [`MASK_TOKEN`]; otherwise the body is decoded (lossy UTF-8)
/// and cut to `max_size` characters with [`TRUNCATION_MARKER`] appended.
/// Masking and truncation never compound.
pub fn extract_body(bytes: &[u8], masked: bool, max_size: usize) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }
    if masked {
        return Some(MASK_TOKEN.to_string());
    }
    let body = String::from_utf8_lossy(bytes);
    if body.chars().count() > max_size {
        let truncated: String = body.chars().take(max_size).collect();
        Some(format!("{truncated}{TRUNCATION_MARKER}"))
    } else {
        Some(body.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_mask_headers_case_insensitive() {
        let masked = mask_headers(
            headers(&[("Authorization", "Bearer xyz"), ("Accept", "*/*")]),
            &["authorization".to_string()],
        );
        assert_eq!(masked["Authorization"], "***");
        assert_eq!(masked["Accept"], "*/*");
    }

    #[test]
    fn test_mask_headers_unmatched_kept() {
        let masked = mask_headers(
            headers(&[("Cookie", "session=1"), ("X-Trace", "abc")]),
            &["Authorization".to_string()],
        );
        assert_eq!(masked["Cookie"], "session=1");
        assert_eq!(masked["X-Trace"], "abc");
    }

    #[test]
    fn test_extract_body_empty() {
        assert_eq!(extract_body(b"", false, 100), None);
    }

    #[test]
    fn test_extract_body_masked() {
        assert_eq!(
            extract_body(b"secret payload", true, 100),
            Some("***".to_string())
        );
    }

    #[test]
    fn test_extract_body_truncated() {
        assert_eq!(
            extract_body(b"0123456789ABCDEF", false, 10),
            Some("0123456789...[truncated]".to_string())
        );
    }

    #[test]
    fn test_extract_body_exact_size_not_truncated() {
        assert_eq!(
            extract_body(b"0123456789", false, 10),
            Some("0123456789".to_string())
        );
    }

    #[test]
    fn test_extract_body_masked_never_truncates() {
        // masking wins; the mask token is never cut down further
        assert_eq!(extract_body(b"0123456789ABCDEF", true, 1), Some("***".to_string()));
    }

    #[test]
    fn test_entry_json_uses_camel_case() {
        let entry = LogEntry {
            id: LogEntry::new_id(),
            app_name: Some("shop".to_string()),
            url: "/api/orders".to_string(),
            method: "GET".to_string(),
            query_params: HashMap::new(),
            request_headers: HashMap::new(),
            request_body: None,
            response_status: 200,
            response_content_type: Some("application/json".to_string()),
            response_body: None,
            request_time: Utc::now(),
            response_time: Utc::now(),
            processing_time_ms: 12,
            server_name: None,
            server_port: None,
            remote_addr: None,
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("appName").is_some());
        assert!(json.get("responseStatus").is_some());
        assert!(json.get("processingTimeMs").is_some());
        assert!(json.get("app_name").is_none());
    }
}

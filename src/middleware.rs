//! Interception layer
//!
//! Axum middleware that captures one [`LogEntry`] per eligible request.
//! The request body is snapshotted and replayed to the handler byte for
//! byte; the response body is buffered in full and released to the client
//! exactly once, after the entry has been dispatched. Entry-construction
//! and backend failures are logged and never reach the client.
//!
//! The response buffer holds the complete body regardless of
//! `max_body_size`; that limit only applies to the string recorded in the
//! entry.

use crate::config::ApiLogConfig;
use crate::model::{self, LogEntry};
use crate::pattern::path_matches;
use crate::storage::StorageDispatcher;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// Shared state for the interception layer.
#[derive(Clone)]
pub struct ApiLogState {
    pub config: Arc<ApiLogConfig>,
    pub dispatcher: Arc<StorageDispatcher>,
}

pub async fn api_log_middleware(
    State(state): State<ApiLogState>,
    req: Request,
    next: Next,
) -> Response {
    let cfg = &state.config;
    let path = req.uri().path().to_string();

    if !cfg.enabled || !is_included(cfg, &path) || is_excluded(cfg, &path) {
        return next.run(req).await;
    }

    // snapshot request metadata before the body is consumed
    let method = req.method().as_str().to_string();
    let uri = req.uri().clone();
    let raw_headers = collect_headers(req.headers());
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    let (parts, body) = req.into_parts();
    let req_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, path = %path, "failed to read request body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let req = Request::from_parts(parts, Body::from(req_bytes.clone()));

    let request_time = Utc::now();
    let started = Instant::now();

    let response = next.run(req).await;

    // duration from the monotonic clock, not the wall-clock timestamps
    let processing_time_ms = started.elapsed().as_millis() as i64;
    let response_time = Utc::now();

    let response_status = response.status().as_u16() as i32;
    let response_content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let (res_parts, res_body) = response.into_parts();
    let res_bytes = match axum::body::to_bytes(res_body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, path = %path, "failed to buffer response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match build_entry(BuildInput {
        cfg,
        method,
        uri: &uri,
        raw_headers,
        request_body: &req_bytes,
        response_status,
        response_content_type,
        response_body: &res_bytes,
        request_time,
        response_time,
        processing_time_ms,
        remote_addr,
    }) {
        Ok(entry) => state.dispatcher.dispatch(&entry).await,
        Err(e) => {
            // drop the entry; the client response is unaffected
            error!(error = %e, path = %path, "failed to build api log entry");
        }
    }

    Response::from_parts(res_parts, Body::from(res_bytes))
}

fn is_included(cfg: &ApiLogConfig, path: &str) -> bool {
    if cfg.include_paths.is_empty() {
        return true;
    }
    cfg.include_paths.iter().any(|p| path_matches(p, path))
}

fn is_excluded(cfg: &ApiLogConfig, path: &str) -> bool {
    cfg.exclude_paths.iter().any(|p| path_matches(p, path))
}

/// First value per header name, lossy-decoded.
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        map.entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    map
}

struct BuildInput<'a> {
    cfg: &'a ApiLogConfig,
    method: String,
    uri: &'a Uri,
    raw_headers: HashMap<String, String>,
    request_body: &'a [u8],
    response_status: i32,
    response_content_type: Option<String>,
    response_body: &'a [u8],
    request_time: DateTime<Utc>,
    response_time: DateTime<Utc>,
    processing_time_ms: i64,
    remote_addr: Option<String>,
}

fn build_entry(input: BuildInput<'_>) -> anyhow::Result<LogEntry> {
    let cfg = input.cfg;

    let (server_name, server_port) = input
        .raw_headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| split_host_port(value))
        .unwrap_or((None, None));

    let query_params = parse_query_params(input.uri);
    let request_headers = model::mask_headers(input.raw_headers, &cfg.mask_headers);

    let request_body = model::extract_body(
        input.request_body,
        cfg.mask_request_body,
        cfg.max_body_size,
    );
    let response_body = model::extract_body(
        input.response_body,
        cfg.mask_response_body,
        cfg.max_body_size,
    );

    Ok(LogEntry {
        id: LogEntry::new_id(),
        app_name: if cfg.app_name.is_empty() {
            None
        } else {
            Some(cfg.app_name.clone())
        },
        url: input.uri.path().to_string(),
        method: input.method,
        query_params,
        request_headers,
        request_body,
        response_status: input.response_status,
        response_content_type: input.response_content_type,
        response_body,
        request_time: input.request_time,
        response_time: input.response_time,
        processing_time_ms: input.processing_time_ms,
        server_name,
        server_port,
        remote_addr: input.remote_addr,
    })
}

fn parse_query_params(uri: &Uri) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(query) = uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }
    params
}

fn split_host_port(host: &str) -> (Option<String>, Option<i32>) {
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse::<i32>() {
            Ok(port) if !name.contains(':') => (Some(name.to_string()), Some(port)),
            _ => (Some(host.to_string()), None),
        },
        None => (Some(host.to_string()), None),
    }
}

//! HTTP handlers for the view API
//!
//! Mounted under the configured base path (default `/apilog`). `receive`
//! accepts entries forwarded by the HTTP storage backend of another
//! instance and fans them out to this instance's backends.

use super::service::{LogQuery, LogQueryService, StatsQuery};
use crate::error::AppError;
use crate::model::LogEntry;
use crate::storage::StorageDispatcher;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone)]
pub struct ViewState {
    pub service: Arc<LogQueryService>,
    pub dispatcher: Arc<StorageDispatcher>,
}

pub fn routes() -> Router<ViewState> {
    Router::new()
        .route("/logs/receive", post(receive_log))
        .route("/logs", get(query_logs))
        .route("/logs/stats", get(get_stats))
        .route("/logs/apps", get(list_apps))
        .route("/logs/:id", get(get_log))
}

async fn receive_log(State(state): State<ViewState>, Json(entry): Json<LogEntry>) -> StatusCode {
    debug!(id = %entry.id, "received forwarded api log entry");
    state.dispatcher.dispatch(&entry).await;
    StatusCode::ACCEPTED
}

async fn query_logs(
    State(state): State<ViewState>,
    Query(query): Query<LogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = state.service.query_logs(&query).await?;
    Ok(Json(page))
}

async fn get_log(
    State(state): State<ViewState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let entry = state
        .service
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no api log entry with id '{id}'")))?;
    Ok(Json(entry))
}

async fn get_stats(
    State(state): State<ViewState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let stats = state.service.stats(&query).await?;
    Ok(Json(stats))
}

async fn list_apps(State(state): State<ViewState>) -> Result<impl IntoResponse, AppError> {
    let apps = state.service.list_apps().await?;
    Ok(Json(apps))
}

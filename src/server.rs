use anyhow::Result;
use axum::{
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::Config,
    middleware::{api_log_middleware, ApiLogState},
    storage::StorageDispatcher,
    view::{self, LogQueryService, ViewState},
};

/// Start the apilog server
///
/// This function:
/// 1. Opens the shared database pool when the db backend or view is enabled
/// 2. Builds the storage dispatcher from the configuration
/// 3. Creates the Axum application (demo routes, optional view API,
///    interception layer)
/// 4. Serves requests with graceful shutdown, then drains the backends
pub async fn start_server(config: Config) -> Result<()> {
    let apilog = Arc::new(config.apilog.clone());

    // one pool shared by the db backend and the view service
    let pool = if apilog.storage.db.enabled || apilog.view.enabled {
        Some(open_pool(&apilog.storage.db.url).await?)
    } else {
        None
    };

    let dispatcher = Arc::new(StorageDispatcher::from_config(&apilog, pool.clone()).await?);
    info!(
        backends = dispatcher.len(),
        view = apilog.view.enabled,
        "apilog pipeline configured"
    );

    let app = create_router(apilog.clone(), dispatcher.clone(), pool)?;

    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting apilog server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Draining storage backends...");
    dispatcher.shutdown().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the Axum router with all routes and middleware
fn create_router(
    apilog: Arc<crate::config::ApiLogConfig>,
    dispatcher: Arc<StorageDispatcher>,
    pool: Option<SqlitePool>,
) -> Result<Router> {
    let mut app = Router::new().route("/health", get(health_check));

    if apilog.view.enabled {
        let pool = pool.ok_or_else(|| anyhow::anyhow!("view API requires a database pool"))?;
        let service = Arc::new(LogQueryService::new(pool, &apilog.storage.db.table_name)?);
        let view_state = ViewState {
            service,
            dispatcher: dispatcher.clone(),
        };
        let view_routes = view::routes()
            .layer(CorsLayer::permissive())
            .with_state(view_state);
        app = app.nest(&apilog.view.base_path, view_routes);
    }

    let log_state = ApiLogState {
        config: apilog,
        dispatcher,
    };

    Ok(app
        .layer(middleware::from_fn_with_state(log_state, api_log_middleware))
        .layer(TraceLayer::new_for_http()))
}

async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn open_pool(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining connections...");
}

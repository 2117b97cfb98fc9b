//! HTTP API
//!
//! JSON over HTTP for the presentation layer, plus server-sent event streams
//! for live run output. Errors are returned as `{"error", "code"}` bodies.
//!
//! | Route | Method |
//! |-------|--------|
//! | `/api/workspaces` | GET, POST |
//! | `/api/workspaces/{id}` | GET, PUT, DELETE |
//! | `/api/workspaces/{id}/runs` | GET, POST |
//! | `/api/runs/{id}` | GET, DELETE |
//! | `/api/runs/{id}/output` | GET |
//! | `/api/runs/{id}/cancel` | POST |
//! | `/api/runs/{id}/events` | GET (SSE) |
//! | `/api/events` | GET (SSE) |
//! | `/api/tools`, `/api/tools/health`, `/api/tools/{name}/docs` | GET |
//! | `/api/privilege` | GET |
//! | `/health`, `/metrics` | GET |

mod error;
mod events;
mod handlers;

pub use error::{ApiError, ApiErrorBody};
pub use handlers::{HealthStatus, StartRunRequest};

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::Nser;

/// Build the router; `/metrics` is mounted only when enabled in config
pub fn router(app: Nser) -> Router {
    let api = Router::new()
        .route(
            "/workspaces",
            get(handlers::list_workspaces).post(handlers::create_workspace),
        )
        .route(
            "/workspaces/{id}",
            get(handlers::get_workspace)
                .put(handlers::update_workspace)
                .delete(handlers::delete_workspace),
        )
        .route(
            "/workspaces/{id}/runs",
            get(handlers::run_history).post(handlers::start_run),
        )
        .route(
            "/runs/{id}",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route("/runs/{id}/output", get(handlers::run_output))
        .route("/runs/{id}/cancel", post(handlers::cancel_run))
        .route("/runs/{id}/events", get(events::run_events))
        .route("/events", get(events::all_events))
        .route("/tools", get(handlers::list_tools))
        .route("/tools/health", get(handlers::tool_health))
        .route("/tools/{name}/docs", get(handlers::tool_docs))
        .route("/privilege", get(handlers::privilege));

    let mut router = Router::new()
        .nest("/api", api)
        .route("/health", get(handlers::health));
    if app.config().metrics.enabled {
        router = router.route("/metrics", get(handlers::metrics_handler));
    }
    router.layer(TraceLayer::new_for_http()).with_state(app)
}

/// Serve the API until the process is stopped
///
/// # Arguments
/// * `app` - Service handle shared by all requests
/// * `host` - Bind address
/// * `port` - Bind port, 0 for any free port
pub async fn serve(app: Nser, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .with_context(|| format!("Failed to bind API server to {}:{}", host, port))?;
    let addr = listener
        .local_addr()
        .context("Failed to read bound address")?;

    info!("Starting API server on http://{}", addr);

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

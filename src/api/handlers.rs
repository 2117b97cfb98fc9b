// JSON handlers for workspaces, runs and tools

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::error::ApiError;
use crate::app::Nser;
use crate::engine::StartedRun;
use crate::metrics;
use crate::storage::{CommandRun, NewWorkspace, ToolDocs, Workspace};
use crate::tools::{PrivilegeInfo, ToolDefinition, ToolHealth};

type ApiResult<T> = Result<T, ApiError>;

/// Body of `POST /api/workspaces/{id}/runs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunRequest {
    pub tool_name: String,
    pub target: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
    pub active_runs: usize,
}

// Workspaces

pub(crate) async fn list_workspaces(State(app): State<Nser>) -> ApiResult<Json<Vec<Workspace>>> {
    Ok(Json(app.list_workspaces().await?))
}

pub(crate) async fn create_workspace(
    State(app): State<Nser>,
    Json(input): Json<NewWorkspace>,
) -> ApiResult<(StatusCode, Json<Workspace>)> {
    let workspace = app.create_workspace(input).await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

pub(crate) async fn get_workspace(
    State(app): State<Nser>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(app.get_workspace(id).await?))
}

pub(crate) async fn update_workspace(
    State(app): State<Nser>,
    Path(id): Path<i64>,
    Json(input): Json<NewWorkspace>,
) -> ApiResult<Json<Workspace>> {
    Ok(Json(app.update_workspace(id, input).await?))
}

pub(crate) async fn delete_workspace(
    State(app): State<Nser>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    app.delete_workspace(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Runs

pub(crate) async fn run_history(
    State(app): State<Nser>,
    Path(workspace_id): Path<i64>,
) -> ApiResult<Json<Vec<CommandRun>>> {
    Ok(Json(app.run_history(workspace_id).await?))
}

pub(crate) async fn start_run(
    State(app): State<Nser>,
    Path(workspace_id): Path<i64>,
    Json(req): Json<StartRunRequest>,
) -> ApiResult<(StatusCode, Json<StartedRun>)> {
    let started = app
        .start_run(workspace_id, &req.tool_name, &req.target, &req.args)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

pub(crate) async fn get_run(
    State(app): State<Nser>,
    Path(run_id): Path<i64>,
) -> ApiResult<Json<CommandRun>> {
    Ok(Json(app.get_run(run_id).await?))
}

pub(crate) async fn run_output(
    State(app): State<Nser>,
    Path(run_id): Path<i64>,
) -> ApiResult<Response> {
    let output = app.run_output(run_id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        output,
    )
        .into_response())
}

pub(crate) async fn delete_run(
    State(app): State<Nser>,
    Path(run_id): Path<i64>,
) -> ApiResult<StatusCode> {
    app.delete_run(run_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn cancel_run(
    State(app): State<Nser>,
    Path(run_id): Path<i64>,
) -> ApiResult<StatusCode> {
    app.cancel_run(run_id).await?;
    Ok(StatusCode::ACCEPTED)
}

// Tools

pub(crate) async fn list_tools(State(app): State<Nser>) -> Json<Vec<ToolDefinition>> {
    Json(app.list_tools().to_vec())
}

pub(crate) async fn tool_health(State(app): State<Nser>) -> Json<Vec<ToolHealth>> {
    Json(app.tool_health().await)
}

pub(crate) async fn tool_docs(
    State(app): State<Nser>,
    Path(name): Path<String>,
) -> ApiResult<Json<ToolDocs>> {
    Ok(Json(app.documentation(&name).await?))
}

pub(crate) async fn privilege(State(app): State<Nser>) -> Json<PrivilegeInfo> {
    Json(app.privilege())
}

// Service

pub(crate) async fn health(State(app): State<Nser>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_runs: app.engine().active_runs().len(),
    })
}

pub(crate) async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

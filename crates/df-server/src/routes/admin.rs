//! Admin views: service occupancy, recent failures and engine discovery.

use axum::extract::{Query, State};
use axum::Json;
use df_convert::ToolInfo;
use df_core::events::{Event, FailureRecord};
use df_jobs::ServiceStatus;
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::AppError;

/// Query parameters for the event and failure logs.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /api/admin/status
#[utoipa::path(
    get,
    path = "/api/admin/status",
    responses(
        (status = 200, description = "Worker, queue and workspace occupancy", body = ServiceStatus)
    )
)]
pub async fn status(State(ctx): State<AppContext>) -> Json<ServiceStatus> {
    Json(ctx.service.status())
}

/// GET /api/admin/errors
#[utoipa::path(
    get,
    path = "/api/admin/errors",
    params(LogParams),
    responses(
        (status = 200, description = "Most recent failures, newest first", body = Vec<FailureRecord>)
    )
)]
pub async fn errors(
    State(ctx): State<AppContext>,
    Query(params): Query<LogParams>,
) -> Json<Vec<FailureRecord>> {
    Json(ctx.event_bus.recent_failures(params.limit))
}

/// GET /api/admin/events
#[utoipa::path(
    get,
    path = "/api/admin/events",
    params(LogParams),
    responses(
        (status = 200, description = "Most recent job lifecycle events, newest first", body = Vec<Event>)
    )
)]
pub async fn events(
    State(ctx): State<AppContext>,
    Query(params): Query<LogParams>,
) -> Json<Vec<Event>> {
    Json(ctx.event_bus.recent_events(params.limit))
}

/// GET /api/admin/tools
#[utoipa::path(
    get,
    path = "/api/admin/tools",
    responses(
        (status = 200, description = "Engine availability", body = Vec<ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Result<Json<Vec<ToolInfo>>, AppError> {
    // `check_all` runs `--version` on every engine binary.
    let tools = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| df_core::Error::Internal(format!("tool check failed: {e}")))?;
    Ok(Json(infos))
}

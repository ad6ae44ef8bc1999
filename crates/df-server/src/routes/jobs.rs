//! Asynchronous job API: submit, poll, download.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use df_core::{Error, JobId, JobSnapshot};
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::{AppError, ResultExt};
use crate::middleware::request_id::RequestId;
use crate::routes::conversions::{document_response, ConvertParams};

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

fn parse_job_id(raw: &str) -> df_core::Result<JobId> {
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid job id '{raw}'")))
}

/// POST /api/jobs
#[utoipa::path(
    post,
    path = "/api/jobs",
    params(ConvertParams),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Source document"),
    responses(
        (status = 202, description = "Job queued", body = JobSnapshot),
        (status = 415, description = "Unsupported format pair"),
        (status = 503, description = "Queue full; retry later")
    )
)]
pub async fn submit_job(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<ConvertParams>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request = params.into_request(body).tagged(&request_id)?;
    let snapshot = ctx
        .service
        .dispatcher()
        .enqueue_detached(request)
        .tagged(&request_id)?;

    tracing::info!(job_id = %snapshot.id, "Job accepted");
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/jobs
#[utoipa::path(
    get,
    path = "/api/jobs",
    params(ListJobsParams),
    responses(
        (status = 200, description = "Recent jobs, newest first", body = Vec<JobSnapshot>)
    )
)]
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsParams>,
) -> Json<Vec<JobSnapshot>> {
    Json(ctx.service.registry().list(params.limit))
}

/// GET /api/jobs/{id}
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job status", body = JobSnapshot),
        (status = 404, description = "Unknown job")
    )
)]
pub async fn get_job(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<JobSnapshot>, AppError> {
    let job_id = parse_job_id(&id).tagged(&request_id)?;
    let snapshot = ctx
        .service
        .registry()
        .get(job_id)
        .ok_or_else(|| Error::not_found("job", job_id))
        .tagged(&request_id)?;
    Ok(Json(snapshot))
}

/// GET /api/jobs/{id}/result
#[utoipa::path(
    get,
    path = "/api/jobs/{id}/result",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Converted document", content_type = "application/octet-stream"),
        (status = 404, description = "Unknown job or result already downloaded"),
        (status = 409, description = "Job not finished or failed")
    )
)]
pub async fn get_job_result(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job_id = parse_job_id(&id).tagged(&request_id)?;
    let registry = ctx.service.registry();
    let snapshot = registry
        .get(job_id)
        .ok_or_else(|| Error::not_found("job", job_id))
        .tagged(&request_id)?;
    let bytes = registry.take_result(job_id).tagged(&request_id)?;

    tracing::debug!(job_id = %job_id, bytes = bytes.len(), "Result downloaded");
    Ok(document_response(
        bytes,
        snapshot.target,
        job_id,
        snapshot.attempts,
        snapshot.filename.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_parsing() {
        let id = JobId::new();
        assert_eq!(parse_job_id(&id.to_string()).unwrap(), id);
        assert!(matches!(
            parse_job_id("not-a-uuid").unwrap_err(),
            Error::Validation(_)
        ));
    }
}

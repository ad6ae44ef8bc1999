//! Axum router construction.
//!
//! Builds the full application router with all route groups, middleware
//! layers and the OpenAPI document.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    info(title = "docforge", description = "Document conversion service"),
    paths(
        routes::health::health_check,
        routes::formats::list_formats,
        routes::conversions::convert,
        routes::jobs::submit_job,
        routes::jobs::list_jobs,
        routes::jobs::get_job,
        routes::jobs::get_job_result,
        routes::admin::status,
        routes::admin::errors,
        routes::admin::events,
        routes::admin::tools,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::formats::FormatInfo,
        routes::formats::FormatsResponse,
        df_core::JobId,
        df_core::JobSnapshot,
        df_core::JobStatus,
        df_core::DocumentFormat,
        df_core::job::FailureDetail,
        df_core::events::Event,
        df_core::events::EventPayload,
        df_core::events::FailureRecord,
        df_jobs::ServiceStatus,
        df_convert::ToolInfo,
    ))
)]
pub struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let body_limit = ctx.config.server.max_upload_bytes;

    let api = Router::new()
        .route("/formats", get(routes::formats::list_formats))
        // Conversions
        .route("/convert", post(routes::conversions::convert))
        // Jobs
        .route(
            "/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::submit_job),
        )
        .route("/jobs/{id}", get(routes::jobs::get_job))
        .route("/jobs/{id}/result", get(routes::jobs::get_job_result))
        // Admin
        .route("/admin/status", get(routes::admin::status))
        .route("/admin/errors", get(routes::admin::errors))
        .route("/admin/events", get(routes::admin::events))
        .route("/admin/tools", get(routes::admin::tools));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

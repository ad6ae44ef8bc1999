//! Supported format listing.

use axum::extract::State;
use axum::Json;
use df_core::DocumentFormat;
use serde::Serialize;

use crate::context::AppContext;

/// One format as advertised to clients.
#[derive(Serialize, utoipa::ToSchema)]
pub struct FormatInfo {
    pub format: DocumentFormat,
    pub extension: &'static str,
    pub mime_type: &'static str,
}

impl From<DocumentFormat> for FormatInfo {
    fn from(format: DocumentFormat) -> Self {
        Self {
            format,
            extension: format.extension(),
            mime_type: format.mime_type(),
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct FormatsResponse {
    pub sources: Vec<FormatInfo>,
    pub targets: Vec<FormatInfo>,
}

/// GET /api/formats
#[utoipa::path(
    get,
    path = "/api/formats",
    responses(
        (status = 200, description = "Accepted source and target formats", body = FormatsResponse)
    )
)]
pub async fn list_formats(State(ctx): State<AppContext>) -> Json<FormatsResponse> {
    let formats = ctx.service.dispatcher().formats();
    Json(FormatsResponse {
        sources: formats.sources.iter().copied().map(FormatInfo::from).collect(),
        targets: formats.targets.iter().copied().map(FormatInfo::from).collect(),
    })
}

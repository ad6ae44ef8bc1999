//! Synchronous conversion endpoint.
//!
//! The request body is the raw document; the response body is the converted
//! document. Format tags come from the query string, with the source falling
//! back to the uploaded filename's extension.

use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use bytes::Bytes;
use df_core::{DocumentFormat, Error, JobId};
use df_jobs::ConversionRequest;
use serde::Deserialize;

use crate::context::AppContext;
use crate::error::{AppError, ResultExt};
use crate::middleware::request_id::RequestId;

/// Response header carrying the job id.
pub static X_JOB_ID: HeaderName = HeaderName::from_static("x-docforge-job-id");

/// Response header carrying the number of engine invocations used.
pub static X_ATTEMPTS: HeaderName = HeaderName::from_static("x-docforge-attempts");

/// Query parameters shared by the conversion and job submission endpoints.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConvertParams {
    /// Source format tag; inferred from `filename` when omitted.
    pub from: Option<String>,
    /// Target format tag.
    pub to: Option<String>,
    /// Original file name, used for the download name.
    pub filename: Option<String>,
}

impl ConvertParams {
    /// Turn the query plus body into a dispatcher request.
    pub(crate) fn into_request(self, body: Bytes) -> df_core::Result<ConversionRequest> {
        let target = self
            .to
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Validation("missing 'to' format".into()))?;

        let source = match self.from.filter(|f| !f.trim().is_empty()) {
            Some(source) => source,
            None => self
                .filename
                .as_deref()
                .and_then(extension_of)
                .ok_or_else(|| {
                    Error::Validation(
                        "missing 'from' format and the filename has no extension".into(),
                    )
                })?,
        };

        Ok(ConversionRequest::new(body, source, target).with_filename(self.filename))
    }
}

/// POST /api/convert
#[utoipa::path(
    post,
    path = "/api/convert",
    params(ConvertParams),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Source document"),
    responses(
        (status = 200, description = "Converted document", content_type = "application/octet-stream"),
        (status = 400, description = "Missing format or empty body"),
        (status = 413, description = "Upload too large"),
        (status = 415, description = "Unsupported format pair"),
        (status = 502, description = "Engine crashed or produced no output"),
        (status = 503, description = "Queue full; retry later"),
        (status = 504, description = "Engine timed out")
    )
)]
pub async fn convert(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<ConvertParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    let request = params.into_request(body).tagged(&request_id)?;
    let filename = request.filename.clone();

    tracing::info!(
        from = %request.source,
        to = %request.target,
        bytes = request.input.len(),
        "Conversion requested"
    );

    let doc = ctx.service.submit(request).await.tagged(&request_id)?;
    Ok(document_response(
        doc.bytes,
        doc.format,
        doc.job_id,
        doc.attempts,
        filename.as_deref(),
    ))
}

/// Build the download response for a converted document.
pub(crate) fn document_response(
    bytes: Bytes,
    format: DocumentFormat,
    job_id: JobId,
    attempts: u32,
    filename: Option<&str>,
) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(format.mime_type()));
    if let Ok(value) = HeaderValue::from_str(&job_id.to_string()) {
        headers.insert(X_JOB_ID.clone(), value);
    }
    headers.insert(X_ATTEMPTS.clone(), HeaderValue::from(attempts));
    if let Some(name) = filename {
        let disposition = format!("attachment; filename=\"{}\"", download_name(name, format));
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(CONTENT_DISPOSITION, value);
        }
    }

    (headers, bytes).into_response()
}

/// `report.doc` + docx -> `report.docx`, reduced to header-safe characters.
pub(crate) fn download_name(filename: &str, format: DocumentFormat) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => base,
    };

    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == ' ');

    let stem = if cleaned.is_empty() { "document" } else { cleaned };
    format!("{stem}.{}", format.extension())
}

fn extension_of(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next()?;
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

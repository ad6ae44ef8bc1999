//! Error-to-HTTP response conversion.
//!
//! [`AppError`] wraps [`df_core::Error`] so route handlers can return
//! `Result<T, AppError>` and have failures rendered as
//! `{"error", "code", "request_id"}` with the status from
//! [`df_core::Error::http_status`].

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::RequestId;

/// Seconds a client is asked to wait after an `overloaded` rejection.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: df_core::Error,
    request_id: Option<String>,
}

impl AppError {
    pub fn new(inner: df_core::Error) -> Self {
        Self {
            inner,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn inner(&self) -> &df_core::Error {
        &self.inner
    }
}

impl From<df_core::Error> for AppError {
    fn from(e: df_core::Error) -> Self {
        Self::new(e)
    }
}

/// Attach the current request id to a failed result.
pub trait ResultExt<T> {
    fn tagged(self, request_id: &RequestId) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for df_core::Result<T> {
    fn tagged(self, request_id: &RequestId) -> Result<T, AppError> {
        self.map_err(|e| AppError::new(e).with_request_id(request_id.0.clone()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                code = self.inner.code(),
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": self.request_id,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if matches!(self.inner, df_core::Error::Overloaded(_)) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

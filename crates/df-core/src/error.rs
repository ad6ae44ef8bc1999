//! Unified error type for the docforge service.
//!
//! All crates funnel their failures into [`Error`]. Each variant maps to a
//! stable taxonomy code via [`Error::code`] and to an HTTP status via
//! [`Error::http_status`], so the API layer can render failures without
//! knowing where they came from.

use std::fmt;
use std::time::Duration;

/// Unified error type covering all failure modes in docforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested source/target format pair is not supported.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The job queue is full (or closed); the caller should back off.
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// The engine exceeded its time budget on every attempt.
    #[error("Conversion timed out after {:.1}s", .after.as_secs_f64())]
    TimedOut {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The engine exited with a non-zero status (or was killed by a signal).
    #[error("Converter crashed ({}): {diagnostics}", describe_exit(*.exit_code))]
    ConverterCrashed {
        /// Exit code, if the process exited normally.
        exit_code: Option<i32>,
        /// Truncated stderr/stdout captured from the engine.
        diagnostics: String,
    },

    /// The engine exited cleanly but left no usable output file.
    #[error("Conversion produced no output: {diagnostics}")]
    NoOutput {
        /// Truncated stderr/stdout captured from the engine.
        diagnostics: String,
    },

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The resource is not in a state that allows the request.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be located or started.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// Catch-all for unexpected faults in the orchestration layer.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::UnsupportedFormat(_) => 415,
            Error::Overloaded(_) => 503,
            Error::TimedOut { .. } => 504,
            Error::ConverterCrashed { .. } => 502,
            Error::NoOutput { .. } => 502,
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Stable, machine-readable taxonomy code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::Overloaded(_) => "overloaded",
            Error::TimedOut { .. } => "timed_out",
            Error::ConverterCrashed { .. } => "converter_crashed",
            Error::NoOutput { .. } => "conversion_produced_no_output",
            Error::NotFound { .. } => "not_found",
            Error::Validation(_) => "validation_error",
            Error::Conflict(_) => "conflict",
            Error::Io { .. } => "io_error",
            Error::Tool { .. } => "tool_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Whether the failure stems from engine instability and may succeed on
    /// a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TimedOut { .. } | Error::ConverterCrashed { .. } | Error::NoOutput { .. }
        )
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

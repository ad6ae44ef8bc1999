//! df-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other df-* crates,
//! providing the job identifier, a unified error type carrying the conversion
//! failure taxonomy, document formats, the conversion job model, application
//! configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod format;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use format::{DocumentFormat, FormatSupport};
pub use ids::*;
pub use job::{ConversionJob, ConvertedDocument, JobSnapshot, JobStatus};

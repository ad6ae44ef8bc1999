//! The conversion job model.
//!
//! A [`ConversionJob`] is created by the dispatcher in [`JobStatus::Pending`]
//! and then owned by exactly one worker, which moves it through
//! `Pending -> Running -> {Succeeded | Failed | TimedOut}`. Terminal states
//! are final; any attempt to leave one is rejected. Observers never see the
//! live job, only [`JobSnapshot`] copies published at each transition.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::DocumentFormat;
use crate::ids::JobId;
use crate::{Error, Result};

/// Lifecycle status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }
}

/// Serializable failure detail: taxonomy code plus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FailureDetail {
    pub code: String,
    pub message: String,
}

impl From<&Error> for FailureDetail {
    fn from(err: &Error) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// A successfully converted document, as delivered to the caller.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    pub job_id: JobId,
    pub format: DocumentFormat,
    pub bytes: Bytes,
    /// Number of engine invocations it took (1 unless a retry happened).
    pub attempts: u32,
    /// Wall-clock time from job creation to completion.
    pub elapsed: Duration,
}

/// One client-requested conversion, tracked end-to-end.
#[derive(Debug)]
pub struct ConversionJob {
    id: JobId,
    source: DocumentFormat,
    target: DocumentFormat,
    filename: Option<String>,
    input: Option<Bytes>,
    input_len: usize,
    status: JobStatus,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    attempts: u32,
    result: Option<Bytes>,
    failure: Option<FailureDetail>,
}

impl ConversionJob {
    /// Create a new pending job that owns `input`.
    pub fn new(input: Bytes, source: DocumentFormat, target: DocumentFormat) -> Self {
        Self {
            id: JobId::new(),
            source,
            target,
            filename: None,
            input_len: input.len(),
            input: Some(input),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            attempts: 0,
            result: None,
            failure: None,
        }
    }

    /// Builder: record the client's original filename.
    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn source(&self) -> DocumentFormat {
        self.source
    }

    pub fn target(&self) -> DocumentFormat {
        self.target
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn failure(&self) -> Option<&FailureDetail> {
        self.failure.as_ref()
    }

    /// Size of the submitted payload in bytes.
    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Hand the input payload over to the worker. Returns `None` if it was
    /// already taken.
    pub fn take_input(&mut self) -> Option<Bytes> {
        self.input.take()
    }

    /// Move the result payload out of a succeeded job.
    pub fn take_result(&mut self) -> Option<Bytes> {
        self.result.take()
    }

    /// `Pending -> Running`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != JobStatus::Pending {
            return Err(self.bad_transition(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `Running -> Succeeded`, storing the output payload.
    pub fn succeed(&mut self, output: Bytes, attempts: u32) -> Result<()> {
        self.ensure_running(JobStatus::Succeeded)?;
        self.status = JobStatus::Succeeded;
        self.result = Some(output);
        self.complete(attempts);
        Ok(())
    }

    /// `Running -> Failed | TimedOut`, depending on the error kind.
    pub fn fail(&mut self, err: &Error, attempts: u32) -> Result<()> {
        let next = match err {
            Error::TimedOut { .. } => JobStatus::TimedOut,
            _ => JobStatus::Failed,
        };
        self.ensure_running(next)?;
        self.status = next;
        self.failure = Some(FailureDetail::from(err));
        self.complete(attempts);
        Ok(())
    }

    /// Wall-clock time since creation (or until completion, once terminal).
    pub fn elapsed(&self) -> Duration {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.created_at).to_std().unwrap_or_default()
    }

    /// Read-only copy for observers.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            source: self.source,
            target: self.target,
            filename: self.filename.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            attempts: self.attempts,
            input_bytes: self.input_len,
            output_bytes: self.result.as_ref().map(Bytes::len),
            error: self.failure.clone(),
        }
    }

    fn ensure_running(&self, next: JobStatus) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(self.bad_transition(next));
        }
        Ok(())
    }

    fn complete(&mut self, attempts: u32) {
        self.attempts = attempts;
        self.completed_at = Some(Utc::now());
    }

    fn bad_transition(&self, next: JobStatus) -> Error {
        Error::Internal(format!(
            "job {} cannot move from {} to {}",
            self.id,
            self.status.as_str(),
            next.as_str()
        ))
    }
}

/// Point-in-time view of a job, safe to share with any reader.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct JobSnapshot {
    pub id: JobId,
    pub source: DocumentFormat,
    pub target: DocumentFormat,
    pub filename: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub input_bytes: usize,
    pub output_bytes: Option<usize>,
    pub error: Option<FailureDetail>,
}

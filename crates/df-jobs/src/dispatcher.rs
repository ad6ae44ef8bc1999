//! Front door for conversion requests.
//!
//! The [`Dispatcher`] validates a request, creates a `Pending` job and puts
//! it on the queue. Rejections (bad formats, empty input, full queue) happen
//! before any worker or workspace is involved.

use std::sync::Arc;

use bytes::Bytes;
use df_core::events::{EventBus, EventPayload};
use df_core::{ConversionJob, Error, FormatSupport, JobId, JobSnapshot, Result};
use tokio::sync::oneshot;

use crate::queue::JobQueue;
use crate::registry::JobRegistry;
use crate::worker::{ConversionResult, Envelope};

/// One client request: payload plus format tags as the client spelled them.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub input: Bytes,
    pub source: String,
    pub target: String,
    pub filename: Option<String>,
}

impl ConversionRequest {
    pub fn new(input: impl Into<Bytes>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            source: source.into(),
            target: target.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }
}

/// Awaitable handle to a queued job.
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    rx: oneshot::Receiver<ConversionResult>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job's terminal result.
    pub async fn wait(self) -> ConversionResult {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::Internal(format!(
                "job {} was dropped before completion",
                self.id
            )))
        })
    }
}

/// Validates requests and feeds the job queue.
#[derive(Clone)]
pub struct Dispatcher {
    queue: Arc<JobQueue<Envelope>>,
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    formats: FormatSupport,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<JobQueue<Envelope>>,
        registry: Arc<JobRegistry>,
        events: Arc<EventBus>,
        formats: FormatSupport,
    ) -> Self {
        Self {
            queue,
            registry,
            events,
            formats,
        }
    }

    pub fn formats(&self) -> &FormatSupport {
        &self.formats
    }

    /// Convert and wait for the result.
    pub async fn submit(&self, request: ConversionRequest) -> ConversionResult {
        self.enqueue(request)?.wait().await
    }

    /// Queue a conversion and return a handle to await it.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedFormat`] for unknown, unaccepted or identical
    ///   format tags.
    /// - [`Error::Validation`] for an empty payload.
    /// - [`Error::Overloaded`] when the queue is full or shutting down.
    pub fn enqueue(&self, request: ConversionRequest) -> Result<JobHandle> {
        let (tx, rx) = oneshot::channel();
        let id = self.dispatch(request, Some(tx))?;
        Ok(JobHandle { id, rx })
    }

    /// Queue a conversion nobody waits on. The result is kept in the
    /// registry until downloaded.
    pub fn enqueue_detached(&self, request: ConversionRequest) -> Result<JobSnapshot> {
        let id = self.dispatch(request, None)?;
        self.registry
            .get(id)
            .ok_or_else(|| Error::Internal(format!("job {id} vanished from the registry")))
    }

    fn dispatch(
        &self,
        request: ConversionRequest,
        reply: Option<oneshot::Sender<ConversionResult>>,
    ) -> Result<JobId> {
        let job = self.build_job(request).inspect_err(|e| self.reject(None, e))?;
        let id = job.id();
        let snapshot = job.snapshot();

        // Published first so a fast worker's `Running` snapshot always wins.
        self.registry.publish(snapshot);
        if let Err(e) = self.queue.try_enqueue(Envelope { job, reply }) {
            self.registry.remove(id);
            self.reject(Some(id), &e);
            return Err(e);
        }

        self.events.broadcast(EventPayload::ConversionQueued { job_id: id });
        tracing::debug!(job_id = %id, depth = self.queue.depth(), "Job queued");
        Ok(id)
    }

    fn build_job(&self, request: ConversionRequest) -> Result<ConversionJob> {
        let (source, target) = self.formats.resolve(&request.source, &request.target)?;
        if request.input.is_empty() {
            return Err(Error::Validation("input document is empty".into()));
        }
        Ok(ConversionJob::new(request.input, source, target).with_filename(request.filename))
    }

    fn reject(&self, job_id: Option<JobId>, err: &Error) {
        tracing::warn!(code = err.code(), error = %err, "Conversion request rejected");
        self.events.record_failure(job_id, err.code(), err.to_string());
    }
}

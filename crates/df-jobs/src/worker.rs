//! Per-job processing: the attempt loop, retry policy and result delivery.
//!
//! A worker takes one [`Envelope`] at a time, marks the job `Running`, runs
//! the attempt loop in its own task (so a panic in the engine adapter is
//! caught at the join point instead of killing the worker), records the
//! terminal status and hands the result to whoever is waiting.

use std::any::Any;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use df_convert::{ConversionOutcome, Converter, WorkspaceManager};
use df_core::events::{EventBus, EventPayload};
use df_core::{ConversionJob, ConvertedDocument, DocumentFormat, Error, JobId};
use tokio::sync::oneshot;

use crate::registry::JobRegistry;

/// What the caller of a conversion eventually receives.
pub type ConversionResult = df_core::Result<ConvertedDocument>;

/// A queued job plus the channel its result goes to.
///
/// Without a reply channel the job is detached and its result is parked in
/// the [`JobRegistry`] instead.
#[derive(Debug)]
pub struct Envelope {
    pub job: ConversionJob,
    pub reply: Option<oneshot::Sender<ConversionResult>>,
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// What to do after an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run another attempt in a fresh workspace.
    Retry,
    /// The outcome is final.
    Finish,
}

/// Bounded retry of engine-instability failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl RetryPolicy {
    /// `max_attempts` counts the first attempt; it is clamped to at least 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide after attempt number `attempt` (1-based) produced `outcome`.
    pub fn decide(&self, attempt: u32, outcome: &ConversionOutcome) -> Decision {
        let retryable = matches!(
            outcome,
            ConversionOutcome::TimedOut { .. }
                | ConversionOutcome::Crashed { .. }
                | ConversionOutcome::NoOutput { .. }
        );
        if retryable && attempt < self.max_attempts {
            Decision::Retry
        } else {
            Decision::Finish
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2)
    }
}

// ---------------------------------------------------------------------------
// Worker context
// ---------------------------------------------------------------------------

/// Everything a worker needs, shared by all workers of a pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub converter: Arc<dyn Converter>,
    pub workspaces: WorkspaceManager,
    pub registry: Arc<JobRegistry>,
    pub events: Arc<EventBus>,
    pub policy: RetryPolicy,
    pub timeout: Duration,
    pub busy: Arc<AtomicUsize>,
}

/// Marks one worker slot busy for as long as it lives.
struct BusySlot(Arc<AtomicUsize>);

impl BusySlot {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for BusySlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Processing
// ---------------------------------------------------------------------------

/// Drive one job from `Pending` to a terminal status and deliver the result.
///
/// Never panics and never returns early without a terminal status: every
/// accepted job gets exactly one.
pub async fn process_job(ctx: &WorkerContext, envelope: Envelope) {
    let _slot = BusySlot::acquire(&ctx.busy);
    let Envelope { mut job, reply } = envelope;
    let job_id = job.id();

    if let Err(e) = job.start() {
        tracing::error!(job_id = %job_id, error = %e, "Refusing to process job");
        deliver(reply, Err(e));
        return;
    }
    ctx.registry.publish(job.snapshot());
    ctx.events.broadcast(EventPayload::ConversionStarted { job_id });
    tracing::info!(
        job_id = %job_id,
        source = %job.source(),
        target = %job.target(),
        bytes = job.input_len(),
        "Processing conversion job"
    );

    let attempts = Arc::new(AtomicU32::new(0));
    let result = match job.take_input() {
        Some(input) => {
            let task = tokio::spawn(run_attempts(
                ctx.clone(),
                job_id,
                input,
                job.source(),
                job.target(),
                Arc::clone(&attempts),
            ));
            match task.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let message = panic_message(e.into_panic());
                    tracing::error!(job_id = %job_id, panic = %message, "Conversion task panicked");
                    Err(Error::Internal(format!("conversion task panicked: {message}")))
                }
                Err(e) => Err(Error::Internal(format!("conversion task aborted: {e}"))),
            }
        }
        None => Err(Error::Internal(format!("job {job_id} has no input payload"))),
    };

    finish(ctx, job, reply, result, attempts.load(Ordering::SeqCst));
}

/// Record the terminal status, publish it and hand the result over.
fn finish(
    ctx: &WorkerContext,
    mut job: ConversionJob,
    reply: Option<oneshot::Sender<ConversionResult>>,
    result: df_core::Result<Bytes>,
    attempts: u32,
) {
    let job_id = job.id();
    let attempts = attempts.max(1);

    let delivered = match result {
        Ok(bytes) => {
            if let Err(e) = job.succeed(bytes.clone(), attempts) {
                tracing::error!(job_id = %job_id, error = %e, "Invalid job transition");
                deliver(reply, Err(e));
                return;
            }
            if reply.is_none() {
                ctx.registry.store_result(job_id, bytes);
            }
            ctx.registry.publish(job.snapshot());
            ctx.events
                .broadcast(EventPayload::ConversionCompleted { job_id, attempts });
            tracing::info!(
                job_id = %job_id,
                attempts,
                elapsed_ms = job.elapsed().as_millis() as u64,
                "Conversion completed"
            );

            let bytes = job.take_result().unwrap_or_default();
            Ok(ConvertedDocument {
                job_id,
                format: job.target(),
                bytes,
                attempts,
                elapsed: job.elapsed(),
            })
        }
        Err(err) => {
            if let Err(e) = job.fail(&err, attempts) {
                tracing::error!(job_id = %job_id, error = %e, "Invalid job transition");
            }
            ctx.registry.publish(job.snapshot());
            ctx.events.broadcast(EventPayload::ConversionFailed {
                job_id,
                code: err.code().to_string(),
                error: err.to_string(),
            });
            tracing::warn!(
                job_id = %job_id,
                attempts,
                code = err.code(),
                error = %err,
                "Conversion failed"
            );
            Err(err)
        }
    };

    deliver(reply, delivered);
}

fn deliver(reply: Option<oneshot::Sender<ConversionResult>>, result: ConversionResult) {
    if let Some(reply) = reply {
        if reply.send(result).is_err() {
            tracing::debug!("Caller stopped waiting before the result was ready");
        }
    }
}

/// The attempt loop: acquire a fresh workspace, convert, release, decide.
///
/// `attempts` is updated before each attempt so the caller knows how far the
/// loop got even if this task panics.
async fn run_attempts(
    ctx: WorkerContext,
    job_id: JobId,
    input: Bytes,
    source: DocumentFormat,
    target: DocumentFormat,
    attempts: Arc<AtomicU32>,
) -> df_core::Result<Bytes> {
    let mut attempt = 1;
    loop {
        attempts.store(attempt, Ordering::SeqCst);

        let workspace = ctx
            .workspaces
            .acquire(job_id, attempt, &input, source)
            .await?;

        let started = Instant::now();
        let outcome = ctx
            .converter
            .convert(&workspace, source, target, ctx.timeout)
            .await;
        ctx.workspaces.release(workspace);

        tracing::debug!(
            job_id = %job_id,
            attempt,
            outcome = outcome.label(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Attempt finished"
        );

        match ctx.policy.decide(attempt, &outcome) {
            Decision::Finish => return outcome.into_result(),
            Decision::Retry => {
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    outcome = outcome.label(),
                    "Engine failure; retrying in a fresh workspace"
                );
                attempt += 1;
                ctx.events.broadcast(EventPayload::ConversionRetrying {
                    job_id,
                    attempt,
                    reason: outcome.label().to_string(),
                });
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use df_convert::{ScriptedConverter, Step};
    use df_core::JobStatus;

    struct Fixture {
        _root: tempfile::TempDir,
        ctx: WorkerContext,
        converter: Arc<ScriptedConverter>,
    }

    fn fixture(steps: Vec<Step>, max_attempts: u32) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(ScriptedConverter::new(steps));
        let ctx = WorkerContext {
            converter: converter.clone(),
            workspaces: WorkspaceManager::new(root.path()),
            registry: Arc::new(JobRegistry::default()),
            events: Arc::new(EventBus::default()),
            policy: RetryPolicy::new(max_attempts),
            timeout: Duration::from_millis(100),
            busy: Arc::new(AtomicUsize::new(0)),
        };
        Fixture {
            _root: root,
            ctx,
            converter,
        }
    }

    async fn run(fx: &Fixture) -> (JobId, ConversionResult) {
        let job = ConversionJob::new(
            Bytes::from_static(b"doc bytes"),
            DocumentFormat::Doc,
            DocumentFormat::Docx,
        );
        let job_id = job.id();
        fx.ctx.registry.publish(job.snapshot());
        let (tx, rx) = oneshot::channel();
        process_job(
            &fx.ctx,
            Envelope {
                job,
                reply: Some(tx),
            },
        )
        .await;
        (job_id, rx.await.unwrap())
    }

    fn assert_clean(fx: &Fixture) {
        assert_eq!(fx.ctx.busy.load(Ordering::SeqCst), 0);
        assert_eq!(fx.ctx.workspaces.active(), 0);
        for path in fx.converter.workspaces() {
            assert!(!path.exists(), "workspace {} leaked", path.display());
        }
    }

    #[test]
    fn policy_retries_only_engine_failures() {
        let policy = RetryPolicy::new(2);
        let crash = ConversionOutcome::Crashed {
            exit_code: Some(1),
            diagnostics: String::new(),
        };
        assert_eq!(policy.decide(1, &crash), Decision::Retry);
        assert_eq!(policy.decide(2, &crash), Decision::Finish);
        assert_eq!(
            policy.decide(1, &ConversionOutcome::Internal("spawn".into())),
            Decision::Finish
        );
        assert_eq!(
            policy.decide(1, &ConversionOutcome::Succeeded(Bytes::new())),
            Decision::Finish
        );
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let fx = fixture(vec![Step::succeed(b"docx bytes")], 2);
        let (job_id, result) = run(&fx).await;

        let doc = result.unwrap();
        assert_eq!(&doc.bytes[..], b"docx bytes");
        assert_eq!(doc.attempts, 1);
        assert_eq!(doc.format, DocumentFormat::Docx);
        let snapshot = fx.ctx.registry.get(job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Succeeded);
        assert_eq!(snapshot.output_bytes, Some(10));
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn crash_then_success_returns_second_attempt_bytes() {
        let fx = fixture(vec![Step::crash(1, "segfault"), Step::succeed(b"second")], 2);
        let (_, result) = run(&fx).await;

        let doc = result.unwrap();
        assert_eq!(&doc.bytes[..], b"second");
        assert_eq!(doc.attempts, 2);
        assert_eq!(fx.converter.calls(), 2);
        let paths = fx.converter.workspaces();
        assert_ne!(paths[0], paths[1]);
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn repeated_crash_reports_last_outcome() {
        let fx = fixture(vec![Step::crash(1, "first"), Step::crash(2, "second")], 2);
        let (job_id, result) = run(&fx).await;

        match result.unwrap_err() {
            Error::ConverterCrashed {
                exit_code,
                diagnostics,
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(diagnostics, "second");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let snapshot = fx.ctx.registry.get(job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.error.unwrap().code, "converter_crashed");
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn no_output_is_reported_after_retry() {
        let fx = fixture(vec![Step::NoOutput, Step::NoOutput], 2);
        let (_, result) = run(&fx).await;
        assert_eq!(result.unwrap_err().code(), "conversion_produced_no_output");
        assert_eq!(fx.converter.calls(), 2);
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn timeout_marks_job_timed_out() {
        let fx = fixture(vec![Step::Hang, Step::Hang], 2);
        let (job_id, result) = run(&fx).await;

        assert!(matches!(result.unwrap_err(), Error::TimedOut { .. }));
        assert_eq!(
            fx.ctx.registry.get(job_id).unwrap().status,
            JobStatus::TimedOut
        );
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn single_attempt_policy_does_not_retry() {
        let fx = fixture(vec![Step::crash(1, "once")], 1);
        let (_, result) = run(&fx).await;
        assert!(result.is_err());
        assert_eq!(fx.converter.calls(), 1);
    }

    #[tokio::test]
    async fn panic_becomes_internal_error() {
        let fx = fixture(vec![Step::Panic("adapter bug".into())], 2);
        let (job_id, result) = run(&fx).await;

        let err = result.unwrap_err();
        assert_eq!(err.code(), "internal_error");
        assert!(err.to_string().contains("adapter bug"));
        let snapshot = fx.ctx.registry.get(job_id).unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.attempts, 1);
        assert_clean(&fx);
    }

    #[tokio::test]
    async fn detached_job_parks_result_in_registry() {
        let fx = fixture(vec![Step::succeed(b"parked")], 2);
        let job = ConversionJob::new(
            Bytes::from_static(b"doc"),
            DocumentFormat::Doc,
            DocumentFormat::Pdf,
        );
        let job_id = job.id();
        fx.ctx.registry.publish(job.snapshot());
        process_job(&fx.ctx, Envelope { job, reply: None }).await;

        assert_eq!(&fx.ctx.registry.take_result(job_id).unwrap()[..], b"parked");
    }

    #[tokio::test]
    async fn events_are_emitted_in_order() {
        let fx = fixture(vec![Step::crash(1, "x"), Step::succeed(b"ok")], 2);
        let mut rx = fx.ctx.events.subscribe();
        run(&fx).await.1.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event.payload {
                EventPayload::ConversionStarted { .. } => "started",
                EventPayload::ConversionRetrying { attempt, .. } => {
                    assert_eq!(attempt, 2);
                    "retrying"
                }
                EventPayload::ConversionCompleted { .. } => "completed",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["started", "retrying", "completed"]);
    }

    #[tokio::test]
    async fn job_that_already_ran_is_rejected() {
        let fx = fixture(vec![], 2);
        let mut job = ConversionJob::new(
            Bytes::from_static(b"doc"),
            DocumentFormat::Doc,
            DocumentFormat::Docx,
        );
        job.start().unwrap();
        let (tx, rx) = oneshot::channel();
        process_job(&fx.ctx, Envelope { job, reply: Some(tx) }).await;

        assert_eq!(rx.await.unwrap().unwrap_err().code(), "internal_error");
        assert_eq!(fx.converter.calls(), 0);
        assert_clean(&fx);
    }
}

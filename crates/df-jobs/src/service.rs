//! The conversion service: queue, pool, registry and dispatcher wired
//! together and owned by one value created at startup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use df_convert::{Converter, WorkspaceManager};
use df_core::config::Config;
use df_core::events::EventBus;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::dispatcher::{ConversionRequest, Dispatcher, JobHandle};
use crate::pool::WorkerPool;
use crate::queue::JobQueue;
use crate::registry::JobRegistry;
use crate::worker::{ConversionResult, Envelope, RetryPolicy, WorkerContext};

/// Point-in-time occupancy of the service.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ServiceStatus {
    pub converter: String,
    pub workers: usize,
    pub busy_workers: usize,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub active_workspaces: usize,
    /// Bytes held for detached jobs awaiting download.
    pub parked_result_bytes: usize,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub accepting: bool,
}

/// Owns every moving part of the conversion pipeline.
pub struct ConversionService {
    dispatcher: Dispatcher,
    queue: Arc<JobQueue<Envelope>>,
    registry: Arc<JobRegistry>,
    events: Arc<EventBus>,
    workspaces: WorkspaceManager,
    busy: Arc<AtomicUsize>,
    converter_name: String,
    workers: usize,
    policy: RetryPolicy,
    timeout_secs: u64,
    pool: Mutex<Option<WorkerPool>>,
}

impl ConversionService {
    /// Build the service from `config` and start its workers.
    ///
    /// Stale workspaces from a previous run are swept first. Must be called
    /// inside a Tokio runtime.
    pub fn start(config: &Config, converter: Arc<dyn Converter>, events: Arc<EventBus>) -> Self {
        let workspaces = WorkspaceManager::new(&config.workspace.root);
        workspaces.sweep_stale();

        let workers = config.pool.effective_workers();
        let queue = Arc::new(JobQueue::new(config.pool.effective_queue_capacity()));
        let registry = Arc::new(
            JobRegistry::default().with_result_budget(config.pool.result_budget_bytes),
        );
        let busy = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::new(config.pool.effective_max_attempts());
        let converter_name = converter.name().to_string();

        let ctx = WorkerContext {
            converter,
            workspaces: workspaces.clone(),
            registry: Arc::clone(&registry),
            events: Arc::clone(&events),
            policy,
            timeout: config.engine.timeout(),
            busy: Arc::clone(&busy),
        };
        let pool = WorkerPool::start(workers, Arc::clone(&queue), ctx);

        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&events),
            config.formats.clone(),
        );

        tracing::info!(
            converter = %converter_name,
            workers,
            queue_capacity = queue.capacity(),
            max_attempts = policy.max_attempts(),
            timeout_secs = config.engine.timeout_secs,
            workspace_root = %workspaces.root().display(),
            "Conversion service started"
        );

        Self {
            dispatcher,
            queue,
            registry,
            events,
            workspaces,
            busy,
            converter_name,
            workers,
            policy,
            timeout_secs: config.engine.timeout_secs,
            pool: Mutex::new(Some(pool)),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// See [`Dispatcher::submit`].
    pub async fn submit(&self, request: ConversionRequest) -> ConversionResult {
        self.dispatcher.submit(request).await
    }

    /// See [`Dispatcher::enqueue`].
    pub fn enqueue(&self, request: ConversionRequest) -> df_core::Result<JobHandle> {
        self.dispatcher.enqueue(request)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            converter: self.converter_name.clone(),
            workers: self.workers,
            busy_workers: self.busy.load(Ordering::SeqCst),
            queue_depth: self.queue.depth(),
            queue_capacity: self.queue.capacity(),
            active_workspaces: self.workspaces.active(),
            parked_result_bytes: self.registry.parked_bytes(),
            max_attempts: self.policy.max_attempts(),
            timeout_secs: self.timeout_secs,
            accepting: !self.queue.is_closed(),
        }
    }

    /// Stop accepting work, finish every queued job and stop the workers.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.queue.close();
        let pool = self.pool.lock().await.take();
        if let Some(pool) = pool {
            tracing::info!(pending = self.queue.depth(), "Draining conversion queue");
            pool.shutdown().await;
            tracing::info!("Conversion service stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use df_convert::{Gate, ScriptedConverter, Step};
    use df_core::{Error, JobStatus};
    use std::time::{Duration, Instant};

    fn config(root: &std::path::Path, workers: usize, capacity: usize) -> Config {
        let mut config = Config::default();
        config.workspace.root = root.to_path_buf();
        config.pool.workers = workers;
        config.pool.queue_capacity = Some(capacity);
        config.engine.timeout_secs = 1;
        config
    }

    fn request() -> ConversionRequest {
        ConversionRequest::new(Bytes::from_static(b"legacy"), "doc", "docx")
    }

    #[tokio::test]
    async fn submit_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(ScriptedConverter::new([Step::succeed(b"modern")]));
        let service =
            ConversionService::start(&config(root.path(), 2, 8), converter, Arc::default());

        let doc = service.submit(request()).await.unwrap();
        assert_eq!(&doc.bytes[..], b"modern");
        assert_eq!(
            service.registry().get(doc.job_id).unwrap().status,
            JobStatus::Succeeded
        );

        service.shutdown().await;
        assert_eq!(service.status().active_workspaces, 0);
    }

    #[tokio::test]
    async fn capacity_plus_one_is_overloaded() {
        let root = tempfile::tempdir().unwrap();
        let gate = Gate::new();
        let converter = Arc::new(
            ScriptedConverter::succeeding().with_fallback(Step::succeed(b"ok").gated(&gate)),
        );
        let service =
            ConversionService::start(&config(root.path(), 2, 3), converter.clone(), Arc::default());

        // Occupy both workers.
        let mut handles = vec![service.enqueue(request()).unwrap(), service.enqueue(request()).unwrap()];
        while converter.in_flight() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        for _ in 0..3 {
            handles.push(service.enqueue(request()).unwrap());
        }
        let err = service.enqueue(request()).unwrap_err();
        assert!(matches!(err, Error::Overloaded(_)));
        let status = service.status();
        assert_eq!(status.busy_workers, 2);
        assert_eq!(status.queue_depth, 3);

        gate.open();
        for handle in handles {
            assert!(handle.wait().await.is_ok());
        }
        service.shutdown().await;
    }

    #[tokio::test]
    async fn unsupported_pair_leaves_no_trace() {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(ScriptedConverter::succeeding());
        let service =
            ConversionService::start(&config(root.path(), 1, 4), converter.clone(), Arc::default());

        let err = service
            .submit(ConversionRequest::new(Bytes::from_static(b"x"), "pdf", "docx"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_format");

        let status = service.status();
        assert_eq!(status.busy_workers, 0);
        assert_eq!(status.active_workspaces, 0);
        assert_eq!(converter.calls(), 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn every_job_gets_exactly_one_terminal_status() {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(ScriptedConverter::new([
            Step::succeed(b"a"),
            Step::crash(1, "x"),
            Step::NoOutput,
            Step::Panic("bug".into()),
        ]));
        let events: Arc<EventBus> = Arc::default();
        let mut rx = events.subscribe();
        let service =
            ConversionService::start(&config(root.path(), 2, 16), converter, Arc::clone(&events));

        let handles: Vec<_> = (0..6).map(|_| service.enqueue(request()).unwrap()).collect();
        let ids: Vec<_> = handles.iter().map(JobHandle::id).collect();
        for handle in handles {
            let _ = handle.wait().await;
        }
        service.shutdown().await;

        let mut terminal = std::collections::HashMap::new();
        while let Ok(event) = rx.try_recv() {
            use df_core::events::EventPayload::*;
            match event.payload {
                ConversionCompleted { job_id, .. } | ConversionFailed { job_id, .. } => {
                    *terminal.entry(job_id).or_insert(0) += 1;
                }
                _ => {}
            }
        }
        for id in ids {
            assert_eq!(terminal.get(&id), Some(&1), "job {id}");
            assert!(service.registry().get(id).unwrap().status.is_terminal());
        }
        assert_eq!(service.workspaces().active(), 0);
    }

    #[tokio::test]
    async fn hanging_engine_is_reported_timed_out() {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(ScriptedConverter::new([Step::Hang, Step::Hang]));
        let service =
            ConversionService::start(&config(root.path(), 1, 4), converter, Arc::default());

        let started = Instant::now();
        let err = service.submit(request()).await.unwrap_err();
        assert_eq!(err.code(), "timed_out");
        // Two attempts of one second each, plus slack.
        assert!(started.elapsed() < Duration::from_secs(4));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_drains_then_rejects() {
        let root = tempfile::tempdir().unwrap();
        let converter = Arc::new(
            ScriptedConverter::succeeding()
                .with_fallback(Step::succeed(b"ok").after(Duration::from_millis(20))),
        );
        let service =
            ConversionService::start(&config(root.path(), 1, 8), converter.clone(), Arc::default());

        let handles: Vec<_> = (0..4).map(|_| service.enqueue(request()).unwrap()).collect();
        service.shutdown().await;
        assert_eq!(converter.calls(), 4);
        for handle in handles {
            assert!(handle.wait().await.is_ok());
        }

        let err = service.enqueue(request()).unwrap_err();
        assert!(err.to_string().contains("shutting down"));
        assert!(!service.status().accepting);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn stale_workspaces_are_swept_at_start() {
        let root = tempfile::tempdir().unwrap();
        let stale = root.path().join("df-0badf00d-a1-leftover");
        std::fs::create_dir_all(&stale).unwrap();

        let service = ConversionService::start(
            &config(root.path(), 1, 1),
            Arc::new(ScriptedConverter::succeeding()),
            Arc::default(),
        );
        assert!(!stale.exists());
        service.shutdown().await;
    }
}

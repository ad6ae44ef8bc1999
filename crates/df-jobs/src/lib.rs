//! df-jobs: job dispatching, queueing and the worker pool.
//!
//! A [`ConversionService`] owns a bounded [`JobQueue`], a fixed
//! [`WorkerPool`] and the [`JobRegistry`] of job snapshots. Requests enter
//! through the [`Dispatcher`]; each worker drives one job at a time through
//! workspace acquisition, the engine and the bounded [`RetryPolicy`].

pub mod dispatcher;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod service;
pub mod worker;

pub use dispatcher::{ConversionRequest, Dispatcher, JobHandle};
pub use pool::WorkerPool;
pub use queue::JobQueue;
pub use registry::JobRegistry;
pub use service::{ConversionService, ServiceStatus};
pub use worker::{ConversionResult, Decision, Envelope, RetryPolicy, WorkerContext};

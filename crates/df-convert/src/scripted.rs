//! A deterministic [`Converter`] for tests.
//!
//! [`ScriptedConverter`] replays a queue of [`Step`]s, one per attempt, and
//! falls back to a default step once the script runs out. Successful steps
//! really write the output file into the workspace so the same output
//! collection path as the real engine is exercised.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use df_core::DocumentFormat;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::converter::{collect_output, ConversionOutcome, Converter};
use crate::workspace::Workspace;

/// What one scripted attempt does.
#[derive(Debug, Clone)]
pub enum Step {
    /// Write these bytes as the output file and exit cleanly.
    Succeed(Bytes),
    /// Exit with a non-zero status.
    Crash {
        exit_code: Option<i32>,
        diagnostics: String,
    },
    /// Exit cleanly without writing anything.
    NoOutput,
    /// Never finish; reported as timed out once the budget elapses.
    Hang,
    /// Panic inside the converter.
    Panic(String),
    /// Sleep, then run the inner step.
    Delay(Duration, Box<Step>),
    /// Block until the gate opens, then run the inner step.
    WaitFor(Gate, Box<Step>),
}

impl Step {
    pub fn succeed(bytes: &'static [u8]) -> Self {
        Step::Succeed(Bytes::from_static(bytes))
    }

    pub fn crash(exit_code: i32, diagnostics: impl Into<String>) -> Self {
        Step::Crash {
            exit_code: Some(exit_code),
            diagnostics: diagnostics.into(),
        }
    }

    pub fn after(self, delay: Duration) -> Self {
        Step::Delay(delay, Box::new(self))
    }

    pub fn gated(self, gate: &Gate) -> Self {
        Step::WaitFor(gate.clone(), Box::new(self))
    }
}

/// A one-way latch that holds scripted attempts until opened.
#[derive(Debug, Clone)]
pub struct Gate {
    tx: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Release every current and future waiter.
    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only fails if it is dropped.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays scripted outcomes and records what it saw.
#[derive(Debug)]
pub struct ScriptedConverter {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    in_flight: Arc<AtomicUsize>,
    peak: AtomicUsize,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl ScriptedConverter {
    /// Replay `steps` in order, then succeed with `b"converted"` forever.
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback: Step::succeed(b"converted"),
            calls: AtomicUsize::new(0),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: AtomicUsize::new(0),
            workspaces: Mutex::new(Vec::new()),
        }
    }

    /// Always succeed.
    pub fn succeeding() -> Self {
        Self::new([])
    }

    /// Run `step` for every attempt past the end of the script.
    pub fn with_fallback(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    /// Queue more steps behind the current script.
    pub fn push(&self, step: Step) {
        self.script.lock().push_back(step);
    }

    /// Number of attempts started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Attempts currently inside `convert`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent attempts observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Workspace directories handed to this converter, in call order.
    pub fn workspaces(&self) -> Vec<PathBuf> {
        self.workspaces.lock().clone()
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Converter for ScriptedConverter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn convert(
        &self,
        workspace: &Workspace,
        _source: DocumentFormat,
        target: DocumentFormat,
        timeout: Duration,
    ) -> ConversionOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.workspaces.lock().push(workspace.path().to_path_buf());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(Arc::clone(&self.in_flight));

        let mut step = self.next_step();
        let step = loop {
            match step {
                Step::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
                Step::WaitFor(gate, inner) => {
                    gate.wait().await;
                    step = *inner;
                }
                terminal => break terminal,
            }
        };

        match step {
            Step::Succeed(bytes) => {
                if let Err(e) = tokio::fs::write(workspace.output_path(target), &bytes).await {
                    return ConversionOutcome::Internal(format!("scripted write failed: {e}"));
                }
                collect_output(workspace, target, String::new()).await
            }
            Step::Crash {
                exit_code,
                diagnostics,
            } => ConversionOutcome::Crashed {
                exit_code,
                diagnostics,
            },
            Step::NoOutput => collect_output(workspace, target, String::new()).await,
            Step::Hang => {
                tokio::time::sleep(timeout).await;
                ConversionOutcome::TimedOut { after: timeout }
            }
            Step::Panic(message) => panic!("{message}"),
            Step::Delay(..) | Step::WaitFor(..) => {
                ConversionOutcome::Internal("unresolved scripted step".into())
            }
        }
    }
}

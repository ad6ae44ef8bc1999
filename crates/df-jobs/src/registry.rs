//! Read side of job tracking.
//!
//! Workers and the dispatcher publish a [`JobSnapshot`] at every transition;
//! status polling only ever reads those copies. Results of detached jobs
//! (submitted without a waiting caller) are parked here until downloaded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use df_core::{Error, JobId, JobSnapshot, JobStatus, Result};
use parking_lot::Mutex;

/// How many jobs are remembered before the oldest finished ones are evicted.
pub const DEFAULT_RETENTION: usize = 1000;

#[derive(Debug)]
struct Record {
    snapshot: JobSnapshot,
    result: Option<Bytes>,
    downloaded: bool,
    expired: bool,
}

impl Record {
    fn parked_len(&self) -> usize {
        self.result.as_ref().map_or(0, Bytes::len)
    }
}

/// Concurrent map of job snapshots with bounded retention.
///
/// Parked results share a byte budget. When a new result pushes the total
/// over it, the oldest undownloaded results are dropped and their downloads
/// answer `not_found`.
#[derive(Debug)]
pub struct JobRegistry {
    entries: DashMap<JobId, Record>,
    order: Mutex<VecDeque<JobId>>,
    retention: usize,
    result_budget: usize,
    parked_bytes: AtomicUsize,
}

impl JobRegistry {
    pub fn new(retention: usize) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            retention: retention.max(1),
            result_budget: df_core::config::DEFAULT_RESULT_BUDGET_BYTES,
            parked_bytes: AtomicUsize::new(0),
        }
    }

    /// Cap the total size of parked results. The newest result is always
    /// kept, even when it alone exceeds the budget.
    pub fn with_result_budget(mut self, bytes: usize) -> Self {
        self.result_budget = bytes;
        self
    }

    /// Bytes currently held for detached jobs awaiting download.
    pub fn parked_bytes(&self) -> usize {
        self.parked_bytes.load(Ordering::SeqCst)
    }

    /// Insert or replace the snapshot for a job.
    pub fn publish(&self, snapshot: JobSnapshot) {
        let id = snapshot.id;
        let is_new = match self.entries.entry(id) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get_mut().snapshot = snapshot;
                false
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Record {
                    snapshot,
                    result: None,
                    downloaded: false,
                    expired: false,
                });
                true
            }
        };

        if is_new {
            self.order.lock().push_back(id);
            self.evict();
        }
    }

    /// Park the output of a detached job until it is downloaded.
    pub fn store_result(&self, id: JobId, bytes: Bytes) {
        let len = bytes.len();
        {
            let Some(mut entry) = self.entries.get_mut(&id) else {
                return;
            };
            let previous = entry.parked_len();
            entry.result = Some(bytes);
            self.parked_bytes.fetch_sub(previous, Ordering::SeqCst);
        }
        let parked = self.parked_bytes.fetch_add(len, Ordering::SeqCst) + len;
        if parked > self.result_budget {
            self.shed_results(id);
        }
    }

    /// Drop the oldest parked results (other than `keep`) until the total is
    /// back within budget.
    fn shed_results(&self, keep: JobId) {
        let order = self.order.lock();
        for id in order.iter() {
            if self.parked_bytes() <= self.result_budget {
                break;
            }
            if *id == keep {
                continue;
            }
            let Some(mut entry) = self.entries.get_mut(id) else {
                continue;
            };
            if let Some(bytes) = entry.result.take() {
                entry.expired = true;
                self.parked_bytes.fetch_sub(bytes.len(), Ordering::SeqCst);
                tracing::warn!(
                    job_id = %id,
                    bytes = bytes.len(),
                    budget = self.result_budget,
                    "Dropped undownloaded result to stay within the result budget"
                );
            }
        }
    }

    /// Forget a job entirely (used when a submission is rejected after the
    /// job was registered).
    pub fn remove(&self, id: JobId) {
        if let Some((_, record)) = self.entries.remove(&id) {
            self.parked_bytes
                .fetch_sub(record.parked_len(), Ordering::SeqCst);
        }
        self.order.lock().retain(|j| *j != id);
    }

    pub fn get(&self, id: JobId) -> Option<JobSnapshot> {
        self.entries.get(&id).map(|e| e.snapshot.clone())
    }

    /// Hand out a detached job's result and release it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the job is unknown, its result was already
    ///   downloaded, or it was dropped to stay within the result budget.
    /// - [`Error::Conflict`] if the job has not succeeded (yet).
    pub fn take_result(&self, id: JobId) -> Result<Bytes> {
        let mut entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("job", id))?;

        match entry.snapshot.status {
            JobStatus::Succeeded => {}
            JobStatus::Pending | JobStatus::Running => {
                return Err(Error::Conflict(format!(
                    "job {id} is still {}",
                    entry.snapshot.status.as_str()
                )));
            }
            JobStatus::Failed | JobStatus::TimedOut => {
                return Err(Error::Conflict(format!(
                    "job {id} finished as {} and has no result",
                    entry.snapshot.status.as_str()
                )));
            }
        }

        if entry.downloaded {
            return Err(Error::not_found("result", id));
        }
        if entry.expired {
            return Err(Error::not_found("expired result", id));
        }
        let bytes = entry
            .result
            .take()
            .ok_or_else(|| Error::not_found("result", id))?;
        entry.downloaded = true;
        self.parked_bytes.fetch_sub(bytes.len(), Ordering::SeqCst);
        Ok(bytes)
    }

    /// Most recent snapshots first.
    pub fn list(&self, limit: usize) -> Vec<JobSnapshot> {
        let order = self.order.lock();
        order
            .iter()
            .rev()
            .filter_map(|id| self.entries.get(id).map(|e| e.snapshot.clone()))
            .take(limit)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the oldest finished jobs while over the retention bound. Jobs
    /// still pending or running are never evicted.
    fn evict(&self) {
        let mut order = self.order.lock();
        let mut excess = order.len().saturating_sub(self.retention);
        if excess == 0 {
            return;
        }

        order.retain(|id| {
            if excess == 0 {
                return true;
            }
            let finished = self
                .entries
                .get(id)
                .map(|e| e.snapshot.status.is_terminal())
                .unwrap_or(true);
            if finished {
                if let Some((_, record)) = self.entries.remove(id) {
                    self.parked_bytes
                        .fetch_sub(record.parked_len(), Ordering::SeqCst);
                }
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

//! Bounded FIFO of pending jobs.
//!
//! Built on a `tokio::sync::mpsc` channel. The sender side rejects instead
//! of waiting when full, which is the service's backpressure signal. The
//! receiver is shared by every worker behind an async mutex, so each item is
//! handed out exactly once and in submission order.

use std::sync::atomic::{AtomicUsize, Ordering};

use df_core::{Error, Result};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};

/// Bounded multi-consumer job queue.
#[derive(Debug)]
pub struct JobQueue<T> {
    tx: RwLock<Option<mpsc::Sender<T>>>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
    depth: AtomicUsize,
}

impl<T> JobQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(rx),
            capacity,
            depth: AtomicUsize::new(0),
        }
    }

    /// Enqueue without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Overloaded`] when the queue is full or has been
    /// closed.
    pub fn try_enqueue(&self, item: T) -> Result<()> {
        let guard = self.tx.read();
        let Some(tx) = guard.as_ref() else {
            return Err(shutting_down());
        };

        self.depth.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(Error::Overloaded(format!(
                        "job queue is full ({} pending)",
                        self.capacity
                    ))),
                    mpsc::error::TrySendError::Closed(_) => Err(shutting_down()),
                }
            }
        }
    }

    /// Wait for the next item. Returns `None` once the queue is closed and
    /// fully drained.
    pub async fn dequeue(&self) -> Option<T> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Take the next item if one is already waiting.
    pub async fn try_dequeue(&self) -> Option<T> {
        let item = self.rx.lock().await.try_recv().ok();
        if item.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        item
    }

    /// Stop accepting new items. Items already queued stay dequeueable.
    pub fn close(&self) {
        if self.tx.write().take().is_some() {
            tracing::debug!(pending = self.depth(), "Job queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Number of items waiting.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn shutting_down() -> Error {
    Error::Overloaded("service is shutting down".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn fifo_order() {
        let queue = JobQueue::new(4);
        for i in 0..4 {
            queue.try_enqueue(i).unwrap();
        }
        assert_eq!(queue.depth(), 4);
        for i in 0..4 {
            assert_eq!(queue.dequeue().await, Some(i));
        }
        assert_eq!(queue.depth(), 0);
    }

    #[tokio::test]
    async fn full_queue_is_overloaded() {
        let queue = JobQueue::new(2);
        queue.try_enqueue(1).unwrap();
        queue.try_enqueue(2).unwrap();
        let err = queue.try_enqueue(3).unwrap_err();
        assert!(matches!(err, Error::Overloaded(_)));
        assert_eq!(queue.depth(), 2);

        queue.dequeue().await;
        queue.try_enqueue(3).unwrap();
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let queue: JobQueue<u8> = JobQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }

    #[tokio::test]
    async fn closed_queue_rejects_but_drains() {
        let queue = JobQueue::new(4);
        queue.try_enqueue("a").unwrap();
        queue.try_enqueue("b").unwrap();
        queue.close();
        assert!(queue.is_closed());

        let err = queue.try_enqueue("c").unwrap_err();
        assert!(err.to_string().contains("shutting down"));

        assert_eq!(queue.dequeue().await, Some("a"));
        assert_eq!(queue.try_dequeue().await, Some("b"));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_share_items() {
        let queue = Arc::new(JobQueue::new(100));
        for i in 0..100 {
            queue.try_enqueue(i).unwrap();
        }
        queue.close();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            tasks.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(i) = queue.dequeue().await {
                    seen.push(i);
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}

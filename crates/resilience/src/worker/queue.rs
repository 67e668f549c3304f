//! Bounded background write queue
//!
//! Tasks are pushed onto a bounded channel and drained by a fixed number of
//! workers. Each task runs at least once and at most `max_attempts` times.
//! A failure on this path is logged and counted but never reaches the
//! code that submitted the task.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ConfigError;
use crate::duration_millis;

/// Error returned by a background task
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// Worth another attempt (e.g. the database was unreachable)
    #[error("retryable: {0}")]
    Retryable(String),

    /// Another attempt would fail the same way
    #[error("permanent: {0}")]
    Permanent(String),
}

/// A unit of background work
#[async_trait]
pub trait BackgroundTask: Send + Sync + 'static {
    /// Short label used in logs
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), TaskError>;
}

/// Queue errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    /// The queue was full and the task was dropped
    #[error("write queue is full (capacity {capacity}), task dropped")]
    Full { capacity: usize },

    /// The queue has been shut down
    #[error("write queue is closed")]
    Closed,

    /// Workers did not drain before the shutdown timeout
    #[error("write queue shutdown timed out")]
    ShutdownTimeout,
}

/// Write queue configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use phonebill_resilience::worker::WriteQueueConfig;
///
/// let config = WriteQueueConfig::default()
///     .with_capacity(256)
///     .with_workers(2)
///     .with_retry_delay(Duration::from_millis(200));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteQueueConfig {
    /// Maximum number of queued tasks
    pub capacity: usize,

    /// Number of concurrent workers
    pub workers: usize,

    /// Attempts per task, including the first
    pub max_attempts: u32,

    /// Delay between attempts of the same task
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// How long `shutdown` waits for queued tasks to drain
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            workers: 4,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WriteQueueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be at least 1"));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// Point-in-time queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriteQueueStats {
    /// Tasks accepted onto the queue
    pub submitted: u64,
    /// Tasks that eventually succeeded
    pub completed: u64,
    /// Tasks given up on after a permanent error or the last attempt
    pub failed: u64,
    /// Tasks rejected because the queue was full
    pub dropped: u64,
    /// Accepted tasks not yet finished
    pub pending: usize,
}

type BoxedTask = Box<dyn BackgroundTask>;

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    pending: AtomicUsize,
    idle: Notify,
}

impl Counters {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Bounded queue of background tasks with a fixed worker pool
///
/// # Example
///
/// ```ignore
/// use phonebill_resilience::worker::{WriteQueue, WriteQueueConfig};
///
/// let queue = WriteQueue::start(WriteQueueConfig::default());
/// queue.submit(task)?;          // drops when full
/// queue.submit_wait(task).await?; // waits for room
/// queue.shutdown().await?;
/// ```
pub struct WriteQueue {
    config: WriteQueueConfig,
    sender: Mutex<Option<mpsc::Sender<BoxedTask>>>,
    counters: Arc<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WriteQueue {
    /// Create the queue and spawn its workers on the current runtime
    pub fn start(config: WriteQueueConfig) -> Self {
        let (sender, receiver) = mpsc::channel::<BoxedTask>(config.capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let counters = Arc::clone(&counters);
                let config = config.clone();
                tokio::spawn(async move {
                    worker_loop(worker, receiver, counters, config).await;
                })
            })
            .collect();

        info!(
            capacity = config.capacity,
            workers = config.workers,
            max_attempts = config.max_attempts,
            "write queue started"
        );

        Self {
            config,
            sender: Mutex::new(Some(sender)),
            counters,
            workers: Mutex::new(workers),
        }
    }

    pub fn config(&self) -> &WriteQueueConfig {
        &self.config
    }

    /// Enqueue without waiting; a full queue drops the task
    pub fn submit(&self, task: impl BackgroundTask) -> Result<(), QueueError> {
        let guard = self.sender.lock();
        let sender = guard.as_ref().ok_or(QueueError::Closed)?;

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match sender.try_send(Box::new(task)) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.counters.finish_one();
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    task = task.name(),
                    capacity = self.config.capacity,
                    "write queue full, dropping task"
                );
                Err(QueueError::Full {
                    capacity: self.config.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.finish_one();
                Err(QueueError::Closed)
            }
        }
    }

    /// Enqueue, waiting for room when the queue is full
    pub async fn submit_wait(&self, task: impl BackgroundTask) -> Result<(), QueueError> {
        let sender = self.sender.lock().clone().ok_or(QueueError::Closed)?;

        self.counters.pending.fetch_add(1, Ordering::AcqRel);
        match sender.send(Box::new(task)).await {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(_) => {
                self.counters.finish_one();
                Err(QueueError::Closed)
            }
        }
    }

    /// Wait until every accepted task has finished
    pub async fn flush(&self) {
        loop {
            let idle = self.counters.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.counters.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn stats(&self) -> WriteQueueStats {
        WriteQueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            pending: self.counters.pending.load(Ordering::Acquire),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting tasks and drain the queue
    ///
    /// Workers still running after `shutdown_timeout` are aborted.
    pub async fn shutdown(&self) -> Result<(), QueueError> {
        // Dropping the sender lets workers exit once the queue is empty
        if self.sender.lock().take().is_none() {
            return Ok(());
        }
        info!(pending = self.stats().pending, "draining write queue");

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(
            self.config.shutdown_timeout,
            futures::future::join_all(handles),
        )
        .await
        {
            Ok(_) => {
                info!(stats = ?self.stats(), "write queue stopped");
                Ok(())
            }
            Err(_) => {
                for abort in aborts {
                    abort.abort();
                }
                warn!(stats = ?self.stats(), "write queue shutdown timed out");
                Err(QueueError::ShutdownTimeout)
            }
        }
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<BoxedTask>>>,
    counters: Arc<Counters>,
    config: WriteQueueConfig,
) {
    loop {
        let next = receiver.lock().await.recv().await;
        let Some(task) = next else {
            debug!(worker, "write queue worker exiting");
            break;
        };

        if execute(task.as_ref(), &config).await {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        counters.finish_one();
    }
}

async fn execute(task: &dyn BackgroundTask, config: &WriteQueueConfig) -> bool {
    let max_attempts = config.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match task.run().await {
            Ok(()) => {
                debug!(task = task.name(), attempt, "background task completed");
                return true;
            }
            Err(TaskError::Permanent(reason)) => {
                error!(task = task.name(), attempt, %reason, "background task failed permanently");
                return false;
            }
            Err(TaskError::Retryable(reason)) if attempt < max_attempts => {
                warn!(task = task.name(), attempt, %reason, "background task failed, retrying");
                tokio::time::sleep(config.retry_delay).await;
            }
            Err(TaskError::Retryable(reason)) => {
                error!(
                    task = task.name(),
                    attempts = attempt,
                    %reason,
                    "background task gave up"
                );
            }
        }
    }
    false
}

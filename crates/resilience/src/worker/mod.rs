//! Background task execution
//!
//! This module provides:
//! - [`BackgroundTask`] - a unit of work that may be retried
//! - [`WriteQueue`] - bounded queue drained by a fixed set of workers
//!
//! # Architecture
//!
//! ```text
//!  submit()      ┌──────────────────────────┐
//!  (drop when ──►│  bounded mpsc (capacity) │
//!   full)        └────────────┬─────────────┘
//!  submit_wait()              │
//!  (backpressure)             ▼
//!               ┌──────────┬──────────┬──────────┐
//!               │ worker 0 │ worker 1 │ worker N │  retry up to max_attempts
//!               └──────────┴──────────┴──────────┘
//! ```

mod queue;

pub use queue::{
    BackgroundTask, QueueError, TaskError, WriteQueue, WriteQueueConfig, WriteQueueStats,
};

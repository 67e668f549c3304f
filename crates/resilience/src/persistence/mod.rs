//! Durable tracking of deferred operations
//!
//! This module provides:
//! - [`AsyncOperation`] and [`OperationStatus`] - the lifecycle record
//! - [`OperationStore`] trait with [`InMemoryOperationStore`] for testing
//!   and [`PostgresOperationStore`] for production
//! - [`AsyncOperationTracker`] - transition rules on top of a store

mod memory;
mod operation;
mod postgres;
mod store;
mod tracker;

pub use memory::InMemoryOperationStore;
pub use operation::{AsyncOperation, OperationStatus};
pub use postgres::PostgresOperationStore;
pub use store::{OperationStore, TrackerError};
pub use tracker::{AsyncOperationTracker, TerminalOutcome, TerminalWrite, TransitionDetail};

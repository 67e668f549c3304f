//! OperationStore trait definition

use async_trait::async_trait;

use super::operation::{AsyncOperation, OperationStatus};

/// Error type for operation tracking
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// No record with this request ID
    #[error("operation not found: {0}")]
    NotFound(String),

    /// A record with this request ID already exists
    #[error("operation already exists: {0}")]
    AlreadyExists(String),

    /// Transition not allowed by the lifecycle
    #[error("invalid transition for {request_id}: {from} -> {to}")]
    InvalidTransition {
        request_id: String,
        from: OperationStatus,
        to: OperationStatus,
    },

    /// Concurrency conflict (optimistic locking failed)
    #[error("concurrency conflict on {request_id}: expected version {expected}, got {actual}")]
    ConcurrencyConflict {
        request_id: String,
        expected: i64,
        actual: i64,
    },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable storage for [`AsyncOperation`] records
#[async_trait]
pub trait OperationStore: Send + Sync + 'static {
    /// Insert a new record; fails with `AlreadyExists` on a duplicate ID
    async fn insert(&self, operation: &AsyncOperation) -> Result<(), TrackerError>;

    /// Load a record by request ID
    async fn get(&self, request_id: &str) -> Result<Option<AsyncOperation>, TrackerError>;

    /// Replace a record if its stored version equals `operation.version`
    ///
    /// Returns the stored record with its version incremented.
    async fn update(&self, operation: &AsyncOperation) -> Result<AsyncOperation, TrackerError>;

    /// Records of one operation type in one status, oldest first
    async fn list_by_status(
        &self,
        operation: &str,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<AsyncOperation>, TrackerError>;
}

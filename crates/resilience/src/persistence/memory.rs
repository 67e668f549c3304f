//! In-memory implementation of OperationStore for testing

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::operation::{AsyncOperation, OperationStatus};
use super::store::{OperationStore, TrackerError};

/// In-memory implementation of OperationStore
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// version checks, but does not survive a restart.
///
/// # Example
///
/// ```
/// use phonebill_resilience::InMemoryOperationStore;
///
/// let store = InMemoryOperationStore::new();
/// assert_eq!(store.operation_count(), 0);
/// ```
pub struct InMemoryOperationStore {
    operations: RwLock<HashMap<String, AsyncOperation>>,
}

impl InMemoryOperationStore {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored records
    pub fn operation_count(&self) -> usize {
        self.operations.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.operations.write().clear();
    }
}

impl Default for InMemoryOperationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OperationStore for InMemoryOperationStore {
    async fn insert(&self, operation: &AsyncOperation) -> Result<(), TrackerError> {
        let mut operations = self.operations.write();
        if operations.contains_key(&operation.request_id) {
            return Err(TrackerError::AlreadyExists(operation.request_id.clone()));
        }
        operations.insert(operation.request_id.clone(), operation.clone());
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<AsyncOperation>, TrackerError> {
        Ok(self.operations.read().get(request_id).cloned())
    }

    async fn update(&self, operation: &AsyncOperation) -> Result<AsyncOperation, TrackerError> {
        let mut operations = self.operations.write();
        let stored = operations
            .get_mut(&operation.request_id)
            .ok_or_else(|| TrackerError::NotFound(operation.request_id.clone()))?;

        if stored.version != operation.version {
            return Err(TrackerError::ConcurrencyConflict {
                request_id: operation.request_id.clone(),
                expected: operation.version,
                actual: stored.version,
            });
        }

        let mut updated = operation.clone();
        updated.version += 1;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_by_status(
        &self,
        operation: &str,
        status: OperationStatus,
        limit: usize,
    ) -> Result<Vec<AsyncOperation>, TrackerError> {
        let operations = self.operations.read();
        let mut matching: Vec<AsyncOperation> = operations
            .values()
            .filter(|op| op.operation == operation && op.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|op| op.requested_at);
        matching.truncate(limit);
        Ok(matching)
    }
}

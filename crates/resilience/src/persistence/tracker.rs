//! Lifecycle tracking for deferred operations
//!
//! The tracker owns the transition rules; the store only guarantees
//! versioned writes. A lost optimistic-lock race is resolved by re-reading
//! the record and re-validating the transition against the fresh state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::operation::{AsyncOperation, OperationStatus};
use super::store::{OperationStore, TrackerError};
use crate::worker::{BackgroundTask, TaskError};

/// Re-read attempts after a version conflict
const MAX_CONFLICT_RETRIES: u32 = 3;

/// Data attached to a transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionDetail {
    None,
    /// Result summary, stored on completion
    Result(Value),
    /// Failure reason
    Reason(String),
}

/// Durable lifecycle record keeper, keyed by request ID
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use phonebill_resilience::{AsyncOperationTracker, InMemoryOperationStore, OperationStatus};
///
/// # tokio_test::block_on(async {
/// let tracker = AsyncOperationTracker::new(Arc::new(InMemoryOperationStore::new()));
/// tracker.create("REQ_20250101_0000AAAA", "bill_inquiry", "01012345678:2025-01").await.unwrap();
/// let op = tracker.complete("REQ_20250101_0000AAAA", serde_json::json!({"total": 1})).await.unwrap();
/// assert_eq!(op.status, OperationStatus::Completed);
/// # });
/// ```
pub struct AsyncOperationTracker {
    store: Arc<dyn OperationStore>,
}

impl AsyncOperationTracker {
    pub fn new(store: Arc<dyn OperationStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn OperationStore> {
        &self.store
    }

    /// Record a new operation in `REQUESTED`
    #[instrument(skip(self))]
    pub async fn create(
        &self,
        request_id: &str,
        operation: &str,
        domain_key: &str,
    ) -> Result<AsyncOperation, TrackerError> {
        let record = AsyncOperation::new(request_id, operation, domain_key);
        self.store.insert(&record).await?;
        info!(request_id, operation, domain_key, "operation requested");
        Ok(record)
    }

    /// Current state of an operation
    pub async fn query(&self, request_id: &str) -> Result<AsyncOperation, TrackerError> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| TrackerError::NotFound(request_id.to_string()))
    }

    /// Move an operation to `to`, enforcing the lifecycle
    ///
    /// A terminal record accepts nothing further, not even its own status
    /// again; see [`TerminalWrite`] for retry-safe terminal writes.
    #[instrument(skip(self, detail), fields(to = %to))]
    pub async fn transition(
        &self,
        request_id: &str,
        to: OperationStatus,
        detail: TransitionDetail,
    ) -> Result<AsyncOperation, TrackerError> {
        let mut attempt = 0;
        loop {
            let current = self.query(request_id).await?;

            if !current.status.can_transition_to(to) {
                return Err(TrackerError::InvalidTransition {
                    request_id: request_id.to_string(),
                    from: current.status,
                    to,
                });
            }

            let next = apply(current, to, detail.clone());
            match self.store.update(&next).await {
                Ok(stored) => {
                    info!(request_id, status = %stored.status, "operation transitioned");
                    return Ok(stored);
                }
                Err(TrackerError::ConcurrencyConflict { .. }) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    debug!(request_id, attempt, "version conflict, re-reading");
                }
                Err(e) => {
                    warn!(request_id, error = %e, "transition failed");
                    return Err(e);
                }
            }
        }
    }

    pub async fn mark_validated(&self, request_id: &str) -> Result<AsyncOperation, TrackerError> {
        self.transition(request_id, OperationStatus::Validated, TransitionDetail::None)
            .await
    }

    pub async fn mark_processing(&self, request_id: &str) -> Result<AsyncOperation, TrackerError> {
        self.transition(request_id, OperationStatus::Processing, TransitionDetail::None)
            .await
    }

    /// Complete an operation, passing through `PROCESSING` when the record
    /// has not reached it yet
    pub async fn complete(
        &self,
        request_id: &str,
        result: Value,
    ) -> Result<AsyncOperation, TrackerError> {
        let current = self.query(request_id).await?;
        if matches!(
            current.status,
            OperationStatus::Requested | OperationStatus::Validated
        ) {
            match self.mark_processing(request_id).await {
                Ok(_) => {}
                // A concurrent writer got there first; the final transition
                // below re-validates against whatever it left behind
                Err(TrackerError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.transition(
            request_id,
            OperationStatus::Completed,
            TransitionDetail::Result(result),
        )
        .await
    }

    pub async fn fail(
        &self,
        request_id: &str,
        reason: impl Into<String>,
    ) -> Result<AsyncOperation, TrackerError> {
        self.transition(
            request_id,
            OperationStatus::Failed,
            TransitionDetail::Reason(reason.into()),
        )
        .await
    }

    /// Oldest `PROCESSING` records of one operation type
    pub async fn list_processing(
        &self,
        operation: &str,
        limit: usize,
    ) -> Result<Vec<AsyncOperation>, TrackerError> {
        self.store
            .list_by_status(operation, OperationStatus::Processing, limit)
            .await
    }
}

fn apply(mut record: AsyncOperation, to: OperationStatus, detail: TransitionDetail) -> AsyncOperation {
    record.status = to;
    match detail {
        TransitionDetail::None => {}
        TransitionDetail::Result(value) => record.result_payload = Some(value),
        TransitionDetail::Reason(reason) => record.failure_reason = Some(reason),
    }
    if to.is_terminal() {
        record.processed_at = Some(Utc::now());
    }
    record
}

/// Terminal outcome written in the background
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Completed(Value),
    Failed(String),
}

/// Background task applying a terminal transition
///
/// Safe to run more than once: finding the record already holding the
/// target status counts as done.
pub struct TerminalWrite {
    tracker: Arc<AsyncOperationTracker>,
    request_id: String,
    outcome: TerminalOutcome,
}

impl TerminalWrite {
    pub fn new(
        tracker: Arc<AsyncOperationTracker>,
        request_id: impl Into<String>,
        outcome: TerminalOutcome,
    ) -> Self {
        Self {
            tracker,
            request_id: request_id.into(),
            outcome,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn outcome(&self) -> &TerminalOutcome {
        &self.outcome
    }
}

#[async_trait]
impl BackgroundTask for TerminalWrite {
    fn name(&self) -> &str {
        "terminal_write"
    }

    async fn run(&self) -> Result<(), TaskError> {
        let result = match &self.outcome {
            TerminalOutcome::Completed(value) => {
                self.tracker.complete(&self.request_id, value.clone()).await
            }
            TerminalOutcome::Failed(reason) => {
                self.tracker.fail(&self.request_id, reason.clone()).await
            }
        };

        let target = match &self.outcome {
            TerminalOutcome::Completed(_) => OperationStatus::Completed,
            TerminalOutcome::Failed(_) => OperationStatus::Failed,
        };
        match result {
            Ok(_) => Ok(()),
            Err(TrackerError::InvalidTransition { from, .. }) if from == target => {
                debug!(request_id = %self.request_id, status = %from, "terminal status already recorded");
                Ok(())
            }
            Err(e @ (TrackerError::Database(_) | TrackerError::ConcurrencyConflict { .. })) => {
                Err(TaskError::Retryable(e.to_string()))
            }
            Err(e) => Err(TaskError::Permanent(e.to_string())),
        }
    }
}

//! Request flows for bill inquiry and product change
//!
//! Both flows share one shape:
//!
//! ```text
//! create(REQUESTED) ──► cache hit? ──yes──► COMPLETED (cached)
//!                          │ no
//!                          ▼
//!                   ResilientClient
//!          ┌───────────────┼────────────────┐
//!        Ready          Processing       rejection
//!    cache + COMPLETED   PROCESSING        FAILED
//! ```
//!
//! `create` and `PROCESSING` are written before answering so a follow-up
//! status query always finds the record. Terminal writes go through the
//! background write queue.

mod bill;
mod product;

use std::sync::Arc;

use phonebill_resilience::{
    AsyncOperation, AsyncOperationTracker, BackgroundTask, OperationStatus, TerminalOutcome,
    TerminalWrite, TrackerError, WriteQueue,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::ProcessStatus;
use crate::error::IntegrationError;

pub use bill::BillInquiryOrchestrator;
pub use product::{
    ProductChangeOrchestrator, REASON_CURRENT_PRODUCT_MISMATCH, REASON_LINE_NOT_ACTIVE,
    REASON_OPERATOR_MISMATCH, REASON_TARGET_NOT_AVAILABLE,
};

/// Operation name recorded for bill inquiries
pub const BILL_INQUIRY: &str = "bill_inquiry";

/// Operation name recorded for product changes
pub const PRODUCT_CHANGE: &str = "product_change";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Integration(#[from] IntegrationError),

    /// The request ID belongs to a different operation type
    #[error("{request_id} is not a {expected} operation")]
    WrongOperation {
        request_id: String,
        expected: &'static str,
    },
}

/// Lifecycle writes shared by the flows
#[derive(Clone)]
pub struct OperationRecorder {
    tracker: Arc<AsyncOperationTracker>,
    queue: Arc<WriteQueue>,
}

impl OperationRecorder {
    pub fn new(tracker: Arc<AsyncOperationTracker>, queue: Arc<WriteQueue>) -> Self {
        Self { tracker, queue }
    }

    pub fn tracker(&self) -> &Arc<AsyncOperationTracker> {
        &self.tracker
    }

    /// Load a record, checking it belongs to `operation`
    pub async fn load(
        &self,
        request_id: &str,
        operation: &'static str,
    ) -> Result<AsyncOperation, OrchestratorError> {
        let record = self.tracker.query(request_id).await?;
        if record.operation != operation {
            return Err(OrchestratorError::WrongOperation {
                request_id: request_id.to_string(),
                expected: operation,
            });
        }
        Ok(record)
    }

    /// Queue a terminal write; written inline when the queue refuses it
    pub async fn terminal(&self, request_id: &str, outcome: TerminalOutcome) {
        let task = TerminalWrite::new(self.tracker.clone(), request_id, outcome.clone());
        match self.queue.submit(task) {
            Ok(()) => debug!(request_id, "terminal write queued"),
            Err(e) => {
                warn!(request_id, error = %e, "write queue refused terminal write, writing inline");
                let inline = TerminalWrite::new(self.tracker.clone(), request_id, outcome);
                if let Err(e) = inline.run().await {
                    warn!(request_id, error = %e, "inline terminal write failed");
                }
            }
        }
    }

    pub async fn complete<T: Serialize>(&self, request_id: &str, result: &T) {
        match to_payload(result) {
            Ok(payload) => {
                self.terminal(request_id, TerminalOutcome::Completed(payload))
                    .await
            }
            Err(e) => {
                warn!(request_id, error = %e, "result not serializable, recording as failed");
                self.terminal(request_id, TerminalOutcome::Failed(e.to_string()))
                    .await
            }
        }
    }

    pub async fn fail(&self, request_id: &str, reason: impl Into<String>) {
        self.terminal(request_id, TerminalOutcome::Failed(reason.into()))
            .await
    }

    /// Synchronous terminal write for re-probes
    ///
    /// A record another writer already settled is reported as it stands.
    pub async fn settle(
        &self,
        request_id: &str,
        outcome: TerminalOutcome,
    ) -> Result<ProcessStatus, TrackerError> {
        let written = match outcome {
            TerminalOutcome::Completed(payload) => self.tracker.complete(request_id, payload).await,
            TerminalOutcome::Failed(reason) => self.tracker.fail(request_id, reason).await,
        };
        match written {
            Ok(record) => Ok(process_status(record.status)),
            Err(TrackerError::InvalidTransition { from, .. }) => {
                debug!(request_id, status = %from, "already settled by another writer");
                Ok(process_status(from))
            }
            Err(e) => Err(e),
        }
    }
}

/// Caller-facing view of a lifecycle status
pub fn process_status(status: OperationStatus) -> ProcessStatus {
    match status {
        OperationStatus::Completed => ProcessStatus::Completed,
        OperationStatus::Failed => ProcessStatus::Failed,
        OperationStatus::Requested | OperationStatus::Validated | OperationStatus::Processing => {
            ProcessStatus::Processing
        }
    }
}

fn to_payload<T: Serialize>(value: &T) -> Result<Value, IntegrationError> {
    serde_json::to_value(value)
        .map_err(|e| IntegrationError::internal(format!("serializing result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use phonebill_resilience::{InMemoryOperationStore, WriteQueueConfig};
    use serde_json::json;

    fn recorder(capacity: usize) -> OperationRecorder {
        let tracker = Arc::new(AsyncOperationTracker::new(Arc::new(
            InMemoryOperationStore::new(),
        )));
        let queue = Arc::new(WriteQueue::start(
            WriteQueueConfig::default()
                .with_capacity(capacity)
                .with_workers(1),
        ));
        OperationRecorder::new(tracker, queue)
    }

    #[test]
    fn test_process_status_mapping() {
        assert_eq!(process_status(OperationStatus::Requested), ProcessStatus::Processing);
        assert_eq!(process_status(OperationStatus::Validated), ProcessStatus::Processing);
        assert_eq!(process_status(OperationStatus::Completed), ProcessStatus::Completed);
        assert_eq!(process_status(OperationStatus::Failed), ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_write_lands_after_flush() {
        let recorder = recorder(16);
        recorder
            .tracker()
            .create("REQ_1", BILL_INQUIRY, "01012345678:2025-01")
            .await
            .unwrap();

        recorder.complete("REQ_1", &json!({"total_fee": 1000})).await;
        recorder.queue.flush().await;

        let record = recorder.tracker().query("REQ_1").await.unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
    }

    #[tokio::test]
    async fn test_closed_queue_writes_inline() {
        let recorder = recorder(16);
        recorder.queue.shutdown().await.unwrap();
        recorder
            .tracker()
            .create("REQ_2", PRODUCT_CHANGE, "01012345678:A:B")
            .await
            .unwrap();

        recorder.fail("REQ_2", "operator mismatch").await;

        let record = recorder.tracker().query("REQ_2").await.unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert_eq!(record.failure_reason.as_deref(), Some("operator mismatch"));
    }

    #[tokio::test]
    async fn test_settle_reports_existing_terminal_state() {
        let recorder = recorder(16);
        let tracker = recorder.tracker().clone();
        tracker
            .create("REQ_3", BILL_INQUIRY, "01012345678:2025-01")
            .await
            .unwrap();
        tracker.mark_processing("REQ_3").await.unwrap();
        tracker.fail("REQ_3", "line not found").await.unwrap();

        let status = recorder
            .settle("REQ_3", TerminalOutcome::Completed(json!({})))
            .await
            .unwrap();
        assert_eq!(status, ProcessStatus::Failed);
    }

    #[tokio::test]
    async fn test_load_checks_operation() {
        let recorder = recorder(16);
        recorder
            .tracker()
            .create("REQ_4", BILL_INQUIRY, "01012345678:2025-01")
            .await
            .unwrap();

        assert!(recorder.load("REQ_4", BILL_INQUIRY).await.is_ok());
        assert!(matches!(
            recorder.load("REQ_4", PRODUCT_CHANGE).await,
            Err(OrchestratorError::WrongOperation { .. })
        ));
        assert!(matches!(
            recorder.load("REQ_missing", BILL_INQUIRY).await,
            Err(OrchestratorError::Tracker(TrackerError::NotFound(_)))
        ));
    }
}

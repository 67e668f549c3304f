//! Asynchronous operation record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an asynchronous operation
///
/// ```text
/// REQUESTED ──► VALIDATED ──► PROCESSING ──► COMPLETED
///     │             │              │
///     │             │              └──────► FAILED
///     └─────────────┴─────────────────────► FAILED
/// ```
///
/// `REQUESTED` may also go straight to `PROCESSING`. `COMPLETED` and
/// `FAILED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Requested,
    Validated,
    Processing,
    Completed,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Validated => "VALIDATED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    /// No further transition is accepted
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Work has been accepted but has not finished
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Validated | Self::Processing)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Requested, Validated)
                | (Requested, Processing)
                | (Requested, Failed)
                | (Validated, Processing)
                | (Validated, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(Self::Requested),
            "VALIDATED" => Ok(Self::Validated),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown operation status: {other}")),
        }
    }
}

/// Durable lifecycle record of a deferred request, keyed by request ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncOperation {
    /// Caller-supplied or generated unique ID
    pub request_id: String,

    /// Business action the record belongs to (e.g. "bill_inquiry")
    pub operation: String,

    /// Business identity of the request (e.g. line number and month)
    pub domain_key: String,

    pub status: OperationStatus,
    pub requested_at: DateTime<Utc>,

    /// Set when the record reaches a terminal status
    pub processed_at: Option<DateTime<Utc>>,

    /// Result summary stored on completion
    pub result_payload: Option<serde_json::Value>,

    pub failure_reason: Option<String>,

    /// Optimistic-lock version, bumped on every update
    pub version: i64,
}

impl AsyncOperation {
    /// A fresh record in `REQUESTED`
    pub fn new(
        request_id: impl Into<String>,
        operation: impl Into<String>,
        domain_key: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            operation: operation.into(),
            domain_key: domain_key.into(),
            status: OperationStatus::Requested,
            requested_at: Utc::now(),
            processed_at: None,
            result_payload: None,
            failure_reason: None,
            version: 0,
        }
    }
}

// Error taxonomy for KOS calls
//
// Classification happens once, where the failure is observed. Everything
// downstream (retry, breaker accounting, fallback) asks the error what it is.

use phonebill_resilience::{CircuitBreakerError, Retryable, TimeoutError};
use thiserror::Error;

/// Result code KOS uses for success
pub const RESULT_SUCCESS: &str = "0000";

/// Result code KOS uses for an internal failure
pub const RESULT_SYSTEM_ERROR: &str = "9999";

/// Failure of a KOS call
#[derive(Debug, Clone, Error)]
pub enum IntegrationError {
    /// Network unreachable, connection reset, transport-level timeout
    #[error("KOS unreachable: {0}")]
    Connectivity(String),

    /// 5xx response or KOS system error code
    #[error("KOS server error ({code}): {message}")]
    UpstreamServer { code: String, message: String },

    /// 4xx response or business rejection result code
    #[error("KOS rejected request ({code}): {message}")]
    UpstreamClient { code: String, message: String },

    /// The time limiter cancelled the call
    #[error(transparent)]
    Timeout(#[from] TimeoutError),

    /// The breaker refused the call without contacting KOS
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),

    /// Every permitted attempt failed with a transient error
    #[error("KOS call failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        source: Box<IntegrationError>,
    },

    /// The response did not match the expected schema
    #[error("KOS response conversion failed: {0}")]
    DataConversion(String),

    /// Anything else
    #[error("internal integration error: {0}")]
    Internal(String),
}

impl IntegrationError {
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::DataConversion(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Map a KOS result code and message onto the taxonomy
    pub fn from_result_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        if code == RESULT_SYSTEM_ERROR {
            Self::UpstreamServer { code, message }
        } else {
            Self::UpstreamClient { code, message }
        }
    }

    /// Map a non-success HTTP status onto the taxonomy
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let code = status.to_string();
        let message = body.into();
        if status >= 500 {
            Self::UpstreamServer { code, message }
        } else {
            Self::UpstreamClient { code, message }
        }
    }

    /// Upstream is degraded; the caller should defer rather than fail
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, Self::CircuitOpen(_) | Self::RetriesExhausted { .. })
    }

    /// KOS answered and said no
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::UpstreamClient { .. })
    }

    /// Short reason suitable for an operation's failure record
    pub fn rejection_reason(&self) -> String {
        match self {
            Self::UpstreamClient { code, message } => match reason_for_code(code) {
                Some(reason) => reason.to_string(),
                None if message.is_empty() => format!("rejected by KOS ({code})"),
                None => message.clone(),
            },
            other => other.to_string(),
        }
    }
}

impl Retryable for IntegrationError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::UpstreamServer { .. } | Self::Timeout(_)
        )
    }
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::DataConversion(err.to_string())
        } else if err.is_builder() {
            Self::Internal(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_http_status(status.as_u16(), err.to_string())
        } else {
            // connect, timeout, request and body errors
            Self::Connectivity(err.to_string())
        }
    }
}

/// Failure reason for the business result codes KOS documents
pub fn reason_for_code(code: &str) -> Option<&'static str> {
    match code {
        "1001" | "2001" | "3001" => Some("line not found"),
        "1002" | "2002" | "3002" => Some("line is not active"),
        "1003" => Some("no bill for month"),
        "2003" => Some("product code not found"),
        "2004" => Some("target product not available"),
        "2005" => Some("operator mismatch"),
        "2099" => Some("product change processing error"),
        "3003" => Some("product inquiry error"),
        _ => None,
    }
}

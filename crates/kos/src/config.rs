// KOS integration configuration
//
// Loaded from environment variables once at startup; breaker, retry and
// timeout settings live in `phonebill_resilience::ResilienceConfig`.

use std::env;
use std::time::Duration;

use phonebill_resilience::ConfigError;
use serde::{Deserialize, Serialize};

/// Endpoint paths, relative to the base URL
///
/// `{requestId}` and `{lineNumber}` are substituted per call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KosPaths {
    pub bill_inquiry: String,
    pub bill_status: String,
    pub available_months: String,
    pub product_list: String,
    pub product_change: String,
    pub product_inquiry: String,
    pub health: String,
}

impl Default for KosPaths {
    fn default() -> Self {
        Self {
            bill_inquiry: "/api/bill/inquiry".to_string(),
            bill_status: "/api/bill/status/{requestId}".to_string(),
            available_months: "/api/bill/available-months/{lineNumber}".to_string(),
            product_list: "/api/products".to_string(),
            product_change: "/api/products/change".to_string(),
            product_inquiry: "/api/products/inquiry".to_string(),
            health: "/health".to_string(),
        }
    }
}

/// Configuration for talking to KOS
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KosConfig {
    /// Base URL, without trailing slash
    pub base_url: String,

    /// `X-Service-Name` sent on bill calls
    pub service_name: String,

    /// `X-Service-Name` sent on product calls
    pub product_service_name: String,

    pub paths: KosPaths,

    /// How often PROCESSING operations are re-probed
    #[serde(with = "phonebill_resilience::duration_millis")]
    pub reconcile_interval: Duration,

    /// Operations re-probed per operation type and pass
    pub reconcile_batch_size: usize,
}

impl Default for KosConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8084".to_string(),
            service_name: "MVNO-BILL-INQUIRY".to_string(),
            product_service_name: "MVNO-PRODUCT-SERVICE".to_string(),
            paths: KosPaths::default(),
            reconcile_interval: Duration::from_secs(30),
            reconcile_batch_size: 100,
        }
    }
}

impl KosConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `KOS_BASE_URL`: upstream base URL (default: http://localhost:8084)
    /// - `KOS_SERVICE_NAME`: service name for bill calls (default: MVNO-BILL-INQUIRY)
    /// - `KOS_PRODUCT_SERVICE_NAME`: service name for product calls (default: MVNO-PRODUCT-SERVICE)
    /// - `RECONCILE_INTERVAL_MS`: re-probe interval (default: 30000)
    /// - `RECONCILE_BATCH_SIZE`: re-probes per pass (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = env::var("KOS_BASE_URL").unwrap_or(defaults.base_url);
        let service_name = env::var("KOS_SERVICE_NAME").unwrap_or(defaults.service_name);
        let product_service_name =
            env::var("KOS_PRODUCT_SERVICE_NAME").unwrap_or(defaults.product_service_name);

        let reconcile_interval = env::var("RECONCILE_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.reconcile_interval);

        let reconcile_batch_size = env::var("RECONCILE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.reconcile_batch_size);

        let config = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_name,
            product_service_name,
            paths: defaults.paths,
            reconcile_interval,
            reconcile_batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_paths(mut self, paths: KosPaths) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("KOS_BASE_URL".to_string()));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                "base_url",
                format!("{} is not an http(s) URL", self.base_url),
            ));
        }
        if self.service_name.is_empty() || self.product_service_name.is_empty() {
            return Err(ConfigError::invalid("service_name", "must not be empty"));
        }
        if self.reconcile_interval.is_zero() {
            return Err(ConfigError::invalid(
                "reconcile_interval",
                "must be greater than zero",
            ));
        }
        if self.reconcile_batch_size == 0 {
            return Err(ConfigError::invalid(
                "reconcile_batch_size",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

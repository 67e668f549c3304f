// Transport to KOS
//
// The trait is the seam between the resilience composition and the wire.
// `HttpKosTransport` classifies every failure into `IntegrationError` before
// returning, so retry and breaker accounting never look at reqwest types.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::{KosConfig, KosPaths};
use crate::dto::KosCommonResponse;
use crate::error::IntegrationError;

/// Header naming the calling service
pub const SERVICE_NAME_HEADER: &str = "X-Service-Name";

/// Header carrying the request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// KOS endpoints; each has its own circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KosOperation {
    BillInquiry,
    StatusCheck,
    ProductList,
    ProductChange,
    ProductInquiry,
    AvailableMonths,
    Health,
}

impl KosOperation {
    /// Name of the circuit breaker guarding this endpoint
    pub fn breaker_name(&self) -> &'static str {
        match self {
            Self::BillInquiry => "kos-bill-inquiry",
            Self::StatusCheck => "kos-status-check",
            Self::ProductList => "kos-product-list",
            Self::ProductChange => "kos-product-change",
            Self::ProductInquiry => "kos-product-inquiry",
            Self::AvailableMonths => "kos-available-months",
            Self::Health => "kos-health",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Self::BillInquiry | Self::ProductChange | Self::ProductInquiry => Method::POST,
            Self::StatusCheck | Self::ProductList | Self::AvailableMonths | Self::Health => {
                Method::GET
            }
        }
    }

    /// Path with `{requestId}` / `{lineNumber}` substituted
    pub fn path(&self, paths: &KosPaths, param: Option<&str>) -> String {
        let template = match self {
            Self::BillInquiry => &paths.bill_inquiry,
            Self::StatusCheck => &paths.bill_status,
            Self::ProductList => &paths.product_list,
            Self::ProductChange => &paths.product_change,
            Self::ProductInquiry => &paths.product_inquiry,
            Self::AvailableMonths => &paths.available_months,
            Self::Health => &paths.health,
        };
        let param = param.unwrap_or_default();
        template
            .replace("{requestId}", param)
            .replace("{lineNumber}", param)
    }
}

impl std::fmt::Display for KosOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.breaker_name())
    }
}

/// One outbound call
#[derive(Debug, Clone)]
pub struct KosRequest {
    pub operation: KosOperation,
    pub request_id: String,
    pub service_name: String,
    /// JSON body for POST endpoints
    pub body: Option<Value>,
    /// Value substituted into the path template
    pub path_param: Option<String>,
}

impl KosRequest {
    pub fn new(
        operation: KosOperation,
        request_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            request_id: request_id.into(),
            service_name: service_name.into(),
            body: None,
            path_param: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_path_param(mut self, param: impl Into<String>) -> Self {
        self.path_param = Some(param.into());
        self
    }
}

/// Sends a request and returns the raw JSON body
#[async_trait]
pub trait KosTransport: Send + Sync {
    async fn send(&self, request: &KosRequest) -> Result<Value, IntegrationError>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpKosTransport {
    base_url: String,
    paths: KosPaths,
    http: reqwest::Client,
}

impl HttpKosTransport {
    /// Build a transport; the overall call deadline is enforced by the
    /// time limiter, only connecting is bounded here
    pub fn new(config: &KosConfig, connect_timeout: Duration) -> Result<Self, IntegrationError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| IntegrationError::internal(format!("building HTTP client: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            paths: config.paths.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Value, IntegrationError> {
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(error_for_status(status, body));
        }

        let body = response.json::<Value>().await?;
        Ok(body)
    }
}

#[async_trait]
impl KosTransport for HttpKosTransport {
    #[instrument(skip(self, request), fields(operation = %request.operation, request_id = %request.request_id))]
    async fn send(&self, request: &KosRequest) -> Result<Value, IntegrationError> {
        let path = request
            .operation
            .path(&self.paths, request.path_param.as_deref());
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "calling KOS");

        let mut builder = self
            .http
            .request(request.operation.method(), &url)
            .header(SERVICE_NAME_HEADER, &request.service_name)
            .header(REQUEST_ID_HEADER, &request.request_id);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        self.handle_response(response).await
    }
}

/// Error for a non-2xx answer
///
/// KOS often wraps a business rejection in an envelope even on 4xx; its
/// result code wins over the HTTP status when present.
fn error_for_status(status: StatusCode, body: String) -> IntegrationError {
    if status.is_client_error() {
        if let Ok(envelope) = serde_json::from_str::<KosCommonResponse<Value>>(&body) {
            if let Some(code) = envelope.result_code.filter(|c| !c.is_empty()) {
                return IntegrationError::from_result_code(
                    code,
                    envelope.result_message.unwrap_or_default(),
                );
            }
        }
    }
    IntegrationError::from_http_status(status.as_u16(), body)
}

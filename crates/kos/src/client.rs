// Resilient KOS client
//
// Every upstream call goes through the same explicit composition:
//
//   bulkhead permit
//     -> retry executor
//        -> circuit breaker admission (per attempt)
//           -> time limiter
//              -> transport
//
// A degraded upstream (breaker open, retries spent on transient failures)
// is reported as `CallResult::Processing` instead of an error so the caller
// can defer to asynchronous completion.

use std::sync::Arc;

use phonebill_resilience::{
    CircuitBreakerRegistry, ResilienceConfig, RetryError, RetryExecutor, Retryable, TimeLimiter,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::KosConfig;
use crate::convert;
use crate::domain::{
    normalize_line_number, BillInquiryResult, CustomerProduct, Product, ProductChangeQuery,
    ProductChangeResult,
};
use crate::dto::{KosBillInquiryRequest, KosProductChangeRequest, KosProductInquiryRequest};
use crate::error::IntegrationError;
use crate::request_id;
use crate::transport::{KosOperation, KosRequest, KosTransport};

/// Answer of a guarded call
#[derive(Debug, Clone)]
pub enum CallResult<T> {
    /// KOS answered and the payload converted
    Ready(T),
    /// KOS is degraded; the request should complete later
    Processing { cause: IntegrationError },
}

impl<T> CallResult<T> {
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Processing { .. } => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CallResult<U> {
        match self {
            Self::Ready(value) => CallResult::Ready(f(value)),
            Self::Processing { cause } => CallResult::Processing { cause },
        }
    }
}

type Result<T> = std::result::Result<T, IntegrationError>;

/// KOS client guarded by breakers, retries, time limits and a bulkhead
pub struct ResilientClient {
    transport: Arc<dyn KosTransport>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
    limiter: TimeLimiter,
    bulkhead: Arc<Semaphore>,
    config: Arc<KosConfig>,
}

impl ResilientClient {
    pub fn new(
        transport: Arc<dyn KosTransport>,
        breakers: Arc<CircuitBreakerRegistry>,
        resilience: &ResilienceConfig,
        config: Arc<KosConfig>,
    ) -> Self {
        Self {
            transport,
            breakers,
            retry: RetryExecutor::new(resilience.retry.clone()),
            limiter: TimeLimiter::from_config(&resilience.timeout),
            bulkhead: Arc::new(Semaphore::new(resilience.max_concurrent_calls.max(1))),
            config,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn config(&self) -> &KosConfig {
        &self.config
    }

    /// Request bill details for a line and month
    #[instrument(skip(self), fields(line = %line_number, month = %month))]
    pub async fn inquire_bill(
        &self,
        request_id: &str,
        line_number: &str,
        month: &str,
    ) -> Result<CallResult<BillInquiryResult>> {
        let body = to_body(&KosBillInquiryRequest {
            line_number: normalize_line_number(line_number),
            billing_month: month.to_string(),
            request_id: request_id.to_string(),
        })?;
        let request = KosRequest::new(
            KosOperation::BillInquiry,
            request_id,
            &self.config.service_name,
        )
        .with_body(body);
        self.guarded(request, convert::bill_inquiry).await
    }

    /// Ask KOS for the current state of an earlier bill inquiry
    #[instrument(skip(self))]
    pub async fn check_bill_status(
        &self,
        request_id: &str,
    ) -> Result<CallResult<BillInquiryResult>> {
        let request = KosRequest::new(
            KosOperation::StatusCheck,
            request_id,
            &self.config.service_name,
        )
        .with_path_param(request_id);
        self.guarded(request, convert::bill_inquiry).await
    }

    /// Full product catalogue
    #[instrument(skip(self))]
    pub async fn product_list(&self, request_id: &str) -> Result<CallResult<Vec<Product>>> {
        let request = KosRequest::new(
            KosOperation::ProductList,
            request_id,
            &self.config.product_service_name,
        );
        self.guarded(request, convert::product_list).await
    }

    /// Product currently subscribed on a line
    #[instrument(skip(self), fields(line = %line_number))]
    pub async fn inquire_customer_product(
        &self,
        request_id: &str,
        line_number: &str,
    ) -> Result<CallResult<CustomerProduct>> {
        let body = to_body(&KosProductInquiryRequest {
            line_number: normalize_line_number(line_number),
            request_id: request_id.to_string(),
        })?;
        let request = KosRequest::new(
            KosOperation::ProductInquiry,
            request_id,
            &self.config.product_service_name,
        )
        .with_body(body);
        self.guarded(request, convert::customer_product).await
    }

    /// Submit a product change
    #[instrument(skip(self, query), fields(line = %query.line_number, target = %query.target_product_code))]
    pub async fn change_product(
        &self,
        request_id: &str,
        query: &ProductChangeQuery,
    ) -> Result<CallResult<ProductChangeResult>> {
        let body = to_body(&KosProductChangeRequest {
            line_number: normalize_line_number(&query.line_number),
            current_product_code: query.current_product_code.clone(),
            target_product_code: query.target_product_code.clone(),
            request_id: request_id.to_string(),
            requestor_id: query.requestor_id.clone(),
            change_reason: query.change_reason.clone(),
            effective_date: None,
        })?;
        let request = KosRequest::new(
            KosOperation::ProductChange,
            request_id,
            &self.config.product_service_name,
        )
        .with_body(body);
        self.guarded(request, convert::product_change).await
    }

    /// Months with a bill for the line; empty while KOS is degraded
    #[instrument(skip(self), fields(line = %line_number))]
    pub async fn available_months(&self, line_number: &str) -> Result<Vec<String>> {
        let line = normalize_line_number(line_number);
        let request = KosRequest::new(
            KosOperation::AvailableMonths,
            request_id::generate(),
            &self.config.service_name,
        )
        .with_path_param(line);
        let months = self.guarded(request, convert::available_months).await?;
        Ok(months.ready().unwrap_or_default())
    }

    /// Health probe; never fails, false on any problem
    pub async fn is_available(&self) -> bool {
        let request = KosRequest::new(
            KosOperation::Health,
            request_id::generate(),
            &self.config.service_name,
        );
        match self.limiter.bound(self.transport.send(&request)).await {
            Ok(Ok(raw)) => match convert::check_envelope(&raw) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "KOS health probe reported a system error");
                    false
                }
            },
            Ok(Err(e)) => {
                warn!(error = %e, "KOS health probe failed");
                false
            }
            Err(e) => {
                warn!(error = %e, "KOS health probe timed out");
                false
            }
        }
    }

    /// Call and convert, turning transient failures into `Processing`
    async fn guarded<T>(
        &self,
        request: KosRequest,
        decode: impl FnOnce(Value) -> Result<T>,
    ) -> Result<CallResult<T>> {
        match self.call(&request).await {
            Ok(raw) => decode(raw).map(CallResult::Ready),
            Err(e) if e.is_transient() => {
                warn!(
                    operation = %request.operation,
                    request_id = %request.request_id,
                    error = %e,
                    "KOS degraded, deferring"
                );
                Ok(CallResult::Processing { cause: e })
            }
            Err(e) => Err(e),
        }
    }

    /// One logical call: bulkhead, then retried breaker-guarded attempts
    async fn call(&self, request: &KosRequest) -> Result<Value> {
        let _slot = self
            .bulkhead
            .acquire()
            .await
            .map_err(|_| IntegrationError::internal("call bulkhead closed"))?;

        let breaker = self.breakers.breaker(request.operation.breaker_name());
        let breaker = &breaker;
        let transport = &self.transport;
        let limiter = &self.limiter;

        let result = self
            .retry
            .run(move |attempt| async move {
                // Admission per attempt: an open breaker abandons the rest
                let permit = breaker.allow()?;
                let started = Instant::now();
                let outcome = match limiter.bound(transport.send(request)).await {
                    Ok(result) => result.and_then(|raw| {
                        convert::check_envelope(&raw)?;
                        Ok(raw)
                    }),
                    Err(elapsed) => Err(IntegrationError::from(elapsed)),
                };
                let elapsed = started.elapsed();
                let state = match &outcome {
                    Ok(_) => permit.success(elapsed),
                    // Rejections and bad payloads mean KOS is up
                    Err(e) => permit.record(!e.is_retryable(), elapsed),
                };
                debug!(
                    attempt,
                    state = %state,
                    elapsed_ms = elapsed.as_millis() as u64,
                    ok = outcome.is_ok(),
                    "KOS attempt finished"
                );
                outcome
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(RetryError::Exhausted { attempts, source }) => {
                info!(
                    operation = %request.operation,
                    attempts,
                    "KOS retries exhausted"
                );
                Err(IntegrationError::RetriesExhausted {
                    attempts,
                    source: Box::new(source),
                })
            }
            Err(RetryError::NonRetryable { source, .. }) => Err(source),
        }
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| IntegrationError::internal(format!("serializing request: {e}")))
}

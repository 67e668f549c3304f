// Product change flow
//
// A change is validated against the catalogue and the line before KOS is
// asked to perform it. Validation failures are final and never reach the
// change endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use phonebill_resilience::{
    AsyncOperation, CacheCategory, CacheKey, CacheStore, OperationStatus, TerminalOutcome,
};
use tracing::{debug, info, instrument, warn};

use super::{
    process_status, to_payload, OperationRecorder, OrchestratorError, PRODUCT_CHANGE,
};
use crate::client::{CallResult, ResilientClient};
use crate::domain::{
    normalize_line_number, CustomerProduct, LineStatus, ProcessStatus, Product, ProductChange,
    ProductChangeQuery, ProductChangeResponse, ProductChangeResult,
};
use crate::error::IntegrationError;
use crate::reconciler::StatusProbe;
use crate::request_id;

pub const REASON_TARGET_NOT_AVAILABLE: &str = "target product not available";
pub const REASON_LINE_NOT_ACTIVE: &str = "line is not active";
pub const REASON_OPERATOR_MISMATCH: &str = "operator mismatch";
pub const REASON_CURRENT_PRODUCT_MISMATCH: &str = "current product mismatch";

const FALLBACK_FAILURE: &str = "product change processing error";

/// Single cache entry holding the whole catalogue
const CATALOGUE_KEY: &str = "all";

/// Where a flow step left the request
enum Step<T> {
    Continue(T),
    Done(ProductChangeResponse),
}

/// Validated product change with deferred completion
pub struct ProductChangeOrchestrator {
    client: Arc<ResilientClient>,
    cache: Arc<CacheStore>,
    recorder: OperationRecorder,
}

impl ProductChangeOrchestrator {
    pub fn new(
        client: Arc<ResilientClient>,
        cache: Arc<CacheStore>,
        recorder: OperationRecorder,
    ) -> Self {
        Self {
            client,
            cache,
            recorder,
        }
    }

    #[instrument(
        skip(self, request_id, query),
        fields(line = %query.line_number, target = %query.target_product_code)
    )]
    pub async fn change(
        &self,
        request_id: Option<String>,
        query: &ProductChangeQuery,
    ) -> Result<ProductChangeResponse, OrchestratorError> {
        let request_id = request_id::resolve(request_id);
        self.recorder
            .tracker()
            .create(&request_id, PRODUCT_CHANGE, &query.domain_key())
            .await?;

        let key = change_key(query);
        if let Some(change) = self.cache.get::<ProductChange>(&key).await {
            info!(request_id = %request_id, "product change served from cache");
            self.recorder.complete(&request_id, &change).await;
            return Ok(completed(request_id, change));
        }

        match self.validate(&request_id, query).await? {
            Step::Continue(()) => {}
            Step::Done(response) => return Ok(response),
        }
        self.recorder.tracker().mark_validated(&request_id).await?;

        let answer = self.client.change_product(&request_id, query).await;
        match answer {
            Ok(CallResult::Ready(result)) => self.settle_answer(request_id, query, result).await,
            Ok(CallResult::Processing { cause }) => {
                info!(request_id = %request_id, cause = %cause, "product change deferred");
                self.defer(request_id).await
            }
            Err(e) => self.reject_or_fail(request_id, e).await,
        }
    }

    /// Current state of a change, re-probing KOS while it is `PROCESSING`
    #[instrument(skip(self))]
    pub async fn status(
        &self,
        request_id: &str,
    ) -> Result<ProductChangeResponse, OrchestratorError> {
        let mut record = self.recorder.load(request_id, PRODUCT_CHANGE).await?;
        if record.status == OperationStatus::Processing {
            self.probe(&record).await?;
            record = self.recorder.load(request_id, PRODUCT_CHANGE).await?;
        }
        Ok(from_record(record))
    }

    /// Catalogue, from cache when possible
    pub async fn available_products(
        &self,
        request_id: &str,
    ) -> Result<CallResult<Vec<Product>>, IntegrationError> {
        let key = CacheKey::new(CacheCategory::AvailableProducts, [CATALOGUE_KEY]);
        if let Some(products) = self.cache.get::<Vec<Product>>(&key).await {
            return Ok(CallResult::Ready(products));
        }
        let answer = self.client.product_list(request_id).await?;
        if let CallResult::Ready(products) = &answer {
            if !products.is_empty() {
                self.cache.put(&key, products).await;
            }
        }
        Ok(answer)
    }

    /// What the line is subscribed to, from cache when possible
    pub async fn customer_product(
        &self,
        request_id: &str,
        line_number: &str,
    ) -> Result<CallResult<CustomerProduct>, IntegrationError> {
        let key = customer_key(line_number);
        if let Some(product) = self.cache.get::<CustomerProduct>(&key).await {
            return Ok(CallResult::Ready(product));
        }
        let answer = self
            .client
            .inquire_customer_product(request_id, line_number)
            .await?;
        if let CallResult::Ready(product) = &answer {
            self.cache.put(&key, product).await;
        }
        Ok(answer)
    }

    /// Check the target product and the line before calling KOS
    async fn validate(
        &self,
        request_id: &str,
        query: &ProductChangeQuery,
    ) -> Result<Step<()>, OrchestratorError> {
        let products = match self.available_products(request_id).await {
            Ok(CallResult::Ready(products)) => products,
            Ok(CallResult::Processing { cause }) => {
                info!(request_id, cause = %cause, "catalogue unavailable, deferring");
                return self.defer(request_id.to_string()).await.map(Step::Done);
            }
            Err(e) => return self.reject_or_fail(request_id.to_string(), e).await.map(Step::Done),
        };

        let target = products
            .iter()
            .find(|p| p.code == query.target_product_code)
            .filter(|p| p.is_available());
        let Some(target) = target else {
            return Ok(Step::Done(
                self.reject(request_id, REASON_TARGET_NOT_AVAILABLE).await,
            ));
        };

        let subscribed = match self.customer_product(request_id, &query.line_number).await {
            Ok(CallResult::Ready(subscribed)) => subscribed,
            Ok(CallResult::Processing { cause }) => {
                info!(request_id, cause = %cause, "line inquiry unavailable, deferring");
                return self.defer(request_id.to_string()).await.map(Step::Done);
            }
            Err(e) => return self.reject_or_fail(request_id.to_string(), e).await.map(Step::Done),
        };

        if let Some(reason) = check_eligibility(query, target, &subscribed) {
            return Ok(Step::Done(self.reject(request_id, reason).await));
        }
        debug!(request_id, "product change validated");
        Ok(Step::Continue(()))
    }

    async fn settle_answer(
        &self,
        request_id: String,
        query: &ProductChangeQuery,
        result: ProductChangeResult,
    ) -> Result<ProductChangeResponse, OrchestratorError> {
        match (result.status, result.change) {
            (ProcessStatus::Completed, Some(change)) => {
                self.cache.put(&change_key(query), &change).await;
                self.evict_line(&query.line_number).await;
                self.recorder.complete(&request_id, &change).await;
                Ok(completed(request_id, change))
            }
            (ProcessStatus::Failed, _) => {
                let reason = result
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| FALLBACK_FAILURE.to_string());
                Ok(self.reject(&request_id, &reason).await)
            }
            _ => self.defer(request_id).await,
        }
    }

    /// Drop the line's subscription and status entries after a change
    async fn evict_line(&self, line_number: &str) {
        let line = normalize_line_number(line_number);
        self.cache.evict(&customer_key(&line)).await;
        self.cache
            .evict(&CacheKey::new(CacheCategory::LineStatus, [&line]))
            .await;
    }

    async fn defer(&self, request_id: String) -> Result<ProductChangeResponse, OrchestratorError> {
        self.recorder.tracker().mark_processing(&request_id).await?;
        Ok(ProductChangeResponse {
            request_id,
            status: ProcessStatus::Processing,
            change: None,
            failure_reason: None,
        })
    }

    async fn reject(&self, request_id: &str, reason: &str) -> ProductChangeResponse {
        info!(request_id, reason, "product change rejected");
        self.recorder.fail(request_id, reason).await;
        ProductChangeResponse {
            request_id: request_id.to_string(),
            status: ProcessStatus::Failed,
            change: None,
            failure_reason: Some(reason.to_string()),
        }
    }

    async fn reject_or_fail(
        &self,
        request_id: String,
        error: IntegrationError,
    ) -> Result<ProductChangeResponse, OrchestratorError> {
        if error.is_rejection() {
            return Ok(self.reject(&request_id, &error.rejection_reason()).await);
        }
        warn!(request_id = %request_id, error = %error, "product change failed");
        self.recorder.fail(&request_id, error.to_string()).await;
        Err(error.into())
    }
}

#[async_trait]
impl StatusProbe for ProductChangeOrchestrator {
    fn operation(&self) -> &'static str {
        PRODUCT_CHANGE
    }

    /// Completed once KOS reports the target as the line's current product
    async fn probe(&self, record: &AsyncOperation) -> Result<ProcessStatus, OrchestratorError> {
        let Some(query) = query_from_key(&record.domain_key) else {
            warn!(request_id = %record.request_id, domain_key = %record.domain_key, "unreadable domain key");
            return Ok(self
                .recorder
                .settle(
                    &record.request_id,
                    TerminalOutcome::Failed(format!("unreadable domain key {}", record.domain_key)),
                )
                .await?);
        };

        // Bypass the cache: the cached subscription predates the change
        let answer = self
            .client
            .inquire_customer_product(&record.request_id, &query.line_number)
            .await;
        match answer {
            Ok(CallResult::Ready(subscribed))
                if subscribed.current_product_code == query.target_product_code =>
            {
                let change = ProductChange {
                    line_number: query.line_number.clone(),
                    previous_product_code: Some(query.current_product_code.clone()),
                    previous_product_name: None,
                    new_product_code: subscribed.current_product_code.clone(),
                    new_product_name: subscribed.current_product_name.clone(),
                    effective_date: None,
                    change_status: Some(ProcessStatus::Completed.to_string()),
                    kos_order_number: None,
                    estimated_completion_time: None,
                };
                self.cache.put(&change_key(&query), &change).await;
                self.evict_line(&query.line_number).await;
                let payload = to_payload(&change)?;
                Ok(self
                    .recorder
                    .settle(&record.request_id, TerminalOutcome::Completed(payload))
                    .await?)
            }
            Ok(_) => Ok(process_status(record.status)),
            Err(e) if e.is_rejection() => Ok(self
                .recorder
                .settle(&record.request_id, TerminalOutcome::Failed(e.rejection_reason()))
                .await?),
            Err(e) => Err(e.into()),
        }
    }
}

/// First reason the line may not move to `target`, if any
fn check_eligibility(
    query: &ProductChangeQuery,
    target: &Product,
    subscribed: &CustomerProduct,
) -> Option<&'static str> {
    if matches!(
        subscribed.line_status(),
        LineStatus::Suspended | LineStatus::Terminated
    ) {
        return Some(REASON_LINE_NOT_ACTIVE);
    }

    let customer_operator = subscribed
        .customer
        .as_ref()
        .and_then(|c| c.operator_code.as_deref());
    if let (Some(required), Some(actual)) = (target.operator_code.as_deref(), customer_operator) {
        if required != actual {
            return Some(REASON_OPERATOR_MISMATCH);
        }
    }

    if subscribed.current_product_code != query.current_product_code {
        return Some(REASON_CURRENT_PRODUCT_MISMATCH);
    }
    None
}

fn change_key(query: &ProductChangeQuery) -> CacheKey {
    CacheKey::new(
        CacheCategory::ProductChangeResult,
        [
            normalize_line_number(&query.line_number),
            query.current_product_code.clone(),
            query.target_product_code.clone(),
        ],
    )
}

fn customer_key(line_number: &str) -> CacheKey {
    CacheKey::new(
        CacheCategory::CustomerProduct,
        [normalize_line_number(line_number)],
    )
}

/// Rebuild the query from `{line}:{current}:{target}`
fn query_from_key(domain_key: &str) -> Option<ProductChangeQuery> {
    let mut parts = domain_key.splitn(3, ':');
    let line = parts.next().filter(|s| !s.is_empty())?;
    let current = parts.next().filter(|s| !s.is_empty())?;
    let target = parts.next().filter(|s| !s.is_empty())?;
    Some(ProductChangeQuery::new(line, current, target))
}

fn completed(request_id: String, change: ProductChange) -> ProductChangeResponse {
    ProductChangeResponse {
        request_id,
        status: ProcessStatus::Completed,
        change: Some(change),
        failure_reason: None,
    }
}

fn from_record(record: AsyncOperation) -> ProductChangeResponse {
    let change = record
        .result_payload
        .and_then(|payload| serde_json::from_value::<ProductChange>(payload).ok());
    ProductChangeResponse {
        request_id: record.request_id,
        status: process_status(record.status),
        change,
        failure_reason: record.failure_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Customer, ProductStatus};

    fn product(code: &str, operator: Option<&str>) -> Product {
        Product {
            code: code.to_string(),
            name: code.to_string(),
            product_type: None,
            monthly_fee: 55_000,
            data_allowance: None,
            voice_allowance: None,
            sms_allowance: None,
            network_type: Some("5G".into()),
            status: ProductStatus::Active,
            description: None,
            operator_code: operator.map(str::to_string),
        }
    }

    fn subscribed(current: &str, status: LineStatus, operator: Option<&str>) -> CustomerProduct {
        CustomerProduct {
            line_number: "01012345678".into(),
            current_product_code: current.into(),
            current_product_name: None,
            monthly_fee: None,
            product_status: ProductStatus::Active,
            customer: Some(Customer {
                name: "Kim".into(),
                customer_id: "C-1".into(),
                operator_code: operator.map(str::to_string),
                line_status: status,
            }),
        }
    }

    #[test]
    fn test_eligibility() {
        let query = ProductChangeQuery::new("010-1234-5678", "5G-BASIC", "5G-PREMIUM");
        let target = product("5G-PREMIUM", Some("KT"));

        assert_eq!(
            check_eligibility(&query, &target, &subscribed("5G-BASIC", LineStatus::Active, Some("KT"))),
            None
        );
        assert_eq!(
            check_eligibility(
                &query,
                &target,
                &subscribed("5G-BASIC", LineStatus::Suspended, Some("KT"))
            ),
            Some(REASON_LINE_NOT_ACTIVE)
        );
        assert_eq!(
            check_eligibility(&query, &target, &subscribed("5G-BASIC", LineStatus::Active, Some("SKT"))),
            Some(REASON_OPERATOR_MISMATCH)
        );
        assert_eq!(
            check_eligibility(&query, &target, &subscribed("LTE-BASIC", LineStatus::Active, Some("KT"))),
            Some(REASON_CURRENT_PRODUCT_MISMATCH)
        );
    }

    #[test]
    fn test_unrestricted_product_ignores_operator() {
        let query = ProductChangeQuery::new("01012345678", "5G-BASIC", "5G-PREMIUM");
        let target = product("5G-PREMIUM", None);
        assert_eq!(
            check_eligibility(&query, &target, &subscribed("5G-BASIC", LineStatus::Active, Some("SKT"))),
            None
        );
    }

    #[test]
    fn test_query_from_key() {
        let query = query_from_key("01012345678:5G-BASIC:5G-PREMIUM").unwrap();
        assert_eq!(query.line_number, "01012345678");
        assert_eq!(query.current_product_code, "5G-BASIC");
        assert_eq!(query.target_product_code, "5G-PREMIUM");
        assert!(query_from_key("01012345678:5G-BASIC").is_none());
    }
}

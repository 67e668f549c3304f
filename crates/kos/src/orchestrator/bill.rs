// Bill inquiry flow

use std::sync::Arc;

use async_trait::async_trait;
use phonebill_resilience::{
    AsyncOperation, CacheCategory, CacheKey, CacheStore, OperationStatus, TerminalOutcome,
};
use tracing::{info, instrument, warn};

use super::{process_status, to_payload, OperationRecorder, OrchestratorError, BILL_INQUIRY};
use crate::client::{CallResult, ResilientClient};
use crate::domain::{
    normalize_line_number, Bill, BillInquiryResponse, BillInquiryResult, BillQuery, Customer,
    ProcessStatus,
};
use crate::reconciler::StatusProbe;
use crate::request_id;

const FALLBACK_FAILURE: &str = "bill inquiry failed";

/// Cache-aside bill inquiry with deferred completion
pub struct BillInquiryOrchestrator {
    client: Arc<ResilientClient>,
    cache: Arc<CacheStore>,
    recorder: OperationRecorder,
}

impl BillInquiryOrchestrator {
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

    /// Look up a bill, from cache when possible
    ///
    /// KOS being degraded is not an error: the answer is `PROCESSING` and
    /// the operation completes later through a status query or the
    /// reconciler.
    #[instrument(skip(self, request_id), fields(line = %query.line_number, month = %query.month))]
    pub async fn inquire(
        &self,
        request_id: Option<String>,
        query: &BillQuery,
    ) -> Result<BillInquiryResponse, OrchestratorError> {
        let request_id = request_id::resolve(request_id);
        self.recorder
            .tracker()
            .create(&request_id, BILL_INQUIRY, &query.domain_key())
            .await?;

        let key = bill_key(&query.line_number, &query.month);
        if let Some(bill) = self.cache.get::<Bill>(&key).await {
            info!(request_id = %request_id, "bill served from cache");
            self.recorder.complete(&request_id, &bill).await;
            return Ok(BillInquiryResponse {
                request_id,
                status: ProcessStatus::Completed,
                bill: Some(bill),
                failure_reason: None,
                cached: true,
            });
        }

        let answer = self
            .client
            .inquire_bill(&request_id, &query.line_number, &query.month)
            .await;

        match answer {
            Ok(CallResult::Ready(result)) => self.settle_answer(request_id, result).await,
            Ok(CallResult::Processing { cause }) => {
                info!(request_id = %request_id, cause = %cause, "bill inquiry deferred");
                self.recorder.tracker().mark_processing(&request_id).await?;
                Ok(pending(request_id))
            }
            Err(e) if e.is_rejection() => {
                let reason = e.rejection_reason();
                info!(request_id = %request_id, reason = %reason, "bill inquiry rejected");
                self.recorder.fail(&request_id, reason.clone()).await;
                Ok(failed(request_id, reason))
            }
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "bill inquiry failed");
                self.recorder.fail(&request_id, e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Current state of an inquiry, re-probing KOS while it is `PROCESSING`
    #[instrument(skip(self))]
    pub async fn status(&self, request_id: &str) -> Result<BillInquiryResponse, OrchestratorError> {
        let mut record = self.recorder.load(request_id, BILL_INQUIRY).await?;
        if record.status == OperationStatus::Processing {
            self.probe(&record).await?;
            record = self.recorder.load(request_id, BILL_INQUIRY).await?;
        }
        Ok(from_record(record))
    }

    /// Months with a bill for the line, cached when KOS returns any
    pub async fn available_months(&self, line_number: &str) -> Result<Vec<String>, OrchestratorError> {
        let key = CacheKey::new(
            CacheCategory::AvailableMonths,
            [normalize_line_number(line_number)],
        );
        if let Some(months) = self.cache.get::<Vec<String>>(&key).await {
            return Ok(months);
        }
        let months = self.client.available_months(line_number).await?;
        if !months.is_empty() {
            self.cache.put(&key, &months).await;
        }
        Ok(months)
    }

    /// Drop every cached bill, customer and month list for a line
    pub async fn evict_line(&self, line_number: &str) -> usize {
        let line = normalize_line_number(line_number);
        let prefix = format!("{}{line}:", CacheCategory::BillData.prefix());
        let mut evicted = self.cache.evict_by_prefix(&prefix).await;
        for category in [CacheCategory::CustomerInfo, CacheCategory::AvailableMonths] {
            if self.cache.evict(&CacheKey::new(category, [&line])).await {
                evicted += 1;
            }
        }
        info!(line = %line, evicted, "bill cache evicted for line");
        evicted
    }

    /// Drop cached bills of one month across all lines
    pub async fn evict_month(&self, month: &str) -> usize {
        let evicted = self
            .cache
            .evict_matching(CacheCategory::BillData.prefix(), &format!(":{month}"))
            .await;
        info!(month, evicted, "bill cache evicted for month");
        evicted
    }

    pub async fn evict_all(&self) -> usize {
        self.cache.evict_category(CacheCategory::BillData).await
    }

    /// Record and answer a converted KOS reply
    async fn settle_answer(
        &self,
        request_id: String,
        result: BillInquiryResult,
    ) -> Result<BillInquiryResponse, OrchestratorError> {
        match (result.status, result.bill) {
            (ProcessStatus::Completed, Some(bill)) => {
                self.store(&bill, result.customer.as_ref()).await;
                self.recorder.complete(&request_id, &bill).await;
                Ok(BillInquiryResponse {
                    request_id,
                    status: ProcessStatus::Completed,
                    bill: Some(bill),
                    failure_reason: None,
                    cached: false,
                })
            }
            (ProcessStatus::Failed, _) => {
                let reason = result
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| FALLBACK_FAILURE.to_string());
                self.recorder.fail(&request_id, reason.clone()).await;
                Ok(failed(request_id, reason))
            }
            _ => {
                self.recorder.tracker().mark_processing(&request_id).await?;
                Ok(pending(request_id))
            }
        }
    }

    async fn store(&self, bill: &Bill, customer: Option<&Customer>) {
        let line = normalize_line_number(&bill.line_number);
        self.cache
            .put(&bill_key(&line, &bill.billing_month), bill)
            .await;
        if let Some(customer) = customer {
            self.cache
                .put(&CacheKey::new(CacheCategory::CustomerInfo, [&line]), customer)
                .await;
        }
    }
}

#[async_trait]
impl StatusProbe for BillInquiryOrchestrator {
    fn operation(&self) -> &'static str {
        BILL_INQUIRY
    }

    /// Ask KOS about the inquiry and persist whatever it decided
    async fn probe(&self, record: &AsyncOperation) -> Result<ProcessStatus, OrchestratorError> {
        let request_id = record.request_id.as_str();
        match self.client.check_bill_status(request_id).await {
            Ok(CallResult::Ready(result)) => match (result.status, result.bill) {
                (ProcessStatus::Completed, Some(bill)) => {
                    self.store(&bill, result.customer.as_ref()).await;
                    let payload = to_payload(&bill)?;
                    Ok(self
                        .recorder
                        .settle(request_id, TerminalOutcome::Completed(payload))
                        .await?)
                }
                (ProcessStatus::Failed, _) => {
                    let reason = result
                        .message
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| FALLBACK_FAILURE.to_string());
                    Ok(self
                        .recorder
                        .settle(request_id, TerminalOutcome::Failed(reason))
                        .await?)
                }
                _ => Ok(process_status(record.status)),
            },
            Ok(CallResult::Processing { .. }) => Ok(process_status(record.status)),
            Err(e) if e.is_rejection() => Ok(self
                .recorder
                .settle(request_id, TerminalOutcome::Failed(e.rejection_reason()))
                .await?),
            Err(e) => Err(e.into()),
        }
    }
}

fn bill_key(line_number: &str, month: &str) -> CacheKey {
    CacheKey::new(
        CacheCategory::BillData,
        [normalize_line_number(line_number), month.to_string()],
    )
}

fn pending(request_id: String) -> BillInquiryResponse {
    BillInquiryResponse {
        request_id,
        status: ProcessStatus::Processing,
        bill: None,
        failure_reason: None,
        cached: false,
    }
}

fn failed(request_id: String, reason: String) -> BillInquiryResponse {
    BillInquiryResponse {
        request_id,
        status: ProcessStatus::Failed,
        bill: None,
        failure_reason: Some(reason),
        cached: false,
    }
}

fn from_record(record: AsyncOperation) -> BillInquiryResponse {
    let bill = record
        .result_payload
        .and_then(|payload| serde_json::from_value::<Bill>(payload).ok());
    BillInquiryResponse {
        request_id: record.request_id,
        status: process_status(record.status),
        bill,
        failure_reason: record.failure_reason,
        cached: false,
    }
}

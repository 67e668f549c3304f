// Internal model for bills and products
//
// These types are what callers, the cache and the operation records see.
// They never carry KOS naming or optionality quirks.

use serde::{Deserialize, Serialize};

/// Processing status reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    Completed,
    Processing,
    Failed,
}

impl ProcessStatus {
    /// Interpret a KOS `procStatus`; missing or unknown values mean the
    /// upstream has not finished
    pub fn from_proc_status(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("SUCCESS") | Some("COMPLETED") => Self::Completed,
            Some("FAILED") | Some("ERROR") => Self::Failed,
            _ => Self::Processing,
        }
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Completed => "COMPLETED",
            Self::Processing => "PROCESSING",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    Active,
    Suspended,
    Terminated,
    Unknown,
}

impl LineStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("ACTIVE") => Self::Active,
            Some("SUSPENDED") => Self::Suspended,
            Some("TERMINATED") => Self::Terminated,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Active,
    Discontinued,
    Preparing,
    Unknown,
}

impl ProductStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("ACTIVE") => Self::Active,
            Some("DISCONTINUED") => Self::Discontinued,
            Some("PREPARING") => Self::Preparing,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    Overdue,
}

impl PaymentStatus {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_uppercase()).as_deref() {
            Some("PAID") | Some("CONFIRMED") => Self::Paid,
            Some("OVERDUE") => Self::Overdue,
            _ => Self::Unpaid,
        }
    }
}

// ============================================
// Inbound requests
// ============================================

/// Bill inquiry for one line and month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillQuery {
    pub line_number: String,
    /// `YYYY-MM`
    pub month: String,
}

impl BillQuery {
    pub fn new(line_number: impl Into<String>, month: impl Into<String>) -> Self {
        Self {
            line_number: line_number.into(),
            month: month.into(),
        }
    }

    /// Business identity, `{line}:{month}` with the line normalised
    pub fn domain_key(&self) -> String {
        format!("{}:{}", normalize_line_number(&self.line_number), self.month)
    }
}

/// Product change for one line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductChangeQuery {
    pub line_number: String,
    pub current_product_code: String,
    pub target_product_code: String,
    pub requestor_id: Option<String>,
    pub change_reason: Option<String>,
}

impl ProductChangeQuery {
    pub fn new(
        line_number: impl Into<String>,
        current_product_code: impl Into<String>,
        target_product_code: impl Into<String>,
    ) -> Self {
        Self {
            line_number: line_number.into(),
            current_product_code: current_product_code.into(),
            target_product_code: target_product_code.into(),
            requestor_id: None,
            change_reason: None,
        }
    }

    pub fn with_requestor(mut self, requestor_id: impl Into<String>) -> Self {
        self.requestor_id = Some(requestor_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }

    /// Business identity, `{line}:{current}:{target}`
    pub fn domain_key(&self) -> String {
        format!(
            "{}:{}:{}",
            normalize_line_number(&self.line_number),
            self.current_product_code,
            self.target_product_code
        )
    }
}

/// Line number as KOS expects it: digits only
pub fn normalize_line_number(line_number: &str) -> String {
    line_number
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect()
}

// ============================================
// Upstream data
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub customer_id: String,
    pub operator_code: Option<String>,
    pub line_status: LineStatus,
}

/// Monthly bill; amounts in won
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    pub line_number: String,
    pub billing_month: String,
    pub product_code: Option<String>,
    pub product_name: String,
    pub monthly_fee: i64,
    pub usage_fee: i64,
    pub discount_amount: i64,
    pub total_fee: i64,
    pub data_usage: Option<String>,
    pub voice_usage: Option<String>,
    pub sms_usage: Option<String>,
    pub payment_status: PaymentStatus,
    pub due_date: Option<String>,
}

/// Converted bill inquiry or bill status answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillInquiryResult {
    pub status: ProcessStatus,
    pub bill: Option<Bill>,
    pub customer: Option<Customer>,
    pub message: Option<String>,
}

/// Catalogue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub code: String,
    pub name: String,
    pub product_type: Option<String>,
    pub monthly_fee: i64,
    pub data_allowance: Option<i64>,
    pub voice_allowance: Option<i64>,
    pub sms_allowance: Option<i64>,
    pub network_type: Option<String>,
    pub status: ProductStatus,
    pub description: Option<String>,
    /// Operator the product is sold through, when restricted
    pub operator_code: Option<String>,
}

impl Product {
    pub fn is_available(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// What a line is currently subscribed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerProduct {
    pub line_number: String,
    pub current_product_code: String,
    pub current_product_name: Option<String>,
    pub monthly_fee: Option<i64>,
    pub product_status: ProductStatus,
    pub customer: Option<Customer>,
}

impl CustomerProduct {
    /// Line status, if KOS reported the customer
    pub fn line_status(&self) -> LineStatus {
        self.customer
            .as_ref()
            .map(|c| c.line_status)
            .unwrap_or(LineStatus::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductChange {
    pub line_number: String,
    pub previous_product_code: Option<String>,
    pub previous_product_name: Option<String>,
    pub new_product_code: String,
    pub new_product_name: Option<String>,
    pub effective_date: Option<String>,
    pub change_status: Option<String>,
    pub kos_order_number: Option<String>,
    pub estimated_completion_time: Option<String>,
}

/// Converted product change answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductChangeResult {
    pub status: ProcessStatus,
    pub change: Option<ProductChange>,
    pub message: Option<String>,
}

// ============================================
// Orchestrator answers
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillInquiryResponse {
    pub request_id: String,
    pub status: ProcessStatus,
    pub bill: Option<Bill>,
    pub failure_reason: Option<String>,
    /// Served from cache without contacting KOS
    pub cached: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductChangeResponse {
    pub request_id: String,
    pub status: ProcessStatus,
    pub change: Option<ProductChange>,
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proc_status_mapping() {
        use ProcessStatus::*;
        assert_eq!(ProcessStatus::from_proc_status(Some("SUCCESS")), Completed);
        assert_eq!(ProcessStatus::from_proc_status(Some("completed")), Completed);
        assert_eq!(ProcessStatus::from_proc_status(Some("PENDING")), Processing);
        assert_eq!(ProcessStatus::from_proc_status(Some("ERROR")), Failed);
        assert_eq!(ProcessStatus::from_proc_status(Some("???")), Processing);
        assert_eq!(ProcessStatus::from_proc_status(None), Processing);
    }

    #[test]
    fn test_domain_keys_normalize_line() {
        let bill = BillQuery::new("010-1234-5678", "2025-01");
        assert_eq!(bill.domain_key(), "01012345678:2025-01");

        let change = ProductChangeQuery::new("010-1234-5678", "5G-BASIC", "5G-PREMIUM");
        assert_eq!(change.domain_key(), "01012345678:5G-BASIC:5G-PREMIUM");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(LineStatus::parse(Some("active")), LineStatus::Active);
        assert_eq!(LineStatus::parse(None), LineStatus::Unknown);
        assert_eq!(
            ProductStatus::parse(Some("DISCONTINUED")),
            ProductStatus::Discontinued
        );
        assert_eq!(PaymentStatus::parse(Some("CONFIRMED")), PaymentStatus::Paid);
        assert_eq!(PaymentStatus::parse(None), PaymentStatus::Unpaid);
    }
}

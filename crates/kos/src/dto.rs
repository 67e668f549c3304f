// KOS wire schema
//
// Field names follow KOS exactly. Everything the upstream may omit is an
// Option; whether a missing field is acceptable is decided in `convert`.

use serde::{Deserialize, Serialize};

/// Envelope wrapping every KOS response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosCommonResponse<T> {
    #[serde(default)]
    pub success: bool,
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub data: Option<T>,
    pub timestamp: Option<String>,
    pub trace_id: Option<String>,
}

// ============================================
// Bill inquiry
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KosBillInquiryRequest {
    pub line_number: String,
    pub billing_month: String,
    pub request_id: String,
}

/// Bill inquiry and bill status responses share this shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosBillInquiryResponse {
    pub request_id: Option<String>,
    pub proc_status: Option<String>,
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub bill_info: Option<KosBillInfo>,
    pub customer_info: Option<KosCustomerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosBillInfo {
    pub line_number: Option<String>,
    pub billing_month: Option<String>,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub monthly_fee: Option<f64>,
    pub usage_fee: Option<f64>,
    pub discount_amount: Option<f64>,
    pub total_fee: Option<f64>,
    pub data_usage: Option<String>,
    pub voice_usage: Option<String>,
    pub sms_usage: Option<String>,
    pub bill_status: Option<String>,
    pub due_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosCustomerInfo {
    pub customer_name: Option<String>,
    pub customer_id: Option<String>,
    pub operator_code: Option<String>,
    pub line_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosAvailableMonthsResponse {
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub line_number: Option<String>,
    #[serde(default)]
    pub available_months: Vec<String>,
}

// ============================================
// Products
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KosProductChangeRequest {
    pub line_number: String,
    pub current_product_code: String,
    pub target_product_code: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requestor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosProductChangeResponse {
    pub request_id: Option<String>,
    pub proc_status: Option<String>,
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub change_info: Option<KosChangeInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosChangeInfo {
    pub line_number: Option<String>,
    pub previous_product_code: Option<String>,
    pub previous_product_name: Option<String>,
    pub new_product_code: Option<String>,
    pub new_product_name: Option<String>,
    pub effective_date: Option<String>,
    pub change_status: Option<String>,
    pub kos_order_number: Option<String>,
    pub estimated_completion_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KosProductInquiryRequest {
    pub line_number: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosProductInquiryResponse {
    pub request_id: Option<String>,
    pub proc_status: Option<String>,
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub product_info: Option<KosSubscribedProduct>,
    pub customer_info: Option<KosCustomerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KosSubscribedProduct {
    pub line_number: Option<String>,
    pub current_product_code: Option<String>,
    pub current_product_name: Option<String>,
    pub monthly_fee: Option<f64>,
    pub data_allowance: Option<String>,
    pub voice_allowance: Option<String>,
    pub sms_allowance: Option<String>,
    pub product_status: Option<String>,
    pub contract_date: Option<String>,
}

/// Product catalogue; this payload uses snake_case on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KosProductListResponse {
    pub result_code: Option<String>,
    pub result_message: Option<String>,
    pub product_count: Option<u32>,
    #[serde(default)]
    pub products: Vec<KosProductInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KosProductInfo {
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub product_type: Option<String>,
    pub monthly_fee: Option<f64>,
    pub data_allowance: Option<i64>,
    pub voice_allowance: Option<i64>,
    pub sms_allowance: Option<i64>,
    pub network_type: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub operator_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bill_request_field_names() {
        let request = KosBillInquiryRequest {
            line_number: "01012345678".into(),
            billing_month: "2025-01".into(),
            request_id: "REQ_20250101_ABCDEF12".into(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "lineNumber": "01012345678",
                "billingMonth": "2025-01",
                "requestId": "REQ_20250101_ABCDEF12"
            })
        );
    }

    #[test]
    fn test_change_request_omits_absent_fields() {
        let request = KosProductChangeRequest {
            line_number: "01012345678".into(),
            current_product_code: "5G-BASIC".into(),
            target_product_code: "5G-PREMIUM".into(),
            request_id: "REQ_1".into(),
            requestor_id: None,
            change_reason: None,
            effective_date: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["targetProductCode"], "5G-PREMIUM");
        assert!(value.get("changeReason").is_none());
    }

    #[test]
    fn test_envelope_parses_snake_case_product_list() {
        let raw = json!({
            "success": true,
            "resultCode": "0000",
            "resultMessage": "ok",
            "data": {
                "result_code": "0000",
                "product_count": 1,
                "products": [{
                    "product_code": "5G-PREMIUM",
                    "product_name": "5G Premium",
                    "monthly_fee": 89000,
                    "data_allowance": 100,
                    "status": "ACTIVE"
                }]
            },
            "traceId": "t-1"
        });
        let envelope: KosCommonResponse<KosProductListResponse> =
            serde_json::from_value(raw).unwrap();
        let data = envelope.data.unwrap();
        assert_eq!(data.products.len(), 1);
        assert_eq!(data.products[0].product_code.as_deref(), Some("5G-PREMIUM"));
        assert_eq!(data.products[0].monthly_fee, Some(89000.0));
        assert_eq!(envelope.trace_id.as_deref(), Some("t-1"));
    }
}

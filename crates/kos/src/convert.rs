// KOS payload -> internal model
//
// Every function takes the raw JSON body and either returns a fully
// populated domain value or an error. Business result codes become
// `UpstreamClient`/`UpstreamServer`; a payload that does not fit the schema
// becomes `DataConversion`, which is never retried.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::{
    Bill, BillInquiryResult, Customer, CustomerProduct, LineStatus, PaymentStatus, ProcessStatus,
    Product, ProductChange, ProductChangeResult, ProductStatus,
};
use crate::dto::{
    KosAvailableMonthsResponse, KosBillInfo, KosBillInquiryResponse, KosCommonResponse,
    KosCustomerInfo, KosProductChangeResponse, KosProductInfo, KosProductInquiryResponse,
    KosProductListResponse,
};
use crate::error::{IntegrationError, RESULT_SUCCESS, RESULT_SYSTEM_ERROR};

type Result<T> = std::result::Result<T, IntegrationError>;

/// Surface a KOS system error delivered with HTTP 200
///
/// Runs inside each attempt so the retry loop and the breaker see it.
/// Anything else, including malformed bodies, is left to the decoders.
pub fn check_envelope(raw: &Value) -> Result<()> {
    let levels = [Some(raw), raw.get("data")];
    for level in levels.into_iter().flatten() {
        if level.get("resultCode").and_then(Value::as_str) == Some(RESULT_SYSTEM_ERROR) {
            let message = level
                .get("resultMessage")
                .and_then(Value::as_str)
                .unwrap_or("system error");
            return Err(IntegrationError::from_result_code(
                RESULT_SYSTEM_ERROR,
                message,
            ));
        }
    }
    Ok(())
}

/// Check the envelope and decode its `data`
pub fn unwrap_envelope<T: DeserializeOwned>(raw: Value) -> Result<T> {
    let envelope: KosCommonResponse<Value> = serde_json::from_value(raw)
        .map_err(|e| IntegrationError::conversion(format!("malformed envelope: {e}")))?;

    let code = envelope.result_code.unwrap_or_default();
    let message = envelope.result_message.unwrap_or_default();
    if !envelope.success {
        if code.is_empty() {
            return Err(IntegrationError::conversion(
                "unsuccessful response without resultCode",
            ));
        }
        return Err(IntegrationError::from_result_code(code, message));
    }
    if !code.is_empty() && code != RESULT_SUCCESS {
        return Err(IntegrationError::from_result_code(code, message));
    }

    let data = envelope
        .data
        .ok_or_else(|| IntegrationError::conversion("response has no data"))?;
    serde_json::from_value(data)
        .map_err(|e| IntegrationError::conversion(format!("unexpected data shape: {e}")))
}

pub fn bill_inquiry(raw: Value) -> Result<BillInquiryResult> {
    let data: KosBillInquiryResponse = unwrap_envelope(raw)?;
    check_result_code(data.result_code.as_deref(), data.result_message.as_deref())?;

    let status = ProcessStatus::from_proc_status(data.proc_status.as_deref());
    let bill = match (status, data.bill_info) {
        (_, Some(info)) => Some(bill(info)?),
        (ProcessStatus::Completed, None) => {
            return Err(IntegrationError::conversion(
                "completed bill inquiry without billInfo",
            ))
        }
        (_, None) => None,
    };

    Ok(BillInquiryResult {
        status,
        bill,
        customer: data.customer_info.map(customer),
        message: data.result_message,
    })
}

pub fn available_months(raw: Value) -> Result<Vec<String>> {
    let data: KosAvailableMonthsResponse = unwrap_envelope(raw)?;
    check_result_code(data.result_code.as_deref(), data.result_message.as_deref())?;
    Ok(data.available_months)
}

pub fn product_list(raw: Value) -> Result<Vec<Product>> {
    let data: KosProductListResponse = unwrap_envelope(raw)?;
    check_result_code(data.result_code.as_deref(), data.result_message.as_deref())?;
    data.products.into_iter().map(product).collect()
}

pub fn customer_product(raw: Value) -> Result<CustomerProduct> {
    let data: KosProductInquiryResponse = unwrap_envelope(raw)?;
    check_result_code(data.result_code.as_deref(), data.result_message.as_deref())?;

    let info = data
        .product_info
        .ok_or_else(|| IntegrationError::conversion("product inquiry without productInfo"))?;
    let current_product_code = info
        .current_product_code
        .ok_or_else(|| IntegrationError::conversion("productInfo without currentProductCode"))?;

    Ok(CustomerProduct {
        line_number: info.line_number.unwrap_or_default(),
        current_product_code,
        current_product_name: info.current_product_name,
        monthly_fee: info.monthly_fee.map(|fee| won("monthlyFee", fee)).transpose()?,
        product_status: ProductStatus::parse(info.product_status.as_deref()),
        customer: data.customer_info.map(customer),
    })
}

pub fn product_change(raw: Value) -> Result<ProductChangeResult> {
    let data: KosProductChangeResponse = unwrap_envelope(raw)?;
    check_result_code(data.result_code.as_deref(), data.result_message.as_deref())?;

    let change_status = data
        .change_info
        .as_ref()
        .and_then(|c| c.change_status.clone());
    let status = match (data.proc_status.as_deref(), change_status.as_deref()) {
        (Some(proc), _) => ProcessStatus::from_proc_status(Some(proc)),
        (None, Some(change)) => ProcessStatus::from_proc_status(Some(change)),
        // An accepted change without any status is done
        (None, None) if data.change_info.is_some() => ProcessStatus::Completed,
        (None, None) => ProcessStatus::Processing,
    };

    let change = data
        .change_info
        .map(|info| -> Result<ProductChange> {
            Ok(ProductChange {
                line_number: info.line_number.unwrap_or_default(),
                previous_product_code: info.previous_product_code,
                previous_product_name: info.previous_product_name,
                new_product_code: info.new_product_code.ok_or_else(|| {
                    IntegrationError::conversion("changeInfo without newProductCode")
                })?,
                new_product_name: info.new_product_name,
                effective_date: info.effective_date,
                change_status: info.change_status,
                kos_order_number: info.kos_order_number,
                estimated_completion_time: info.estimated_completion_time,
            })
        })
        .transpose()?;

    if status == ProcessStatus::Completed && change.is_none() {
        return Err(IntegrationError::conversion(
            "completed product change without changeInfo",
        ));
    }

    Ok(ProductChangeResult {
        status,
        change,
        message: data.result_message,
    })
}

/// A non-success result code inside `data` is a rejection too
fn check_result_code(code: Option<&str>, message: Option<&str>) -> Result<()> {
    match code {
        Some(code) if !code.is_empty() && code != RESULT_SUCCESS => Err(
            IntegrationError::from_result_code(code, message.unwrap_or_default()),
        ),
        _ => Ok(()),
    }
}

fn bill(info: KosBillInfo) -> Result<Bill> {
    Ok(Bill {
        line_number: info
            .line_number
            .ok_or_else(|| IntegrationError::conversion("billInfo without lineNumber"))?,
        billing_month: info
            .billing_month
            .ok_or_else(|| IntegrationError::conversion("billInfo without billingMonth"))?,
        product_code: info.product_code,
        product_name: info.product_name.unwrap_or_default(),
        monthly_fee: won("monthlyFee", info.monthly_fee.unwrap_or_default())?,
        usage_fee: won("usageFee", info.usage_fee.unwrap_or_default())?,
        discount_amount: won("discountAmount", info.discount_amount.unwrap_or_default())?,
        total_fee: won("totalFee", info.total_fee.unwrap_or_default())?,
        data_usage: info.data_usage,
        voice_usage: info.voice_usage,
        sms_usage: info.sms_usage,
        payment_status: PaymentStatus::parse(info.bill_status.as_deref()),
        due_date: info.due_date,
    })
}

fn customer(info: KosCustomerInfo) -> Customer {
    Customer {
        name: info.customer_name.unwrap_or_default(),
        customer_id: info.customer_id.unwrap_or_default(),
        operator_code: info.operator_code.filter(|c| !c.is_empty()),
        line_status: LineStatus::parse(info.line_status.as_deref()),
    }
}

fn product(info: KosProductInfo) -> Result<Product> {
    let code = info
        .product_code
        .ok_or_else(|| IntegrationError::conversion("product without product_code"))?;
    Ok(Product {
        name: info.product_name.unwrap_or_else(|| code.clone()),
        code,
        product_type: info.product_type,
        monthly_fee: won("monthly_fee", info.monthly_fee.unwrap_or_default())?,
        data_allowance: info.data_allowance,
        voice_allowance: info.voice_allowance,
        sms_allowance: info.sms_allowance,
        network_type: info.network_type,
        status: ProductStatus::parse(info.status.as_deref()),
        description: info.description,
        operator_code: info.operator_code.filter(|c| !c.is_empty()),
    })
}

fn won(field: &str, amount: f64) -> Result<i64> {
    if !amount.is_finite() {
        return Err(IntegrationError::conversion(format!(
            "{field} is not a finite amount"
        )));
    }
    Ok(amount.round() as i64)
}

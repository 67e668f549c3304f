// HTTP transport against a mock KOS

use std::sync::Arc;
use std::time::Duration;

use phonebill_kos::{
    BillQuery, CallResult, HttpKosTransport, IntegrationError, KosConfig, KosOperation,
    KosRequest, KosTransport, ResilientClient,
};
use phonebill_resilience::{CircuitBreakerRegistry, ResilienceConfig, RetryPolicy};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer) -> HttpKosTransport {
    HttpKosTransport::new(&KosConfig::new(server.uri()), Duration::from_secs(1)).unwrap()
}

fn bill_envelope() -> serde_json::Value {
    json!({
        "success": true,
        "resultCode": "0000",
        "resultMessage": "ok",
        "data": {
            "requestId": "REQ_20250115_ABCDEF01",
            "procStatus": "SUCCESS",
            "resultCode": "0000",
            "billInfo": {
                "lineNumber": "01012345678",
                "billingMonth": "2025-01",
                "productName": "5G Basic",
                "monthlyFee": 55000.0,
                "usageFee": 0.0,
                "discountAmount": 0.0,
                "totalFee": 55000.0,
                "billStatus": "UNPAID"
            }
        }
    })
}

#[tokio::test]
async fn test_bill_inquiry_sends_headers_and_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/bill/inquiry"))
        .and(header("X-Service-Name", "MVNO-BILL-INQUIRY"))
        .and(header("X-Request-ID", "REQ_20250115_ABCDEF01"))
        .and(body_partial_json(json!({
            "lineNumber": "01012345678",
            "billingMonth": "2025-01",
            "requestId": "REQ_20250115_ABCDEF01"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(bill_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let resilience = ResilienceConfig {
        retry: RetryPolicy::no_retry(),
        ..Default::default()
    };
    let config = Arc::new(KosConfig::new(server.uri()));
    let client = ResilientClient::new(
        Arc::new(transport(&server)),
        Arc::new(CircuitBreakerRegistry::new(
            resilience.circuit_breaker.clone(),
        )),
        &resilience,
        config,
    );

    let query = BillQuery::new("010-1234-5678", "2025-01");
    let result = client
        .inquire_bill("REQ_20250115_ABCDEF01", &query.line_number, &query.month)
        .await
        .unwrap();
    match result {
        CallResult::Ready(result) => {
            assert_eq!(result.bill.unwrap().total_fee, 55000);
        }
        other => panic!("expected an answer, got {other:?}"),
    }
}

#[tokio::test]
async fn test_status_check_uses_request_id_in_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/bill/status/REQ_20250115_ABCDEF01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bill_envelope()))
        .expect(1)
        .mount(&server)
        .await;

    let request = KosRequest::new(
        KosOperation::StatusCheck,
        "REQ_20250115_ABCDEF01",
        "MVNO-BILL-INQUIRY",
    )
    .with_path_param("REQ_20250115_ABCDEF01");
    let body = transport(&server).send(&request).await.unwrap();
    assert_eq!(body["data"]["procStatus"], "SUCCESS");
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/products"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let request = KosRequest::new(KosOperation::ProductList, "REQ_1", "MVNO-PRODUCT-SERVICE");
    let err = transport(&server).send(&request).await.unwrap_err();
    match &err {
        IntegrationError::UpstreamServer { code, message } => {
            assert_eq!(code, "503");
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_enveloped_client_error_keeps_result_code() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/products/change"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "success": false,
            "resultCode": "2005",
            "resultMessage": "operator differs"
        })))
        .mount(&server)
        .await;

    let request = KosRequest::new(KosOperation::ProductChange, "REQ_1", "MVNO-PRODUCT-SERVICE")
        .with_body(json!({"lineNumber": "01012345678"}));
    let err = transport(&server).send(&request).await.unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(err.rejection_reason(), "operator mismatch");
}

#[tokio::test]
async fn test_non_json_body_is_conversion_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
        .mount(&server)
        .await;

    let request = KosRequest::new(KosOperation::Health, "REQ_1", "MVNO-BILL-INQUIRY");
    let err = transport(&server).send(&request).await.unwrap_err();
    assert!(matches!(err, IntegrationError::DataConversion(_)));
}

#[tokio::test]
async fn test_unreachable_kos_is_connectivity_error() {
    let transport = HttpKosTransport::new(
        &KosConfig::new("http://127.0.0.1:1"),
        Duration::from_millis(500),
    )
    .unwrap();
    let request = KosRequest::new(KosOperation::ProductList, "REQ_1", "MVNO-PRODUCT-SERVICE");
    let err = transport.send(&request).await.unwrap_err();
    assert!(matches!(err, IntegrationError::Connectivity(_)));
    assert!(err.is_transient());
}

//! End-to-end checkout-to-payment flow over the HTTP surface
//!
//! Drives the router directly as a tower service: checkout, STK push against
//! a mock gateway, the gateway callback webhook, queue processing, and status
//! polling.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode, header};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use duka_server::api;
use duka_server::catalog::{CityRateTable, ProductInfo, StaticCatalog};
use duka_server::core::{Config, ServerState};
use duka_server::payment::{GatewayError, PaymentGateway, StkPushAcceptance, StkPushRequest};
use duka_server::reconcile::{ReconcileOutcome, Reconciler};
use duka_server::store::CheckoutStorage;

struct MockGateway;

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn stk_push(&self, request: &StkPushRequest) -> Result<StkPushAcceptance, GatewayError> {
        Ok(StkPushAcceptance {
            merchant_request_id: format!("mr-{}", request.account_reference),
            checkout_request_id: format!("cr-{}", request.account_reference),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }
}

fn test_state(dir: &tempfile::TempDir) -> ServerState {
    let storage = CheckoutStorage::open(dir.path().join("duka.redb")).unwrap();
    let catalog = Arc::new(StaticCatalog::new());
    catalog.insert(ProductInfo {
        product_id: "brake-pads".to_string(),
        name: "Brake pad set".to_string(),
        sku: "BP-01".to_string(),
        price: Decimal::new(1200, 0),
        discount_price: Some(Decimal::new(950, 0)),
        active: true,
    });

    let state = ServerState::with_components(
        Config::with_overrides(dir.path().to_string_lossy(), 0),
        storage,
        catalog,
        Arc::new(CityRateTable::kenyan_defaults()),
        Arc::new(MockGateway),
    );
    state.stock.set_total_stock("brake-pads", 10).unwrap();
    state
}

fn app(state: &ServerState) -> Router {
    api::build_app().with_state(state.clone())
}

async fn send(state: &ServerState, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn checkout_body() -> Value {
    json!({
        "guest_email": "jane@example.com",
        "recipient_name": "Jane Wanjiku",
        "recipient_phone": "0712345678",
        "delivery_address": "Moi Avenue 12",
        "delivery_city": "Nairobi",
        "items": [{ "product_id": "brake-pads", "quantity": 2 }]
    })
}

fn success_callback(checkout_request_id: &str, amount: f64) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "mr-x",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                        { "Name": "PhoneNumber", "Value": 254712345678u64 }
                    ]
                }
            }
        }
    })
}

/// Drain the durable queue the way the worker does, synchronously.
fn drain_queue(state: &ServerState) -> Vec<ReconcileOutcome> {
    let reconciler = Reconciler::new(state.storage.clone(), state.stock.clone());
    let mut outcomes = Vec::new();
    for entry in state.storage.get_pending_callbacks().unwrap() {
        let envelope: shared::callback::CallbackEnvelope =
            serde_json::from_value(entry.payload.clone()).unwrap();
        outcomes.push(
            reconciler
                .process(&envelope.body.stk_callback, &entry.payload)
                .unwrap(),
        );
    }
    outcomes
}

#[tokio::test]
async fn test_full_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    // Checkout: 2 x 950 + 300 delivery = 2200
    let (status, body) = send(&state, post_json("/api/checkout", checkout_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["total"], json!(2200.0));
    assert_eq!(body["data"]["payment_status"], json!("unpaid"));
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["product_id"], json!("brake-pads"));
    assert_eq!(items[0]["quantity"], json!(2));
    assert_eq!(items[0]["unit_price"], json!(950.0));
    assert_eq!(items[0]["line_total"], json!(1900.0));
    let order_number = body["data"]["order_number"].as_str().unwrap().to_string();

    // STK push
    let (status, body) = send(
        &state,
        post_json(
            "/api/payments/stk-push",
            json!({ "order_number": order_number, "phone_number": "0712345678" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let correlation_id = body["data"]["checkout_request_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Status while the prompt is open
    let (status, body) = send(
        &state,
        get(&format!("/api/payments/status?order_number={order_number}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment_status"], json!("pending"));

    // Gateway callback: fast-ack, queued, then reconciled
    let (status, body) = send(
        &state,
        post_json(
            "/api/payments/callback",
            success_callback(&correlation_id, 2200.0),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultCode"], json!(0));
    assert_eq!(state.storage.get_pending_callbacks().unwrap().len(), 1);

    drain_queue(&state);
    assert!(state.storage.get_pending_callbacks().unwrap().is_empty());

    // Settled
    let (status, body) = send(
        &state,
        get(&format!("/api/payments/status?order_number={order_number}")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["payment_status"], json!("paid"));
    assert_eq!(body["data"]["order_status"], json!("confirmed"));
    assert_eq!(body["data"]["receipt_number"], json!("NLJ7RT61SV"));

    // Audit trail on the order detail
    let (status, body) = send(&state, get(&format!("/api/orders/{order_number}"))).await;
    assert_eq!(status, StatusCode::OK);
    let transactions = body["data"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[0]["kind"], json!("stk_initiated"));
    assert_eq!(transactions[1]["kind"], json!("payment_succeeded"));

    // Stock committed
    let stock = state.stock.get("brake-pads").unwrap().unwrap();
    assert_eq!(stock.total_stock, 8);
    assert_eq!(stock.reserved_stock, 0);
}

#[tokio::test]
async fn test_webhook_redelivery_settles_once() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (_, body) = send(&state, post_json("/api/checkout", checkout_body())).await;
    let order_number = body["data"]["order_number"].as_str().unwrap().to_string();
    let (_, body) = send(
        &state,
        post_json(
            "/api/payments/stk-push",
            json!({ "order_number": order_number, "phone_number": "0712345678" }),
        ),
    )
    .await;
    let correlation_id = body["data"]["checkout_request_id"]
        .as_str()
        .unwrap()
        .to_string();

    // The gateway delivers the same notification three times.
    for _ in 0..3 {
        let (status, body) = send(
            &state,
            post_json(
                "/api/payments/callback",
                success_callback(&correlation_id, 2200.0),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ResultCode"], json!(0));
    }

    // Redelivery collapsed onto one queue entry.
    assert_eq!(state.storage.get_pending_callbacks().unwrap().len(), 1);
    drain_queue(&state);

    // One more redelivery after settlement.
    send(
        &state,
        post_json(
            "/api/payments/callback",
            success_callback(&correlation_id, 2200.0),
        ),
    )
    .await;
    let outcomes = drain_queue(&state);
    assert!(matches!(
        outcomes.as_slice(),
        [ReconcileOutcome::AlreadyReconciled(_)]
    ));

    // Stock deducted exactly once.
    let stock = state.stock.get("brake-pads").unwrap().unwrap();
    assert_eq!(stock.total_stock, 8);
    assert_eq!(stock.reserved_stock, 0);
}

#[tokio::test]
async fn test_insufficient_stock_is_a_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    state.stock.set_total_stock("brake-pads", 1).unwrap();

    let (status, body) = send(&state, post_json("/api/checkout", checkout_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], json!("E0005"));
}

#[tokio::test]
async fn test_order_lookup_404() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (status, body) = send(&state, get("/api/orders/ORD-NOPE")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("E0003"));
}

#[tokio::test]
async fn test_unkeyed_callback_is_quarantined() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (status, body) = send(
        &state,
        post_json(
            "/api/payments/callback",
            json!({ "Body": { "stkCallback": { "ResultCode": 0 } } }),
        ),
    )
    .await;

    // Still acknowledged, but parked in the dead letter table for review.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ResultCode"], json!(0));
    assert!(state.storage.get_pending_callbacks().unwrap().is_empty());

    let letters = state.storage.get_dead_letters().unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(
        letters[0].payload.pointer("/Body/stkCallback/ResultCode"),
        Some(&json!(0))
    );
}

#[tokio::test]
async fn test_health_reports_queue_depth() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);

    let (status, body) = send(&state, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("ok"));
    assert_eq!(body["data"]["pending_callbacks"], json!(0));
    assert_eq!(body["data"]["dead_letters"], json!(0));
}

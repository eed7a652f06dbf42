//! Payment routes
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/payments/stk-push | POST | none |
//! | /api/payments/callback | POST | gateway webhook |
//! | /api/payments/status | GET | none |
//!
//! The callback route is the gateway-facing webhook: it durably queues the
//! notification and acknowledges immediately. All verification and state
//! change happen in the worker, so a slow database or a buggy payload can
//! never make the gateway see a timeout and re-deliver forever.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use shared::order::{OrderStatus, PaymentStatus};

use crate::core::ServerState;
use crate::utils::{AppError, AppResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/api/payments/stk-push", post(stk_push))
        .route("/api/payments/callback", post(callback))
        .route("/api/payments/status", get(status))
}

// ── STK push ────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StkPushBody {
    pub order_number: String,
    pub phone_number: String,
}

#[derive(Serialize)]
pub struct StkPushResponse {
    pub merchant_request_id: String,
    pub checkout_request_id: String,
    pub customer_message: String,
}

async fn stk_push(
    State(state): State<ServerState>,
    Json(body): Json<StkPushBody>,
) -> AppResult<Json<AppResponse<StkPushResponse>>> {
    let acceptance = state
        .initiator
        .initiate(&body.order_number, &body.phone_number)
        .await?;
    Ok(ok(StkPushResponse {
        merchant_request_id: acceptance.merchant_request_id,
        checkout_request_id: acceptance.checkout_request_id,
        customer_message: acceptance.customer_message,
    }))
}

// ── Gateway webhook ─────────────────────────────────────────────────

/// Fast-ack webhook: persist, notify the worker, acknowledge.
///
/// Always answers `ResultCode: 0` - a non-zero answer makes the gateway
/// re-deliver, and redelivery of a queued notification buys nothing since
/// the queue is keyed by checkout request id anyway.
async fn callback(
    State(state): State<ServerState>,
    Json(payload): Json<serde_json::Value>,
) -> Json<serde_json::Value> {
    let correlation_id = payload
        .pointer("/Body/stkCallback/CheckoutRequestID")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match correlation_id {
        Some(id) => {
            if let Err(e) = state.storage.enqueue_callback(&id, payload) {
                // The entry was not persisted; the gateway's own retry is the
                // fallback, so report failure this one time.
                warn!(correlation_id = %id, error = %e, "failed to queue callback");
                return Json(json!({ "ResultCode": 1, "ResultDesc": "Rejected" }));
            }
            // Wake the worker; the periodic scan covers a full channel.
            let _ = state.callback_tx.try_send(id);
        }
        None => {
            // Unprocessable, but still worth keeping on record.
            match state
                .storage
                .quarantine_payload(payload, "callback without a checkout request id")
            {
                Ok(key) => warn!(key = %key, "callback without a checkout request id quarantined"),
                Err(e) => {
                    warn!(error = %e, "failed to quarantine callback");
                    return Json(json!({ "ResultCode": 1, "ResultDesc": "Rejected" }));
                }
            }
        }
    }

    Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" }))
}

// ── Status polling ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct StatusQuery {
    pub order_number: String,
}

/// Client-facing payment status, polled while the STK prompt is open.
#[derive(Serialize)]
pub struct StatusResponse {
    pub order_number: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,
}

async fn status(
    State(state): State<ServerState>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<AppResponse<StatusResponse>>> {
    let order = state
        .storage
        .get_order(&query.order_number)?
        .ok_or_else(|| AppError::not_found(format!("order {} not found", query.order_number)))?;

    let receipt_number = if order.payment_status == PaymentStatus::Paid {
        state
            .storage
            .ledger_for_order(&order.order_number)?
            .iter()
            .rev()
            .find_map(|e| e.receipt_number.clone())
    } else {
        None
    };

    Ok(ok(StatusResponse {
        order_number: order.order_number,
        payment_status: order.payment_status,
        order_status: order.order_status,
        total: order.total,
        paid_at: order.paid_at,
        receipt_number,
    }))
}

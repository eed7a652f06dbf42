//! Checkout route
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/checkout | POST | none (guest checkout supported) |

use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use rust_decimal::Decimal;
use serde::Serialize;

use shared::order::{OrderItem, OrderStatus, PaymentStatus};

use crate::checkout::CheckoutRequest;
use crate::core::ServerState;
use crate::utils::{AppResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/checkout", post(checkout))
}

#[derive(Serialize)]
pub struct CheckoutResponse {
    pub order_number: String,
    /// Priced line snapshots as stored on the order
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Where the client goes next to pay
    pub next_step: &'static str,
}

async fn checkout(
    State(state): State<ServerState>,
    Json(request): Json<CheckoutRequest>,
) -> AppResult<(StatusCode, Json<AppResponse<CheckoutResponse>>)> {
    let order = state.checkout.checkout(request).await?;
    Ok((
        StatusCode::CREATED,
        ok(CheckoutResponse {
            order_number: order.order_number,
            items: order.items,
            subtotal: order.subtotal,
            delivery_fee: order.delivery_fee,
            total: order.total,
            order_status: order.order_status,
            payment_status: order.payment_status,
            next_step: "/api/payments/stk-push",
        }),
    ))
}

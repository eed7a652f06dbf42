//! Order lookup route
//!
//! | Path | Method | Auth |
//! |------|--------|------|
//! | /api/orders/{order_number} | GET | none |

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Serialize;

use shared::ledger::TransactionEntry;
use shared::order::Order;

use crate::core::ServerState;
use crate::utils::{AppError, AppResponse, AppResult, ok};

pub fn router() -> Router<ServerState> {
    Router::new().route("/api/orders/{order_number}", get(get_order))
}

#[derive(Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    /// Payment audit trail, oldest first
    pub transactions: Vec<TransactionEntry>,
}

async fn get_order(
    State(state): State<ServerState>,
    Path(order_number): Path<String>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    let order = state
        .storage
        .get_order(&order_number)?
        .ok_or_else(|| AppError::not_found(format!("order {order_number} not found")))?;
    let transactions = state.storage.ledger_for_order(&order_number)?;
    Ok(ok(OrderDetail {
        order,
        transactions,
    }))
}

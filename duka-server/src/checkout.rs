//! Checkout engine - turns a validated cart into a persisted order
//!
//! Validation happens first, against a read-only view; then every stock
//! reservation and the order insert run inside one write transaction. The
//! first line that cannot be reserved aborts the transaction, so either all
//! lines are held and the order exists, or nothing changed.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;

use shared::money;
use shared::order::{CartLine, Order, OrderItem, OrderStatus, PaymentStatus};
use shared::util::{generate_order_number, now_millis};

use crate::catalog::{Catalog, DeliveryEstimator};
use crate::stock::{StockError, StockLedger};
use crate::store::{CheckoutStorage, StorageError};
use crate::utils::validation::{
    validate_email, validate_optional_text, validate_required_text, MAX_ADDRESS_LEN, MAX_CITY_LEN,
    MAX_LINE_QUANTITY, MAX_NAME_LEN, MAX_NOTE_LEN,
};
use crate::utils::{AppError, AppResult};

/// Checkout submission.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    // Identity: authenticated user id, or guest contact
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub guest_phone: Option<String>,

    pub recipient_name: String,
    pub recipient_phone: String,
    pub delivery_address: String,
    pub delivery_city: String,

    #[serde(default)]
    pub customer_notes: Option<String>,

    pub items: Vec<CartLine>,
}

pub struct CheckoutEngine {
    storage: CheckoutStorage,
    stock: StockLedger,
    catalog: Arc<dyn Catalog>,
    delivery: Arc<dyn DeliveryEstimator>,
}

impl CheckoutEngine {
    pub fn new(
        storage: CheckoutStorage,
        stock: StockLedger,
        catalog: Arc<dyn Catalog>,
        delivery: Arc<dyn DeliveryEstimator>,
    ) -> Self {
        Self {
            storage,
            stock,
            catalog,
            delivery,
        }
    }

    /// Validate, price, and persist a checkout as a `pending`/`unpaid` order.
    ///
    /// All line reservations and the order insert share one write
    /// transaction; any failure drops the transaction and leaves stock and
    /// orders untouched.
    pub async fn checkout(&self, request: CheckoutRequest) -> AppResult<Order> {
        self.validate(&request)?;

        // Price the cart from the catalog. Unit prices are snapshot into the
        // order items so later catalog edits never change what this order
        // owes.
        let mut items = Vec::with_capacity(request.items.len());
        let mut subtotal = Decimal::ZERO;
        for line in &request.items {
            let product = self
                .catalog
                .get_product(&line.product_id)
                .await
                .filter(|p| p.active)
                .ok_or_else(|| {
                    AppError::validation(
                        "items",
                        format!("product {} is not available", line.product_id),
                    )
                })?;

            let unit_price = product.effective_price();
            let line_total = money::round2(unit_price * Decimal::from(line.quantity));
            subtotal += line_total;
            items.push(OrderItem {
                product_id: product.product_id,
                product_name: product.name,
                product_sku: product.sku,
                unit_price,
                quantity: line.quantity,
                line_total,
            });
        }

        let subtotal = money::round2(subtotal);
        let delivery_fee = self.delivery.fee_for_city(&request.delivery_city);
        let total = money::round2(subtotal + delivery_fee);

        let now = now_millis();
        let order = Order {
            order_number: generate_order_number(),
            user_id: request.user_id,
            guest_email: request.guest_email,
            guest_phone: request.guest_phone,
            delivery_address: request.delivery_address,
            delivery_city: request.delivery_city,
            recipient_name: request.recipient_name,
            recipient_phone: request.recipient_phone,
            items,
            subtotal,
            delivery_fee,
            total,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            merchant_request_id: None,
            checkout_request_id: None,
            customer_notes: request.customer_notes,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
        };

        // All-or-nothing: reservations plus the order row, one transaction.
        let txn = self.storage.begin_write()?;
        for item in &order.items {
            match self.stock.reserve_txn(&txn, &item.product_id, item.quantity) {
                Ok(_) => {}
                Err(StockError::Insufficient {
                    product_id,
                    requested,
                    available,
                }) => {
                    return Err(AppError::InsufficientStock {
                        product_id,
                        requested,
                        available,
                    });
                }
                Err(StockError::UnknownProduct(id)) => {
                    return Err(AppError::validation(
                        "items",
                        format!("product {id} is not available"),
                    ));
                }
                Err(StockError::Storage(err)) => return Err(err.into()),
                Err(other) => return Err(AppError::internal(other.to_string())),
            }
        }
        self.storage.insert_order(&txn, &order)?;
        txn.commit().map_err(StorageError::from)?;

        info!(
            order_number = %order.order_number,
            total = %order.total,
            lines = order.items.len(),
            "checkout complete"
        );
        Ok(order)
    }

    fn validate(&self, request: &CheckoutRequest) -> AppResult<()> {
        if request.items.is_empty() {
            return Err(AppError::validation("items", "cart must not be empty"));
        }
        for line in &request.items {
            if line.quantity == 0 {
                return Err(AppError::validation(
                    "items",
                    format!("quantity for {} must be at least 1", line.product_id),
                ));
            }
            if line.quantity > MAX_LINE_QUANTITY {
                return Err(AppError::validation(
                    "items",
                    format!(
                        "quantity for {} exceeds the per-line maximum of {MAX_LINE_QUANTITY}",
                        line.product_id
                    ),
                ));
            }
        }

        // Exactly one identification mode.
        match (&request.user_id, &request.guest_email) {
            (Some(_), Some(_)) => {
                return Err(AppError::validation(
                    "guest_email",
                    "authenticated checkout must not carry a guest email",
                ));
            }
            (None, None) => {
                return Err(AppError::validation(
                    "guest_email",
                    "guest checkout requires a contact email",
                ));
            }
            (None, Some(email)) => validate_email(email, "guest_email")?,
            (Some(_), None) => {}
        }

        validate_required_text(&request.recipient_name, "recipient_name", MAX_NAME_LEN)?;
        validate_required_text(&request.recipient_phone, "recipient_phone", MAX_NAME_LEN)?;
        validate_required_text(&request.delivery_address, "delivery_address", MAX_ADDRESS_LEN)?;
        validate_required_text(&request.delivery_city, "delivery_city", MAX_CITY_LEN)?;
        validate_optional_text(&request.customer_notes, "customer_notes", MAX_NOTE_LEN)?;
        Ok(())
    }
}

//! Order aggregate types and the order/payment state machine
//!
//! Statuses are closed enums; every transition goes through
//! [`OrderStatus::can_transition_to`] / [`PaymentStatus::can_transition_to`].
//! Call sites never compare or assign status strings directly - the store is
//! the single place that applies transitions, and it rejects any attempt from
//! a non-matching source state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// Status enums
// ============================================================================

/// Fulfillment status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting payment confirmation
    #[default]
    Pending,
    /// Payment confirmed
    Confirmed,
    /// Being prepared for shipment
    Processing,
    /// Handed to the courier
    Shipped,
    /// Received by the customer
    Delivered,
    /// Cancelled before fulfillment started
    Cancelled,
}

impl OrderStatus {
    /// Whether `self -> next` is a legal fulfillment transition.
    ///
    /// The happy path is strictly linear; `Cancelled` is reachable from
    /// `Pending` or `Confirmed` only. Cancellation is a status, not a
    /// deletion.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }
}

/// Payment status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// No payment attempt recorded
    #[default]
    Unpaid,
    /// STK push accepted by the gateway, awaiting callback
    Pending,
    /// Verified success callback received
    Paid,
    /// Failure / cancellation / timeout outcome
    Failed,
    /// Administrative refund of a paid order
    Refunded,
}

impl PaymentStatus {
    /// Whether `self -> next` is a legal payment transition.
    ///
    /// `Failed -> Pending` allows the customer to retry initiation;
    /// `Paid -> Refunded` is administrative.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Unpaid, Pending)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Paid, Refunded)
        )
    }

    /// Terminal states require no further automatic transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Refunded)
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// A cart line as submitted at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: String,
    pub quantity: u32,
}

/// Line item snapshot - captures product identity and price at order time.
///
/// `unit_price` and `line_total` are immutable once stored: order totals must
/// always be reconstructible from the stored lines, independent of later
/// catalog price changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub product_sku: String,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
}

/// Customer order (guest checkout or authenticated).
///
/// Exactly one identification mode is populated: `user_id` for authenticated
/// checkouts, `guest_email` (+ recipient phone) for guests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Human-readable unique order number (`ORD-...`), the aggregate identity
    pub order_number: String,

    // Identification (exactly one mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_phone: Option<String>,

    // Delivery
    pub delivery_address: String,
    pub delivery_city: String,
    pub recipient_name: String,
    pub recipient_phone: String,

    // Line items and pricing (KSh, 2 dp)
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub delivery_fee: Decimal,
    pub total: Decimal,

    // Status
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,

    // Gateway correlation (set at STK initiation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,

    /// Customer-supplied note
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_notes: Option<String>,

    // Timestamps (UTC millis)
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shipped_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<i64>,
}

impl Order {
    /// Total quantity across all line items.
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// Customer email, whichever identification mode is populated.
    pub fn customer_email(&self) -> Option<&str> {
        self.guest_email.as_deref()
    }
}

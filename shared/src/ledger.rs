//! Transaction ledger types
//!
//! Append-only audit log of every payment-related event. Entries are never
//! mutated or deleted. The provider's checkout request id is the idempotency
//! key for terminal outcomes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Payment event taxonomy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// STK push accepted by the gateway
    StkInitiated,
    /// Gateway never called back within the timeout window
    ProviderTimeout,
    /// Customer dismissed the STK prompt
    UserCancelled,
    /// Verified success callback
    PaymentSucceeded,
    /// Failure callback (or amount mismatch treated as failure)
    PaymentFailed,
    /// Late/duplicate/conflicting notification parked for a human
    ManualReview,
}

impl TransactionKind {
    /// Terminal kinds settle the payment attempt; at most one terminal entry
    /// is applied per checkout request id.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionKind::ProviderTimeout
                | TransactionKind::UserCancelled
                | TransactionKind::PaymentSucceeded
                | TransactionKind::PaymentFailed
        )
    }
}

/// One ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionEntry {
    /// Generated log id
    pub log_id: String,
    /// Position in the global append order
    pub seq: u64,
    /// Order this event belongs to
    pub order_number: String,
    pub kind: TransactionKind,

    // Gateway correlation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_request_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub amount: Decimal,

    // Provider result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_desc: Option<String>,
    /// M-Pesa receipt reference (success only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_number: Option<String>,

    /// Raw provider payload, kept verbatim for audit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_payload: Option<serde_json::Value>,

    pub created_at: i64,
}

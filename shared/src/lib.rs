//! Shared types for the Duka storefront backend
//!
//! Common types used by the server (and future clients): order and payment
//! status enums with their transition rules, order aggregates, transaction
//! ledger entries, the M-Pesa callback envelope, and money helpers.

pub mod callback;
pub mod ledger;
pub mod money;
pub mod order;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use callback::{CallbackEnvelope, StkCallback};
pub use ledger::{TransactionEntry, TransactionKind};
pub use order::{CartLine, Order, OrderItem, OrderStatus, PaymentStatus};

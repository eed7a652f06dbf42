//! Durable state for the checkout/payment core
//!
//! - **storage**: redb-based persistence for orders, stock counters, the
//!   transaction ledger, correlation/idempotency indices, and the durable
//!   callback queue
//!
//! Everything mutable in this core lives behind [`CheckoutStorage`]; the
//! checkout engine and the callback reconciler compose their multi-table
//! mutations inside a single write transaction, which is what makes
//! reservation+order-creation and reconciliation atomic.

pub mod storage;

pub use storage::{
    CheckoutStorage, DeadLetter, PendingCallback, StockRecord, StorageError, StorageResult,
};

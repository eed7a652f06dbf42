//! Callback reconciliation
//!
//! - **reconciler**: applies one gateway callback to the order, ledger, and
//!   stock counters in a single write transaction, idempotently
//! - **worker**: drains the durable callback queue with retry/backoff and a
//!   dead letter queue, and runs the stale-payment sweep

pub mod reconciler;
pub mod worker;

pub use reconciler::{ReconcileError, ReconcileOutcome, Reconciler};
pub use worker::CallbackWorker;

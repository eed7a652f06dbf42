//! Callback reconciler
//!
//! Takes a parsed STK callback and settles the payment attempt: idempotency
//! check, correlation, amount cross-check, then the status transition, stock
//! movement, ledger entry, idempotency marker, and queue removal - all inside
//! one write transaction. Redelivered or reordered notifications therefore
//! land exactly once, and a crash mid-way leaves the callback queued.

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use shared::callback::StkCallback;
use shared::ledger::{TransactionEntry, TransactionKind};
use shared::money;
use shared::order::{Order, OrderStatus, PaymentStatus};
use shared::util::now_millis;

use crate::stock::{StockError, StockLedger};
use crate::store::{CheckoutStorage, StorageError};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Stock fault during reconciliation: {0}")]
    Stock(String),
}

impl From<StockError> for ReconcileError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::Storage(e) => ReconcileError::Storage(e),
            other => ReconcileError::Stock(other.to_string()),
        }
    }
}

/// How a callback was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Terminal outcome applied in this call
    Applied(TransactionKind),
    /// This correlation id was settled earlier; nothing changed
    AlreadyReconciled(TransactionKind),
    /// Correlation id matches no order
    UnknownCorrelation,
    /// Order was not awaiting a callback; parked for a human
    ManualReview,
}

pub struct Reconciler {
    storage: CheckoutStorage,
    stock: StockLedger,
}

impl Reconciler {
    pub fn new(storage: CheckoutStorage, stock: StockLedger) -> Self {
        Self { storage, stock }
    }

    /// Settle one callback. Safe to call any number of times with the same
    /// notification.
    pub fn process(
        &self,
        callback: &StkCallback,
        raw_payload: &serde_json::Value,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let correlation_id = callback.checkout_request_id.as_str();
        let txn = self.storage.begin_write()?;

        // Already settled: drop the queue entry and stop. This is the
        // idempotency path for gateway redelivery.
        if let Some(kind) = self.storage.reconciled_kind_txn(&txn, correlation_id)? {
            self.storage.remove_pending_txn(&txn, correlation_id)?;
            txn.commit().map_err(StorageError::from)?;
            info!(correlation_id, ?kind, "callback already reconciled");
            return Ok(ReconcileOutcome::AlreadyReconciled(kind));
        }

        let Some(order_number) = self.storage.resolve_correlation_txn(&txn, correlation_id)? else {
            // Not ours. The worker decides what to do with the queue entry.
            return Ok(ReconcileOutcome::UnknownCorrelation);
        };
        let order = self
            .storage
            .get_order_txn(&txn, &order_number)?
            .ok_or_else(|| StorageError::OrderNotFound(order_number.clone()))?;

        // Only an order awaiting its callback may be settled by one. Anything
        // else is a conflicting notification: record it, mark the correlation
        // handled, and leave the order alone.
        if order.payment_status != PaymentStatus::Pending {
            warn!(
                order_number = %order.order_number,
                status = ?order.payment_status,
                result_code = callback.result_code,
                "callback for non-pending order parked for manual review"
            );
            self.storage.append_ledger(
                &txn,
                self.entry(&order, callback, TransactionKind::ManualReview, raw_payload),
            )?;
            self.storage
                .mark_reconciled(&txn, correlation_id, TransactionKind::ManualReview)?;
            self.storage.remove_pending_txn(&txn, correlation_id)?;
            txn.commit().map_err(StorageError::from)?;
            return Ok(ReconcileOutcome::ManualReview);
        }

        let kind = self.classify(&order, callback);
        match kind {
            TransactionKind::PaymentSucceeded => {
                self.storage.apply_payment_transition(
                    &txn,
                    &order.order_number,
                    PaymentStatus::Paid,
                    Some(OrderStatus::Confirmed),
                )?;
                for item in &order.items {
                    self.stock.commit_txn(&txn, &item.product_id, item.quantity)?;
                }
            }
            _ => {
                self.storage.apply_payment_transition(
                    &txn,
                    &order.order_number,
                    PaymentStatus::Failed,
                    None,
                )?;
                for item in &order.items {
                    self.stock.release_txn(&txn, &item.product_id, item.quantity)?;
                }
            }
        }

        self.storage
            .append_ledger(&txn, self.entry(&order, callback, kind, raw_payload))?;
        self.storage.mark_reconciled(&txn, correlation_id, kind)?;
        self.storage.remove_pending_txn(&txn, correlation_id)?;
        txn.commit().map_err(StorageError::from)?;

        info!(
            order_number = %order.order_number,
            ?kind,
            result_code = callback.result_code,
            "callback reconciled"
        );
        Ok(ReconcileOutcome::Applied(kind))
    }

    /// Fail every payment still `pending` past the timeout window, releasing
    /// its stock and recording a `provider_timeout` entry. Returns the number
    /// of orders swept.
    pub fn sweep_stale_pending(&self, window_secs: u64) -> Result<usize, ReconcileError> {
        let cutoff = now_millis() - (window_secs as i64) * 1000;
        let stale = self.storage.list_stale_pending_payments(cutoff)?;
        let mut swept = 0;

        for order in stale {
            let txn = self.storage.begin_write()?;

            // Re-check under the write transaction: a callback may have
            // settled the order between the scan and now.
            let Some(current) = self.storage.get_order_txn(&txn, &order.order_number)? else {
                continue;
            };
            if current.payment_status != PaymentStatus::Pending {
                continue;
            }

            self.storage.apply_payment_transition(
                &txn,
                &current.order_number,
                PaymentStatus::Failed,
                None,
            )?;
            for item in &current.items {
                self.stock.release_txn(&txn, &item.product_id, item.quantity)?;
            }
            self.storage.append_ledger(
                &txn,
                TransactionEntry {
                    log_id: Uuid::new_v4().to_string(),
                    seq: 0,
                    order_number: current.order_number.clone(),
                    kind: TransactionKind::ProviderTimeout,
                    merchant_request_id: current.merchant_request_id.clone(),
                    checkout_request_id: current.checkout_request_id.clone(),
                    phone_number: None,
                    amount: current.total,
                    result_code: None,
                    result_desc: Some(format!("no callback within {window_secs}s")),
                    receipt_number: None,
                    raw_payload: None,
                    created_at: now_millis(),
                },
            )?;
            if let Some(correlation_id) = current.checkout_request_id.as_deref() {
                self.storage
                    .mark_reconciled(&txn, correlation_id, TransactionKind::ProviderTimeout)?;
            }
            txn.commit().map_err(StorageError::from)?;

            warn!(order_number = %current.order_number, "pending payment timed out");
            swept += 1;
        }
        Ok(swept)
    }

    /// Terminal kind for a callback against a pending order.
    ///
    /// A success whose confirmed amount disagrees with the order total is
    /// treated as a failure: the money trail no longer matches the order and
    /// confirming would ship goods that were not paid for.
    fn classify(&self, order: &Order, callback: &StkCallback) -> TransactionKind {
        if callback.is_success() {
            match callback.amount() {
                Some(amount) if amount == money::round2(order.total) => {
                    TransactionKind::PaymentSucceeded
                }
                amount => {
                    warn!(
                        order_number = %order.order_number,
                        expected = %order.total,
                        confirmed = ?amount,
                        "callback amount mismatch"
                    );
                    TransactionKind::PaymentFailed
                }
            }
        } else if callback.is_user_cancelled() {
            TransactionKind::UserCancelled
        } else {
            TransactionKind::PaymentFailed
        }
    }

    fn entry(
        &self,
        order: &Order,
        callback: &StkCallback,
        kind: TransactionKind,
        raw_payload: &serde_json::Value,
    ) -> TransactionEntry {
        TransactionEntry {
            log_id: Uuid::new_v4().to_string(),
            seq: 0,
            order_number: order.order_number.clone(),
            kind,
            merchant_request_id: Some(callback.merchant_request_id.clone()),
            checkout_request_id: Some(callback.checkout_request_id.clone()),
            phone_number: callback.phone_number(),
            amount: callback.amount().unwrap_or(order.total),
            result_code: Some(callback.result_code),
            result_desc: Some(callback.result_desc.clone()),
            receipt_number: callback.receipt_number(),
            raw_payload: Some(raw_payload.clone()),
            created_at: now_millis(),
        }
    }
}

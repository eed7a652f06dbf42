//! redb-based storage layer for the checkout/payment core
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_number` | `Order` | Order aggregate store |
//! | `stock` | `product_id` | `StockRecord` | Stock ledger counters |
//! | `transaction_log` | `seq` | `TransactionEntry` | Append-only payment audit log |
//! | `correlations` | `checkout_request_id` | `order_number` | Gateway correlation index |
//! | `reconciled` | `checkout_request_id` | `TransactionKind` | Terminal-outcome idempotency index |
//! | `pending_callbacks` | `checkout_request_id` | `PendingCallback` | Durable webhook queue |
//! | `dead_letters` | `checkout_request_id` | `DeadLetter` | Permanently failed callbacks |
//! | `counters` | `&str` | `u64` | Ledger sequence |
//!
//! # Atomicity
//!
//! redb commits are durable as soon as `commit()` returns, and a dropped
//! uncommitted transaction leaves no trace - that is the rollback story for
//! multi-line checkout. All cross-table invariants (reserve + create order,
//! transition + ledger append + stock commit) are enforced by doing the whole
//! unit against one [`WriteTransaction`].

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use shared::order::{Order, OrderStatus, PaymentStatus};
use shared::ledger::{TransactionEntry, TransactionKind};
use shared::util::now_millis;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Orders: key = order_number, value = JSON-serialized Order
const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");

/// Stock counters: key = product_id, value = JSON-serialized StockRecord
const STOCK_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("stock");

/// Transaction ledger: key = global sequence, value = JSON-serialized TransactionEntry
const LEDGER_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("transaction_log");

/// Correlation index: key = checkout_request_id, value = order_number
const CORRELATIONS_TABLE: TableDefinition<&str, &str> = TableDefinition::new("correlations");

/// Idempotency index: key = checkout_request_id, value = JSON-serialized terminal TransactionKind
const RECONCILED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("reconciled");

/// Durable callback queue: key = checkout_request_id, value = JSON-serialized PendingCallback
const PENDING_CALLBACKS_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("pending_callbacks");

/// Dead letter queue: key = checkout_request_id, value = JSON-serialized DeadLetter
const DEAD_LETTER_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("dead_letters");

/// Counters: ledger sequence
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const LEDGER_SEQ_KEY: &str = "ledger_seq";

/// Synthetic dead-letter key prefix for payloads without a correlation id.
const QUARANTINE_KEY_PREFIX: &str = "unkeyed-";

/// Per-product stock counters.
///
/// Invariant: `reserved_stock <= total_stock`; available = total - reserved,
/// never negative. Mutated only through the stock ledger operations.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockRecord {
    pub total_stock: u32,
    pub reserved_stock: u32,
}

impl StockRecord {
    pub fn available(&self) -> u32 {
        self.total_stock.saturating_sub(self.reserved_stock)
    }
}

/// Durable queue entry for a received-but-unprocessed gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCallback {
    pub checkout_request_id: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Permanently failed callback (manual recovery).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub checkout_request_id: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
    pub failed_at: i64,
    pub retry_count: u32,
    pub reason: String,
}

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order number already exists: {0}")]
    DuplicateOrder(String),

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Checkout storage backed by redb
#[derive(Clone)]
pub struct CheckoutStorage {
    db: Arc<Database>,
}

impl CheckoutStorage {
    /// Open or create the database at the given path.
    ///
    /// redb commits with `Durability::Immediate` by default: once a checkout
    /// or reconciliation commit returns, the state survives process restarts.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        let storage = Self { db: Arc::new(db) };
        storage.init_tables()?;
        Ok(storage)
    }

    fn init_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let _ = txn.open_table(ORDERS_TABLE)?;
            let _ = txn.open_table(STOCK_TABLE)?;
            let _ = txn.open_table(LEDGER_TABLE)?;
            let _ = txn.open_table(CORRELATIONS_TABLE)?;
            let _ = txn.open_table(RECONCILED_TABLE)?;
            let _ = txn.open_table(PENDING_CALLBACKS_TABLE)?;
            let _ = txn.open_table(DEAD_LETTER_TABLE)?;
            let mut counters = txn.open_table(COUNTERS_TABLE)?;
            if counters.get(LEDGER_SEQ_KEY)?.is_none() {
                counters.insert(LEDGER_SEQ_KEY, 0u64)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Begin a write transaction.
    ///
    /// redb serializes writers, which is what serializes concurrent checkouts
    /// and reconciliations touching the same stock row or order.
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Order Operations ==========

    /// Insert a freshly created order; fails on order number collision.
    pub fn insert_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        if table.get(order.order_number.as_str())?.is_some() {
            return Err(StorageError::DuplicateOrder(order.order_number.clone()));
        }
        let value = serde_json::to_vec(order)?;
        table.insert(order.order_number.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Overwrite an order within a transaction (status transitions only).
    fn put_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        let value = serde_json::to_vec(order)?;
        table.insert(order.order_number.as_str(), value.as_slice())?;
        Ok(())
    }

    /// Load an order within a write transaction.
    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_number: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_number)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load an order (read-only).
    pub fn get_order(&self, order_number: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_number)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Orders stuck in `payment_status = pending` whose last update predates
    /// `cutoff_millis`. Consumed by the timeout sweep.
    pub fn list_stale_pending_payments(&self, cutoff_millis: i64) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut stale = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if order.payment_status == PaymentStatus::Pending && order.updated_at <= cutoff_millis {
                stale.push(order);
            }
        }
        Ok(stale)
    }

    // ========== Payment State Transitions ==========

    /// Check-and-apply a payment transition on an order, optionally advancing
    /// the fulfillment status with it. This is the only mutation path for
    /// order/payment status.
    ///
    /// A transition from a non-matching source state is rejected with
    /// [`StorageError::ConsistencyViolation`], never silently coerced.
    pub fn apply_payment_transition(
        &self,
        txn: &WriteTransaction,
        order_number: &str,
        next_payment: PaymentStatus,
        next_order: Option<OrderStatus>,
    ) -> StorageResult<Order> {
        let mut order = self
            .get_order_txn(txn, order_number)?
            .ok_or_else(|| StorageError::OrderNotFound(order_number.to_string()))?;

        if !order.payment_status.can_transition_to(next_payment) {
            return Err(StorageError::ConsistencyViolation(format!(
                "payment transition {:?} -> {:?} rejected for order {}",
                order.payment_status, next_payment, order_number
            )));
        }
        if let Some(next) = next_order
            && !order.order_status.can_transition_to(next)
        {
            return Err(StorageError::ConsistencyViolation(format!(
                "order transition {:?} -> {:?} rejected for order {}",
                order.order_status, next, order_number
            )));
        }

        let now = now_millis();
        order.payment_status = next_payment;
        order.updated_at = now;
        if next_payment == PaymentStatus::Paid {
            order.paid_at = Some(now);
        }
        if let Some(next) = next_order {
            order.order_status = next;
        }

        self.put_order(txn, &order)?;
        Ok(order)
    }

    /// Record the gateway correlation ids on an order at STK initiation.
    pub fn set_order_correlation(
        &self,
        txn: &WriteTransaction,
        order_number: &str,
        merchant_request_id: &str,
        checkout_request_id: &str,
    ) -> StorageResult<Order> {
        let mut order = self
            .get_order_txn(txn, order_number)?
            .ok_or_else(|| StorageError::OrderNotFound(order_number.to_string()))?;
        order.merchant_request_id = Some(merchant_request_id.to_string());
        order.checkout_request_id = Some(checkout_request_id.to_string());
        order.updated_at = now_millis();
        self.put_order(txn, &order)?;

        let mut correlations = txn.open_table(CORRELATIONS_TABLE)?;
        correlations.insert(checkout_request_id, order_number)?;
        Ok(order)
    }

    /// Resolve a gateway correlation id to its order number.
    pub fn resolve_correlation_txn(
        &self,
        txn: &WriteTransaction,
        checkout_request_id: &str,
    ) -> StorageResult<Option<String>> {
        let table = txn.open_table(CORRELATIONS_TABLE)?;
        Ok(table.get(checkout_request_id)?.map(|g| g.value().to_string()))
    }

    // ========== Stock Operations ==========

    /// Load the stock counters for a product within a write transaction.
    pub fn get_stock_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
    ) -> StorageResult<Option<StockRecord>> {
        let table = txn.open_table(STOCK_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Load the stock counters for a product (read-only).
    pub fn get_stock(&self, product_id: &str) -> StorageResult<Option<StockRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STOCK_TABLE)?;
        match table.get(product_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Write stock counters within a transaction.
    pub fn put_stock_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        record: &StockRecord,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(STOCK_TABLE)?;
        let value = serde_json::to_vec(record)?;
        table.insert(product_id, value.as_slice())?;
        Ok(())
    }

    // ========== Transaction Ledger ==========

    /// Append an entry to the transaction ledger, assigning the next global
    /// sequence. The ledger is append-only; nothing ever updates or deletes
    /// an entry.
    pub fn append_ledger(
        &self,
        txn: &WriteTransaction,
        mut entry: TransactionEntry,
    ) -> StorageResult<TransactionEntry> {
        let mut counters = txn.open_table(COUNTERS_TABLE)?;
        let seq = counters.get(LEDGER_SEQ_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
        counters.insert(LEDGER_SEQ_KEY, seq)?;
        drop(counters);

        entry.seq = seq;
        let mut table = txn.open_table(LEDGER_TABLE)?;
        let value = serde_json::to_vec(&entry)?;
        table.insert(seq, value.as_slice())?;
        Ok(entry)
    }

    /// All ledger entries for an order, in append order.
    pub fn ledger_for_order(&self, order_number: &str) -> StorageResult<Vec<TransactionEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LEDGER_TABLE)?;

        let mut entries = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let entry: TransactionEntry = serde_json::from_slice(value.value())?;
            if entry.order_number == order_number {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // ========== Reconciliation Idempotency ==========

    /// Terminal outcome already applied for this correlation id?
    pub fn reconciled_kind_txn(
        &self,
        txn: &WriteTransaction,
        checkout_request_id: &str,
    ) -> StorageResult<Option<TransactionKind>> {
        let table = txn.open_table(RECONCILED_TABLE)?;
        match table.get(checkout_request_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Mark a correlation id as terminally reconciled.
    pub fn mark_reconciled(
        &self,
        txn: &WriteTransaction,
        checkout_request_id: &str,
        kind: TransactionKind,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(RECONCILED_TABLE)?;
        let value = serde_json::to_vec(&kind)?;
        table.insert(checkout_request_id, value.as_slice())?;
        Ok(())
    }

    // ========== Durable Callback Queue ==========

    /// Durably record a received callback before acknowledging the gateway.
    ///
    /// Keyed by checkout_request_id: redelivery of the same notification
    /// collapses onto the existing entry instead of queueing twice.
    pub fn enqueue_callback(
        &self,
        checkout_request_id: &str,
        payload: serde_json::Value,
    ) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PENDING_CALLBACKS_TABLE)?;
            if table.get(checkout_request_id)?.is_none() {
                let entry = PendingCallback {
                    checkout_request_id: checkout_request_id.to_string(),
                    payload,
                    created_at: now_millis(),
                    retry_count: 0,
                    last_attempt_at: None,
                    last_error: None,
                };
                let value = serde_json::to_vec(&entry)?;
                table.insert(checkout_request_id, value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// All queued callbacks (worker scan).
    pub fn get_pending_callbacks(&self) -> StorageResult<Vec<PendingCallback>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_CALLBACKS_TABLE)?;

        let mut pending = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            pending.push(serde_json::from_slice(value.value())?);
        }
        Ok(pending)
    }

    /// Load one queued callback.
    pub fn get_pending_callback(
        &self,
        checkout_request_id: &str,
    ) -> StorageResult<Option<PendingCallback>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PENDING_CALLBACKS_TABLE)?;
        match table.get(checkout_request_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Remove a queue entry within the reconciliation transaction, so dequeue
    /// commits or rolls back together with the state transition.
    pub fn remove_pending_txn(
        &self,
        txn: &WriteTransaction,
        checkout_request_id: &str,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(PENDING_CALLBACKS_TABLE)?;
        table.remove(checkout_request_id)?;
        Ok(())
    }

    /// Record a failed processing attempt (bumps retry count).
    pub fn mark_callback_failed(
        &self,
        checkout_request_id: &str,
        error: &str,
    ) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PENDING_CALLBACKS_TABLE)?;
            let entry = match table.get(checkout_request_id)? {
                Some(guard) => {
                    let e: PendingCallback = serde_json::from_slice(guard.value())?;
                    drop(guard);
                    Some(e)
                }
                None => None,
            };
            if let Some(mut entry) = entry {
                entry.retry_count += 1;
                entry.last_attempt_at = Some(now_millis());
                entry.last_error = Some(error.to_string());
                let value = serde_json::to_vec(&entry)?;
                table.insert(checkout_request_id, value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Move a callback to the dead letter queue (manual recovery).
    pub fn move_to_dead_letter(
        &self,
        checkout_request_id: &str,
        reason: &str,
    ) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        let entry = {
            let mut pending = txn.open_table(PENDING_CALLBACKS_TABLE)?;
            let entry = match pending.get(checkout_request_id)? {
                Some(guard) => {
                    let e: PendingCallback = serde_json::from_slice(guard.value())?;
                    drop(guard);
                    Some(e)
                }
                None => None,
            };
            if entry.is_some() {
                pending.remove(checkout_request_id)?;
            }
            entry
        };

        if let Some(entry) = entry {
            let dead = DeadLetter {
                checkout_request_id: entry.checkout_request_id.clone(),
                payload: entry.payload,
                created_at: entry.created_at,
                failed_at: now_millis(),
                retry_count: entry.retry_count,
                reason: reason.to_string(),
            };
            let mut table = txn.open_table(DEAD_LETTER_TABLE)?;
            let value = serde_json::to_vec(&dead)?;
            table.insert(checkout_request_id, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Persist a payload that cannot be queued (no correlation key) straight
    /// into the dead letter table under a synthetic key, so it is still on
    /// record for manual review. Returns the key.
    pub fn quarantine_payload(
        &self,
        payload: serde_json::Value,
        reason: &str,
    ) -> StorageResult<String> {
        let key = format!("{QUARANTINE_KEY_PREFIX}{}", uuid::Uuid::new_v4());
        let txn = self.db.begin_write()?;
        {
            let dead = DeadLetter {
                checkout_request_id: key.clone(),
                payload,
                created_at: now_millis(),
                failed_at: now_millis(),
                retry_count: 0,
                reason: reason.to_string(),
            };
            let mut table = txn.open_table(DEAD_LETTER_TABLE)?;
            let value = serde_json::to_vec(&dead)?;
            table.insert(key.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        Ok(key)
    }

    /// Move dead letters back to the pending queue (worker startup).
    /// Returns the number of recovered entries.
    pub fn recover_dead_letters(&self) -> StorageResult<usize> {
        let txn = self.db.begin_write()?;
        let mut recovered = 0;
        {
            let mut dead = txn.open_table(DEAD_LETTER_TABLE)?;
            let mut entries = Vec::new();
            for result in dead.iter()? {
                let (_key, value) = result?;
                let entry: DeadLetter = serde_json::from_slice(value.value())?;
                // Quarantined payloads have no correlation key and can never
                // reconcile; they stay parked for manual review.
                if entry.checkout_request_id.starts_with(QUARANTINE_KEY_PREFIX) {
                    continue;
                }
                entries.push(entry);
            }

            let mut pending = txn.open_table(PENDING_CALLBACKS_TABLE)?;
            for entry in entries {
                let requeued = PendingCallback {
                    checkout_request_id: entry.checkout_request_id.clone(),
                    payload: entry.payload,
                    created_at: entry.created_at,
                    retry_count: 0,
                    last_attempt_at: None,
                    last_error: Some(entry.reason),
                };
                let value = serde_json::to_vec(&requeued)?;
                pending.insert(entry.checkout_request_id.as_str(), value.as_slice())?;
                dead.remove(entry.checkout_request_id.as_str())?;
                recovered += 1;
            }
        }
        txn.commit()?;
        Ok(recovered)
    }

    /// All dead letters (inspection/manual reconciliation).
    pub fn get_dead_letters(&self) -> StorageResult<Vec<DeadLetter>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DEAD_LETTER_TABLE)?;

        let mut letters = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            letters.push(serde_json::from_slice(value.value())?);
        }
        Ok(letters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use shared::util::generate_order_number;

    fn test_order(order_number: &str) -> Order {
        let now = now_millis();
        Order {
            order_number: order_number.to_string(),
            user_id: None,
            guest_email: Some("jane@example.com".to_string()),
            guest_phone: Some("254712345678".to_string()),
            delivery_address: "123 Kenyatta Avenue".to_string(),
            delivery_city: "Nairobi".to_string(),
            recipient_name: "Jane Doe".to_string(),
            recipient_phone: "254712345678".to_string(),
            items: vec![],
            subtotal: Decimal::ZERO,
            delivery_fee: Decimal::ZERO,
            total: Decimal::ZERO,
            order_status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            merchant_request_id: None,
            checkout_request_id: None,
            customer_notes: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn test_insert_and_get_order() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let order = test_order("ORD-1");

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &order).unwrap();
        txn.commit().unwrap();

        let loaded = storage.get_order("ORD-1").unwrap().unwrap();
        assert_eq!(loaded, order);
        assert!(storage.get_order("ORD-2").unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_order_rejected() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let order = test_order("ORD-1");

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &order).unwrap();
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        let result = storage.insert_order(&txn, &order);
        assert!(matches!(result, Err(StorageError::DuplicateOrder(_))));
    }

    #[test]
    fn test_uncommitted_transaction_leaves_no_trace() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        {
            let txn = storage.begin_write().unwrap();
            storage.insert_order(&txn, &test_order("ORD-1")).unwrap();
            storage
                .put_stock_txn(&txn, "prod-1", &StockRecord { total_stock: 5, reserved_stock: 5 })
                .unwrap();
            // dropped without commit
        }
        assert!(storage.get_order("ORD-1").unwrap().is_none());
        assert!(storage.get_stock("prod-1").unwrap().is_none());
    }

    #[test]
    fn test_payment_transition_applies_and_stamps() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &test_order("ORD-1")).unwrap();
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        storage
            .apply_payment_transition(&txn, "ORD-1", PaymentStatus::Pending, None)
            .unwrap();
        let order = storage
            .apply_payment_transition(&txn, "ORD-1", PaymentStatus::Paid, Some(OrderStatus::Confirmed))
            .unwrap();
        txn.commit().unwrap();

        assert_eq!(order.payment_status, PaymentStatus::Paid);
        assert_eq!(order.order_status, OrderStatus::Confirmed);
        assert!(order.paid_at.is_some());

        let loaded = storage.get_order("ORD-1").unwrap().unwrap();
        assert_eq!(loaded.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_payment_transition_from_wrong_state_rejected() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &test_order("ORD-1")).unwrap();
        txn.commit().unwrap();

        // unpaid -> paid skips the pending state
        let txn = storage.begin_write().unwrap();
        let result = storage.apply_payment_transition(&txn, "ORD-1", PaymentStatus::Paid, None);
        assert!(matches!(result, Err(StorageError::ConsistencyViolation(_))));
    }

    #[test]
    fn test_correlation_roundtrip() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &test_order("ORD-1")).unwrap();
        storage
            .set_order_correlation(&txn, "ORD-1", "mr-1", "ws_CO_abc")
            .unwrap();
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        assert_eq!(
            storage.resolve_correlation_txn(&txn, "ws_CO_abc").unwrap().as_deref(),
            Some("ORD-1")
        );
        assert!(storage.resolve_correlation_txn(&txn, "ws_CO_zzz").unwrap().is_none());

        let order = storage.get_order_txn(&txn, "ORD-1").unwrap().unwrap();
        assert_eq!(order.checkout_request_id.as_deref(), Some("ws_CO_abc"));
    }

    #[test]
    fn test_ledger_append_assigns_sequence() {
        let storage = CheckoutStorage::open_in_memory().unwrap();

        let entry = TransactionEntry {
            log_id: "log-1".to_string(),
            seq: 0,
            order_number: "ORD-1".to_string(),
            kind: TransactionKind::StkInitiated,
            merchant_request_id: None,
            checkout_request_id: Some("ws_CO_abc".to_string()),
            phone_number: None,
            amount: Decimal::ZERO,
            result_code: None,
            result_desc: None,
            receipt_number: None,
            raw_payload: None,
            created_at: now_millis(),
        };

        let txn = storage.begin_write().unwrap();
        let first = storage.append_ledger(&txn, entry.clone()).unwrap();
        let second = storage.append_ledger(&txn, entry).unwrap();
        txn.commit().unwrap();

        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(storage.ledger_for_order("ORD-1").unwrap().len(), 2);
        assert!(storage.ledger_for_order("ORD-9").unwrap().is_empty());
    }

    #[test]
    fn test_callback_queue_dedupes_redelivery() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let payload = serde_json::json!({"ResultCode": 0});

        storage.enqueue_callback("ws_CO_abc", payload.clone()).unwrap();
        storage.enqueue_callback("ws_CO_abc", payload).unwrap();

        assert_eq!(storage.get_pending_callbacks().unwrap().len(), 1);
    }

    #[test]
    fn test_mark_callback_failed_accumulates_attempts() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        storage
            .enqueue_callback("ws_CO_abc", serde_json::json!({}))
            .unwrap();

        storage.mark_callback_failed("ws_CO_abc", "first").unwrap();
        storage.mark_callback_failed("ws_CO_abc", "second").unwrap();

        let entry = storage.get_pending_callback("ws_CO_abc").unwrap().unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_error.as_deref(), Some("second"));
        assert!(entry.last_attempt_at.is_some());

        // Marking an unknown key is a no-op, not an error.
        storage.mark_callback_failed("ws_CO_missing", "boom").unwrap();
        assert!(storage.get_pending_callback("ws_CO_missing").unwrap().is_none());
    }

    #[test]
    fn test_dead_letter_roundtrip() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        storage
            .enqueue_callback("ws_CO_abc", serde_json::json!({}))
            .unwrap();
        storage.mark_callback_failed("ws_CO_abc", "boom").unwrap();

        let entry = storage.get_pending_callback("ws_CO_abc").unwrap().unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.last_error.as_deref(), Some("boom"));

        storage.move_to_dead_letter("ws_CO_abc", "gave up").unwrap();
        assert!(storage.get_pending_callback("ws_CO_abc").unwrap().is_none());
        assert_eq!(storage.get_dead_letters().unwrap().len(), 1);

        let recovered = storage.recover_dead_letters().unwrap();
        assert_eq!(recovered, 1);
        assert!(storage.get_dead_letters().unwrap().is_empty());
        let entry = storage.get_pending_callback("ws_CO_abc").unwrap().unwrap();
        assert_eq!(entry.retry_count, 0);
    }

    #[test]
    fn test_quarantined_payload_is_not_requeued() {
        let storage = CheckoutStorage::open_in_memory().unwrap();
        let key = storage
            .quarantine_payload(serde_json::json!({"ResultCode": 0}), "no correlation id")
            .unwrap();
        assert_eq!(storage.get_dead_letters().unwrap().len(), 1);

        // Recovery brings back failed callbacks, not quarantined payloads.
        assert_eq!(storage.recover_dead_letters().unwrap(), 0);
        assert_eq!(storage.get_dead_letters().unwrap().len(), 1);
        assert!(storage.get_pending_callback(&key).unwrap().is_none());
    }

    #[test]
    fn test_stale_pending_scan() {
        let storage = CheckoutStorage::open_in_memory().unwrap();

        let mut stale = test_order(&generate_order_number());
        stale.payment_status = PaymentStatus::Pending;
        stale.updated_at = now_millis() - 10_000;

        let mut fresh = test_order("ORD-FRESH");
        fresh.payment_status = PaymentStatus::Pending;
        fresh.updated_at = now_millis() + 10_000;

        let mut unpaid = test_order("ORD-UNPAID");
        unpaid.updated_at = 0;

        let txn = storage.begin_write().unwrap();
        storage.insert_order(&txn, &stale).unwrap();
        storage.insert_order(&txn, &fresh).unwrap();
        storage.insert_order(&txn, &unpaid).unwrap();
        txn.commit().unwrap();

        let found = storage.list_stale_pending_payments(now_millis()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].order_number, stale.order_number);
    }
}

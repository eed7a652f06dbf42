//! Stock Ledger - the only mutation path for inventory during checkout
//!
//! Tracks `total_stock` / `reserved_stock` per product. A reservation is a
//! temporary hold convertible to a permanent deduction (`commit`) or returned
//! to availability (`release`).
//!
//! Every operation is a conditional check-and-update against the counters
//! inside a write transaction; there is no read-then-write gap. Callers that
//! need stock mutations atomic with order mutations (checkout engine,
//! reconciler) use the `*_txn` variants against their own transaction.

use redb::WriteTransaction;
use thiserror::Error;

use crate::store::{CheckoutStorage, StockRecord, StorageError};

/// Stock ledger errors
#[derive(Debug, Error)]
pub enum StockError {
    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    Insufficient {
        product_id: String,
        requested: u32,
        available: u32,
    },

    #[error("Unknown product: {0}")]
    UnknownProduct(String),

    #[error("Stock counter underflow for {product_id}: {operation} {quantity} with {reserved} reserved")]
    Underflow {
        product_id: String,
        operation: &'static str,
        quantity: u32,
        reserved: u32,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type StockResult<T> = Result<T, StockError>;

/// Stock ledger over the durable counters.
#[derive(Clone)]
pub struct StockLedger {
    storage: CheckoutStorage,
}

impl StockLedger {
    pub fn new(storage: CheckoutStorage) -> Self {
        Self { storage }
    }

    /// Place a hold on `quantity` units, failing when availability is short.
    ///
    /// The check and the counter update happen against the same transaction,
    /// so concurrent reservations on one product serialize and the available
    /// count can never go negative.
    pub fn reserve_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        quantity: u32,
    ) -> StockResult<StockRecord> {
        let mut record = self.load(txn, product_id)?;
        let available = record.available();
        if available < quantity {
            return Err(StockError::Insufficient {
                product_id: product_id.to_string(),
                requested: quantity,
                available,
            });
        }
        record.reserved_stock += quantity;
        self.storage.put_stock_txn(txn, product_id, &record)?;
        Ok(record)
    }

    /// Return a hold to availability (payment failed / cancelled / timed out).
    pub fn release_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        quantity: u32,
    ) -> StockResult<StockRecord> {
        let mut record = self.load(txn, product_id)?;
        if record.reserved_stock < quantity {
            return Err(StockError::Underflow {
                product_id: product_id.to_string(),
                operation: "release",
                quantity,
                reserved: record.reserved_stock,
            });
        }
        record.reserved_stock -= quantity;
        self.storage.put_stock_txn(txn, product_id, &record)?;
        Ok(record)
    }

    /// Convert a hold into a permanent deduction (payment succeeded).
    pub fn commit_txn(
        &self,
        txn: &WriteTransaction,
        product_id: &str,
        quantity: u32,
    ) -> StockResult<StockRecord> {
        let mut record = self.load(txn, product_id)?;
        if record.reserved_stock < quantity || record.total_stock < quantity {
            return Err(StockError::Underflow {
                product_id: product_id.to_string(),
                operation: "commit",
                quantity,
                reserved: record.reserved_stock,
            });
        }
        record.reserved_stock -= quantity;
        record.total_stock -= quantity;
        self.storage.put_stock_txn(txn, product_id, &record)?;
        Ok(record)
    }

    /// Administrative: set the total stock for a product, creating the
    /// counter row if needed. Reserved quantity is preserved.
    pub fn set_total_stock(&self, product_id: &str, total: u32) -> StockResult<StockRecord> {
        let txn = self.storage.begin_write()?;
        let mut record = self
            .storage
            .get_stock_txn(&txn, product_id)?
            .unwrap_or_default();
        record.total_stock = total;
        self.storage.put_stock_txn(&txn, product_id, &record)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(record)
    }

    /// Current counters for a product.
    pub fn get(&self, product_id: &str) -> StockResult<Option<StockRecord>> {
        Ok(self.storage.get_stock(product_id)?)
    }

    fn load(&self, txn: &WriteTransaction, product_id: &str) -> StockResult<StockRecord> {
        self.storage
            .get_stock_txn(txn, product_id)?
            .ok_or_else(|| StockError::UnknownProduct(product_id.to_string()))
    }
}

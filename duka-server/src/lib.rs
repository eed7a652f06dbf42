//! Duka Server - checkout-to-payment backend for a single-merchant shop
//!
//! Takes a cart through stock reservation, order creation, M-Pesa STK Push
//! initiation, and asynchronous callback reconciliation, with an append-only
//! transaction ledger as the audit trail.
//!
//! # Module structure
//!
//! ```text
//! duka-server/src/
//! ├── core/       # Config, state, background tasks, HTTP server
//! ├── api/        # HTTP routes and handlers
//! ├── store/      # redb persistence (orders, stock, ledger, queue)
//! ├── stock.rs    # Stock ledger (reserve / release / commit)
//! ├── catalog.rs  # Product catalog and delivery fees
//! ├── checkout.rs # Checkout engine
//! ├── payment/    # Gateway client and payment initiation
//! ├── reconcile/  # Callback reconciler, queue worker, timeout sweep
//! └── utils/      # Errors, logging, validation
//! ```

pub mod api;
pub mod catalog;
pub mod checkout;
pub mod core;
pub mod payment;
pub mod reconcile;
pub mod stock;
pub mod store;
pub mod utils;

pub use core::{Config, Server, ServerState};
pub use utils::{AppError, AppResult};
pub use utils::logger::{init_logger, init_logger_with_file};

pub fn print_banner() {
    println!(
        r#"
    ____        __
   / __ \__  __/ /______ _
  / / / / / / / //_/ __ `/
 / /_/ / /_/ / ,< / /_/ /
/_____/\__,_/_/|_|\__,_/
    "#
    );
}

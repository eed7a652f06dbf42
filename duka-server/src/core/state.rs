//! Shared application state
//!
//! Everything the HTTP handlers and background tasks need, cheaply cloneable.
//! Construction wires the storage, the stock ledger, the checkout engine, the
//! payment initiator, and the callback channel; the worker half of the channel
//! is parked here until `start_background_tasks` claims it.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{Mutex, mpsc};
use tracing::{error, info, warn};

use crate::catalog::{Catalog, CityRateTable, DeliveryEstimator, ProductInfo, StaticCatalog};
use crate::checkout::CheckoutEngine;
use crate::core::config::Config;
use crate::core::tasks::{BackgroundTasks, TaskKind};
use crate::payment::gateway::{DarajaClient, PaymentGateway};
use crate::payment::initiator::PaymentInitiator;
use crate::reconcile::reconciler::Reconciler;
use crate::reconcile::worker::CallbackWorker;
use crate::stock::StockLedger;
use crate::store::CheckoutStorage;
use crate::utils::{AppError, AppResult};

/// Capacity of the worker wake-up channel. Overflow is harmless: the queue
/// scan picks up anything a dropped notification would have covered.
const CALLBACK_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub storage: CheckoutStorage,
    pub stock: StockLedger,
    pub catalog: Arc<dyn Catalog>,
    pub checkout: Arc<CheckoutEngine>,
    pub initiator: Arc<PaymentInitiator>,
    /// Webhook handler side of the worker wake-up channel
    pub callback_tx: mpsc::Sender<String>,
    /// Worker side, claimed once by `start_background_tasks`
    callback_rx: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
}

impl ServerState {
    /// Production wiring: on-disk database, Daraja gateway.
    pub fn initialize(config: &Config) -> AppResult<Self> {
        std::fs::create_dir_all(&config.work_dir)
            .map_err(|e| AppError::internal(format!("cannot create work dir: {e}")))?;
        let storage = CheckoutStorage::open(config.database_path())?;

        let catalog = Arc::new(StaticCatalog::new());
        if !config.is_production() {
            seed_demo_catalog(&catalog, &StockLedger::new(storage.clone()));
        }

        let gateway = Arc::new(DarajaClient::new(config.mpesa.clone()));
        Ok(Self::with_components(
            config.clone(),
            storage,
            catalog,
            Arc::new(CityRateTable::kenyan_defaults()),
            gateway,
        ))
    }

    /// Explicit wiring, used by tests to substitute catalog and gateway.
    pub fn with_components(
        config: Config,
        storage: CheckoutStorage,
        catalog: Arc<dyn Catalog>,
        delivery: Arc<dyn DeliveryEstimator>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let stock = StockLedger::new(storage.clone());
        let checkout = Arc::new(CheckoutEngine::new(
            storage.clone(),
            stock.clone(),
            catalog.clone(),
            delivery,
        ));
        let initiator = Arc::new(PaymentInitiator::new(storage.clone(), gateway));
        let (callback_tx, callback_rx) = mpsc::channel(CALLBACK_CHANNEL_CAPACITY);

        Self {
            config: Arc::new(config),
            storage,
            stock,
            catalog,
            checkout,
            initiator,
            callback_tx,
            callback_rx: Arc::new(Mutex::new(Some(callback_rx))),
        }
    }

    /// Spawn the callback worker and the timeout sweep.
    pub async fn start_background_tasks(&self) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();

        match self.callback_rx.lock().await.take() {
            Some(rx) => {
                let worker = CallbackWorker::new(
                    self.storage.clone(),
                    Reconciler::new(self.storage.clone(), self.stock.clone()),
                    rx,
                );
                let token = tasks.shutdown_token();
                tasks.spawn("callback_worker", TaskKind::Worker, async move {
                    worker.run(token).await;
                });
            }
            None => warn!("callback worker already started"),
        }

        let reconciler = Reconciler::new(self.storage.clone(), self.stock.clone());
        let window = self.config.stk_timeout_secs;
        let period = Duration::from_secs(self.config.sweep_interval_secs);
        let token = tasks.shutdown_token();
        tasks.spawn("timeout_sweep", TaskKind::Periodic, async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match reconciler.sweep_stale_pending(window) {
                            Ok(0) => {}
                            Ok(n) => info!(count = n, "timed out stale pending payments"),
                            Err(e) => error!(error = %e, "timeout sweep failed"),
                        }
                    }
                }
            }
        });

        tasks
    }
}

/// Development-only product seed so the API is usable out of the box.
fn seed_demo_catalog(catalog: &StaticCatalog, stock: &StockLedger) {
    let demo = [
        ("brake-pads-toyota", "Toyota brake pad set", "BP-TY-01", 1200, Some(950), 40),
        ("alternator-nissan", "Nissan alternator", "ALT-NS-02", 3500, None, 8),
        ("oil-filter-subaru", "Subaru oil filter", "OF-SB-03", 450, None, 120),
    ];
    for (id, name, sku, price, discount, on_hand) in demo {
        catalog.insert(ProductInfo {
            product_id: id.to_string(),
            name: name.to_string(),
            sku: sku.to_string(),
            price: Decimal::new(price, 0),
            discount_price: discount.map(|d| Decimal::new(d, 0)),
            active: true,
        });
        // Only seed counters that do not exist yet; a restart must not undo
        // committed sales.
        match stock.get(id) {
            Ok(None) => {
                if let Err(e) = stock.set_total_stock(id, on_hand) {
                    error!(product_id = id, error = %e, "failed to seed demo stock");
                }
            }
            Ok(Some(_)) => {}
            Err(e) => error!(product_id = id, error = %e, "failed to read stock counter"),
        }
    }
    info!(products = demo.len(), "seeded demo catalog");
}

//! Durable callback queue worker
//!
//! The webhook handler only persists the callback and acknowledges the
//! gateway; this worker does the actual reconciliation. It wakes on a channel
//! notification for the fast path and scans the queue periodically for
//! anything missed (crash recovery, retry backoff). Entries that keep failing
//! move to the dead letter queue; dead letters are requeued once at startup.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shared::callback::CallbackEnvelope;
use shared::util::now_millis;

use crate::reconcile::reconciler::{ReconcileOutcome, Reconciler};
use crate::store::{CheckoutStorage, PendingCallback};

/// Attempts before an entry is dead-lettered.
const MAX_RETRY_COUNT: u32 = 3;

/// Backoff base; doubles per attempt.
const RETRY_BASE_DELAY_SECS: u64 = 5;

/// Backoff ceiling.
const RETRY_MAX_DELAY_SECS: u64 = 60;

/// Queue scan period.
const SCAN_INTERVAL_SECS: u64 = 10;

fn retry_delay_millis(retry_count: u32) -> i64 {
    let delay = RETRY_BASE_DELAY_SECS
        .saturating_mul(1u64 << retry_count.min(6))
        .min(RETRY_MAX_DELAY_SECS);
    (delay * 1000) as i64
}

pub struct CallbackWorker {
    storage: CheckoutStorage,
    reconciler: Reconciler,
    rx: mpsc::Receiver<String>,
}

impl CallbackWorker {
    pub fn new(storage: CheckoutStorage, reconciler: Reconciler, rx: mpsc::Receiver<String>) -> Self {
        Self {
            storage,
            reconciler,
            rx,
        }
    }

    pub async fn run(mut self, cancel_token: CancellationToken) {
        info!("Callback worker started");

        // Give previously dead-lettered callbacks one more chance after a
        // restart; an operator restart is the manual recovery action.
        match self.storage.recover_dead_letters() {
            Ok(0) => {}
            Ok(n) => info!(count = n, "requeued dead-lettered callbacks"),
            Err(e) => error!(error = %e, "dead letter recovery failed"),
        }

        let mut scan = interval(Duration::from_secs(SCAN_INTERVAL_SECS));

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Callback worker stopped");
                    break;
                }
                notified = self.rx.recv() => {
                    match notified {
                        Some(correlation_id) => self.process_one(&correlation_id).await,
                        None => {
                            info!("Callback channel closed, worker exiting");
                            break;
                        }
                    }
                }
                _ = scan.tick() => {
                    self.scan_queue().await;
                }
            }
        }
    }

    /// Process every queued entry whose backoff has elapsed.
    async fn scan_queue(&self) {
        let pending = match self.storage.get_pending_callbacks() {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "queue scan failed");
                return;
            }
        };

        let now = now_millis();
        for entry in pending {
            if !Self::is_due(&entry, now) {
                continue;
            }
            self.process_one(&entry.checkout_request_id).await;
        }
    }

    fn is_due(entry: &PendingCallback, now: i64) -> bool {
        match entry.last_attempt_at {
            Some(last) => now >= last + retry_delay_millis(entry.retry_count),
            None => true,
        }
    }

    async fn process_one(&self, correlation_id: &str) {
        let entry = match self.storage.get_pending_callback(correlation_id) {
            Ok(Some(entry)) => entry,
            // Already drained by an earlier notification or scan pass.
            Ok(None) => return,
            Err(e) => {
                error!(correlation_id, error = %e, "failed to load queued callback");
                return;
            }
        };

        let callback = match serde_json::from_value::<CallbackEnvelope>(entry.payload.clone()) {
            Ok(envelope) => envelope.body.stk_callback,
            Err(e) => {
                // Never parseable, never retryable.
                warn!(correlation_id, error = %e, "unparseable callback payload");
                self.dead_letter(correlation_id, &format!("unparseable payload: {e}"));
                return;
            }
        };

        match self.reconciler.process(&callback, &entry.payload) {
            Ok(ReconcileOutcome::UnknownCorrelation) => {
                warn!(correlation_id, "callback matches no order");
                self.dead_letter(correlation_id, "unknown checkout request id");
            }
            Ok(_) => {}
            Err(e) => {
                let attempts = entry.retry_count + 1;
                if attempts >= MAX_RETRY_COUNT {
                    error!(
                        correlation_id,
                        attempts,
                        error = %e,
                        "callback processing failed permanently"
                    );
                    self.dead_letter(correlation_id, &e.to_string());
                } else {
                    warn!(correlation_id, attempts, error = %e, "callback processing failed, will retry");
                    if let Err(mark_err) =
                        self.storage.mark_callback_failed(correlation_id, &e.to_string())
                    {
                        error!(correlation_id, error = %mark_err, "failed to record retry attempt");
                    }
                }
            }
        }
    }

    fn dead_letter(&self, correlation_id: &str, reason: &str) {
        if let Err(e) = self.storage.move_to_dead_letter(correlation_id, reason) {
            error!(correlation_id, error = %e, "failed to dead-letter callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(retry_count: u32, last_attempt_at: Option<i64>) -> PendingCallback {
        PendingCallback {
            checkout_request_id: "cr-1".to_string(),
            payload: serde_json::json!({}),
            created_at: 0,
            retry_count,
            last_attempt_at,
            last_error: None,
        }
    }

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        assert_eq!(retry_delay_millis(0), 5_000);
        assert_eq!(retry_delay_millis(1), 10_000);
        assert_eq!(retry_delay_millis(2), 20_000);
        assert_eq!(retry_delay_millis(4), 60_000);
        assert_eq!(retry_delay_millis(30), 60_000);
    }

    #[test]
    fn test_due_check_respects_backoff() {
        // Never attempted: due immediately.
        assert!(CallbackWorker::is_due(&entry(0, None), 0));
        // Attempted just now with one failure: not due for 10s.
        assert!(!CallbackWorker::is_due(&entry(1, Some(100_000)), 105_000));
        assert!(CallbackWorker::is_due(&entry(1, Some(100_000)), 110_000));
    }
}

//! Payment initiation flow
//!
//! Validates the order state and phone number, asks the gateway to queue the
//! STK prompt, then records the acceptance: correlation ids, the
//! `unpaid/failed -> pending` transition, and a ledger entry, all in one
//! write transaction. A gateway rejection leaves the order untouched apart
//! from an audit entry.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use shared::ledger::{TransactionEntry, TransactionKind};
use shared::order::{Order, PaymentStatus};
use shared::util::now_millis;

use crate::payment::gateway::{GatewayError, PaymentGateway, StkPushAcceptance, StkPushRequest};
use crate::store::{CheckoutStorage, StorageError};
use crate::utils::validation::normalize_msisdn;
use crate::utils::{AppError, AppResult};

pub struct PaymentInitiator {
    storage: CheckoutStorage,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentInitiator {
    pub fn new(storage: CheckoutStorage, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { storage, gateway }
    }

    /// Send an STK push for an order and record the acceptance.
    ///
    /// Initiation is allowed from `unpaid` (first attempt) and `failed`
    /// (retry). A `pending` order has a prompt already in flight and a
    /// `paid` order has nothing left to pay; both are conflicts.
    pub async fn initiate(&self, order_number: &str, phone: &str) -> AppResult<StkPushAcceptance> {
        let order = self
            .storage
            .get_order(order_number)?
            .ok_or_else(|| AppError::not_found(format!("order {order_number} not found")))?;

        match order.payment_status {
            PaymentStatus::Unpaid | PaymentStatus::Failed => {}
            PaymentStatus::Pending => {
                return Err(AppError::Conflict(format!(
                    "payment for order {order_number} is already in progress"
                )));
            }
            PaymentStatus::Paid | PaymentStatus::Refunded => {
                return Err(AppError::Conflict(format!(
                    "order {order_number} is already settled"
                )));
            }
        }

        let msisdn = normalize_msisdn(phone).ok_or_else(|| {
            AppError::validation("phone_number", "not a valid Kenyan mobile number")
        })?;

        let request = StkPushRequest {
            phone_number: msisdn.clone(),
            amount: order.total,
            account_reference: order.order_number.clone(),
            transaction_desc: format!("Payment for order {}", order.order_number),
        };

        match self.gateway.stk_push(&request).await {
            Ok(acceptance) => {
                self.record_acceptance(&order, &msisdn, &acceptance)?;
                info!(
                    order_number = %order.order_number,
                    checkout_request_id = %acceptance.checkout_request_id,
                    "STK push accepted"
                );
                Ok(acceptance)
            }
            Err(err) => {
                warn!(order_number = %order.order_number, error = %err, "STK push failed");
                self.record_initiation_failure(&order, &msisdn, &err)?;
                Err(AppError::Gateway(err.to_string()))
            }
        }
    }

    /// One transaction: correlation ids on the order, the payment transition
    /// to `pending`, and the `stk_initiated` ledger entry.
    fn record_acceptance(
        &self,
        order: &Order,
        msisdn: &str,
        acceptance: &StkPushAcceptance,
    ) -> AppResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.set_order_correlation(
            &txn,
            &order.order_number,
            &acceptance.merchant_request_id,
            &acceptance.checkout_request_id,
        )?;
        self.storage
            .apply_payment_transition(&txn, &order.order_number, PaymentStatus::Pending, None)?;
        self.storage.append_ledger(
            &txn,
            TransactionEntry {
                log_id: Uuid::new_v4().to_string(),
                seq: 0,
                order_number: order.order_number.clone(),
                kind: TransactionKind::StkInitiated,
                merchant_request_id: Some(acceptance.merchant_request_id.clone()),
                checkout_request_id: Some(acceptance.checkout_request_id.clone()),
                phone_number: Some(msisdn.to_string()),
                amount: order.total,
                result_code: None,
                result_desc: None,
                receipt_number: None,
                raw_payload: None,
                created_at: now_millis(),
            },
        )?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }

    /// Audit entry for a rejected initiation. The order keeps its current
    /// payment status so the customer can retry.
    fn record_initiation_failure(
        &self,
        order: &Order,
        msisdn: &str,
        err: &GatewayError,
    ) -> AppResult<()> {
        let txn = self.storage.begin_write()?;
        self.storage.append_ledger(
            &txn,
            TransactionEntry {
                log_id: Uuid::new_v4().to_string(),
                seq: 0,
                order_number: order.order_number.clone(),
                kind: TransactionKind::PaymentFailed,
                merchant_request_id: None,
                checkout_request_id: None,
                phone_number: Some(msisdn.to_string()),
                amount: order.total,
                result_code: None,
                result_desc: Some(format!("initiation failed: {err}")),
                receipt_number: None,
                raw_payload: None,
                created_at: now_millis(),
            },
        )?;
        txn.commit().map_err(StorageError::from)?;
        Ok(())
    }
}

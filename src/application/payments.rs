use super::locking::{payment_create_key, payment_key, with_lock};
use crate::config::{GatewaySettings, LockPolicy};
use crate::domain::money::Money;
use crate::domain::page::{Page, Pagination};
use crate::domain::payment::{
    ChargeCustomer, ChargeItem, ChargeRequest, GatewayReport, PaymentFilter, PaymentSource,
    PaymentStatus, PaymentStatusLog, PaymentTransaction, PaymentWebhookLog, verify_notification,
};
use crate::domain::ports::{
    LockerRef, OrderStatusNotifierRef, PaymentConfirmed, PaymentGatewayRef, PaymentStoreRef,
};
use crate::error::{AppError, Result};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

pub const ADJUSTMENT_ITEM_ID: &str = "ADJUSTMENT";
const ORDER_ITEM_ID: &str = "ORDER";

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub payment_order_id: String,
    pub gross_amount: Decimal,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub items: Vec<ChargeItem>,
    #[serde(default)]
    pub customer: Option<ChargeCustomer>,
    #[serde(default)]
    pub enabled_payments: Vec<String>,
    #[serde(default)]
    pub expiry_minutes: Option<u32>,
}

/// Per-transaction outcome of a reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepOutcome {
    pub payment_order_id: String,
    pub status: Option<PaymentStatus>,
    pub error: Option<String>,
}

/// Makes the item list add up to the gross amount the gateway will charge.
pub fn normalize_items(items: Vec<ChargeItem>, gross: Money) -> Result<Vec<ChargeItem>> {
    let whole_order = |name: &str| ChargeItem {
        id: ORDER_ITEM_ID.to_string(),
        name: name.to_string(),
        price: gross,
        quantity: 1,
    };

    if items.is_empty() {
        return Ok(vec![whole_order("Laundry order")]);
    }
    let sum = items
        .iter()
        .try_fold(Money::ZERO, |acc, item| acc.checked_add(item.total()?))?;
    if sum == gross {
        return Ok(items);
    }

    if let [only] = items.as_slice() {
        return Ok(vec![ChargeItem {
            price: gross,
            quantity: 1,
            ..only.clone()
        }]);
    }
    if sum < gross {
        let mut items = items;
        items.push(ChargeItem {
            id: ADJUSTMENT_ITEM_ID.to_string(),
            name: "Adjustment".to_string(),
            price: gross.checked_sub(sum)?,
            quantity: 1,
        });
        return Ok(items);
    }
    Ok(vec![whole_order("Laundry order")])
}

/// Intersects requested methods with the configured allow-list.
pub fn resolve_enabled_payments(requested: &[String], allowed: &[String]) -> Vec<String> {
    if allowed.is_empty() {
        return requested.to_vec();
    }
    let picked: Vec<String> = requested
        .iter()
        .filter(|m| allowed.contains(m))
        .cloned()
        .collect();
    if picked.is_empty() {
        allowed.to_vec()
    } else {
        picked
    }
}

/// Creates gateway transactions and reconciles their status.
///
/// Status always comes from [`PaymentStatus::from_gateway`]. Webhooks and
/// status checks for one payment order share a lease, so merges never
/// interleave.
pub struct PaymentEngine {
    payments: PaymentStoreRef,
    gateway: PaymentGatewayRef,
    notifier: OrderStatusNotifierRef,
    locker: LockerRef,
    policy: LockPolicy,
    settings: GatewaySettings,
}

impl PaymentEngine {
    /// Creates a new `PaymentEngine`.
    ///
    /// # Arguments
    ///
    /// * `payments` - Persistence for transactions, status logs and webhook logs.
    /// * `gateway` - The payment gateway client.
    /// * `notifier` - Told about payments that newly succeed; failures are only logged.
    /// * `locker` - Lease coordinator keyed per payment order id.
    /// * `policy` - Lease lifetime for guarded sections.
    /// * `settings` - Server key for webhook signatures and the payment method allow-list.
    pub fn new(
        payments: PaymentStoreRef,
        gateway: PaymentGatewayRef,
        notifier: OrderStatusNotifierRef,
        locker: LockerRef,
        policy: LockPolicy,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            payments,
            gateway,
            notifier,
            locker,
            policy,
            settings,
        }
    }

    /// Opens a gateway transaction, or returns the live one for this payment order id.
    #[instrument(skip_all, fields(payment_order_id = %request.payment_order_id))]
    pub async fn create_snap_token(&self, request: CreatePaymentRequest) -> Result<PaymentTransaction> {
        if request.payment_order_id.trim().is_empty() {
            return Err(AppError::validation("payment_order_id is required"));
        }
        if request.gross_amount <= Decimal::ZERO {
            return Err(AppError::validation("Gross amount must be greater than 0"));
        }
        let key = payment_create_key(&request.payment_order_id);
        with_lock(self.locker.as_ref(), &key, self.policy.ttl, || {
            self.create_locked(request)
        })
        .await
    }

    async fn create_locked(&self, request: CreatePaymentRequest) -> Result<PaymentTransaction> {
        if let Some(existing) = self
            .payments
            .find_by_payment_order_id(&request.payment_order_id)
            .await?
        {
            if existing.status == PaymentStatus::Pending && existing.snap_token.is_some() {
                info!("reusing pending transaction");
                return Ok(existing);
            }
            return Err(AppError::validation(format!(
                "Payment order id {} is already used",
                request.payment_order_id
            )));
        }

        let gross = Money::new(request.gross_amount);
        let charge = ChargeRequest {
            payment_order_id: request.payment_order_id.clone(),
            gross_amount: gross,
            items: normalize_items(request.items, gross)?,
            customer: request.customer,
            enabled_payments: resolve_enabled_payments(
                &request.enabled_payments,
                &self.settings.enabled_payments,
            ),
            expiry_minutes: request.expiry_minutes,
        };
        let token = self.gateway.create_transaction(&charge).await?;

        let now = Utc::now();
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            payment_order_id: request.payment_order_id,
            payment_method: request.payment_method,
            payment_type: None,
            gross_amount: gross,
            status: PaymentStatus::Pending,
            transaction_id: None,
            fraud_status: None,
            snap_token: Some(token.token.clone()),
            snap_redirect_url: Some(token.redirect_url.clone()),
            va_number: None,
            biller_code: None,
            bill_key: None,
            expiry_time: request
                .expiry_minutes
                .map(|m| now + Duration::minutes(i64::from(m))),
            settlement_time: None,
            transaction_time: None,
            request_payload: Some(serde_json::to_value(&charge)?),
            response_payload: Some(serde_json::to_value(&token)?),
            created_at: now,
            updated_at: now,
        };

        let mut unit = self.payments.begin();
        unit.save_transaction(tx.clone());
        unit.append_status_log(PaymentStatusLog::new(
            &tx,
            None,
            PaymentSource::ApiCreate,
            Some("Snap token created".to_string()),
            None,
        ));
        unit.commit().await?;

        info!(order_id = %tx.order_id, gross_amount = %gross, "payment transaction created");
        Ok(tx)
    }

    /// Pulls the gateway's view and merges it. Repeated calls are no-ops once stable.
    #[instrument(skip(self))]
    pub async fn check_status(&self, payment_order_id: &str) -> Result<PaymentTransaction> {
        with_lock(
            self.locker.as_ref(),
            &payment_key(payment_order_id),
            self.policy.ttl,
            || self.check_locked(payment_order_id),
        )
        .await
    }

    async fn check_locked(&self, payment_order_id: &str) -> Result<PaymentTransaction> {
        let mut tx = self.get_by_payment_order_id(payment_order_id).await?;
        let report = self.gateway.query_status(payment_order_id).await?;

        let merge = tx.merge_report(&report, Utc::now());
        if !merge.changed() {
            return Ok(tx);
        }

        let mut unit = self.payments.begin();
        unit.save_transaction(tx.clone());
        if merge.status_changed() {
            unit.append_status_log(PaymentStatusLog::new(
                &tx,
                Some(merge.previous),
                PaymentSource::ApiCheck,
                report.status_message.clone(),
                Some(serde_json::to_value(&report)?),
            ));
        }
        unit.commit().await?;

        if merge.status_changed() {
            info!(from = %merge.previous, to = %merge.current, "payment status reconciled");
        }
        if merge.became_successful() {
            self.notify_success(&tx, "Payment confirmed via status check")
                .await;
        }
        Ok(tx)
    }

    /// Handles a gateway notification. The raw payload is logged before any
    /// rejection, and rejected notifications never touch the transaction.
    #[instrument(skip_all)]
    pub async fn process_webhook(&self, payload: serde_json::Value) -> Result<PaymentTransaction> {
        let report: GatewayReport = match serde_json::from_value(payload.clone()) {
            Ok(report) => report,
            Err(e) => {
                let mut log = PaymentWebhookLog::received(&GatewayReport::default(), payload, false);
                log.processing_error = Some(format!("Malformed payload: {e}"));
                self.persist_webhook_log(log).await?;
                return Err(AppError::validation("Malformed webhook payload"));
            }
        };

        let verified = verify_notification(&report, &self.settings.server_key);
        let mut log = PaymentWebhookLog::received(&report, payload.clone(), verified);
        if !verified {
            log.processing_error = Some("Invalid signature".to_string());
        }
        self.persist_webhook_log(log.clone()).await?;

        if !verified {
            warn!(payment_order_id = %log.payment_order_id, "webhook signature rejected");
            return Err(AppError::Unauthorized("Invalid signature".to_string()));
        }

        let payment_order_id = log.payment_order_id.clone();
        let outcome = with_lock(
            self.locker.as_ref(),
            &payment_key(&payment_order_id),
            self.policy.ttl,
            || self.merge_webhook(&report, &payload, log.clone()),
        )
        .await;

        if let Err(e) = &outcome {
            let mut failed = log;
            failed.processing_error = Some(e.to_string());
            if let Err(log_err) = self.persist_webhook_log(failed).await {
                error!(error = %log_err, "failed to record webhook processing error");
            }
        }
        outcome
    }

    async fn merge_webhook(
        &self,
        report: &GatewayReport,
        payload: &serde_json::Value,
        mut log: PaymentWebhookLog,
    ) -> Result<PaymentTransaction> {
        let Some(mut tx) = self
            .payments
            .find_by_payment_order_id(&log.payment_order_id)
            .await?
        else {
            warn!(payment_order_id = %log.payment_order_id, "webhook for unknown transaction");
            return Err(AppError::not_found("Payment transaction"));
        };

        let now = Utc::now();
        let merge = tx.merge_report(report, now);
        log.payment_transaction_id = Some(tx.id);
        log.processed_at = Some(now);

        let mut unit = self.payments.begin();
        if merge.changed() {
            unit.save_transaction(tx.clone());
        }
        if merge.status_changed() {
            unit.append_status_log(PaymentStatusLog::new(
                &tx,
                Some(merge.previous),
                PaymentSource::Webhook,
                report.status_message.clone(),
                Some(payload.clone()),
            ));
        }
        unit.save_webhook_log(log);
        unit.commit().await?;

        if merge.status_changed() {
            info!(
                payment_order_id = %tx.payment_order_id,
                from = %merge.previous,
                to = %merge.current,
                "payment status updated from webhook"
            );
        }
        if merge.became_successful() {
            self.notify_success(&tx, "Payment confirmed via webhook").await;
        }
        Ok(tx)
    }

    async fn persist_webhook_log(&self, log: PaymentWebhookLog) -> Result<()> {
        let mut unit = self.payments.begin();
        unit.save_webhook_log(log);
        unit.commit().await
    }

    /// Best-effort: a failed notification is logged and never undoes the payment.
    async fn notify_success(&self, tx: &PaymentTransaction, note: &str) {
        let event = PaymentConfirmed {
            order_id: tx.order_id,
            payment_order_id: tx.payment_order_id.clone(),
            note: note.to_string(),
        };
        if let Err(e) = self.notifier.payment_confirmed(&event).await {
            warn!(
                order_id = %tx.order_id,
                payment_order_id = %tx.payment_order_id,
                error = %e,
                "order notification failed, payment state kept"
            );
        }
    }

    /// Runs [`Self::check_status`] over up to `limit` pending transactions.
    ///
    /// Failures are collected per transaction; one bad row does not stop the sweep.
    pub async fn sweep_pending(&self, limit: usize) -> Result<Vec<SweepOutcome>> {
        let filter = PaymentFilter {
            status: Some(PaymentStatus::Pending),
            ..Default::default()
        };
        let pending = self.payments.list(&filter, Pagination::new(1, limit)).await?;

        let mut outcomes = Vec::with_capacity(pending.items.len());
        for tx in pending.items {
            let outcome = match self.check_status(&tx.payment_order_id).await {
                Ok(updated) => SweepOutcome {
                    payment_order_id: tx.payment_order_id,
                    status: Some(updated.status),
                    error: None,
                },
                Err(e) => SweepOutcome {
                    payment_order_id: tx.payment_order_id,
                    status: None,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    pub async fn get_by_payment_order_id(&self, payment_order_id: &str) -> Result<PaymentTransaction> {
        self.payments
            .find_by_payment_order_id(payment_order_id)
            .await?
            .ok_or_else(|| AppError::not_found("Payment transaction"))
    }

    /// Most recent transaction for an order.
    pub async fn latest_for_order(&self, order_id: Uuid) -> Result<PaymentTransaction> {
        self.payments
            .list_by_order(order_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("Payment transaction"))
    }

    pub async fn history_for_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>> {
        self.payments.list_by_order(order_id).await
    }

    pub async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: Pagination,
    ) -> Result<Page<PaymentTransaction>> {
        self.payments.list(filter, pagination).await
    }

    pub async fn status_logs(&self, payment_order_id: &str) -> Result<Vec<PaymentStatusLog>> {
        let tx = self.get_by_payment_order_id(payment_order_id).await?;
        self.payments.status_logs(tx.id).await
    }

    pub async fn webhook_logs(&self, payment_order_id: &str) -> Result<Vec<PaymentWebhookLog>> {
        self.payments.webhook_logs(payment_order_id).await
    }
}

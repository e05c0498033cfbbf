use super::catalog::{Addon, Customer, PriceKey, Service, ServicePrice};
use super::order::{Order, OrderFilter, OrderStatusLog};
use super::page::{Page, Pagination};
use super::payment::{
    ChargeRequest, ChargeToken, GatewayReport, PaymentFilter, PaymentStatusLog,
    PaymentTransaction, PaymentWebhookLog,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Read access to services, addons and the time-versioned price table.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_service(&self, id: Uuid) -> Result<Option<Service>>;
    async fn find_addon(&self, id: Uuid) -> Result<Option<Addon>>;
    /// The most recently started row for exactly `key` whose window contains `date`.
    async fn find_price(&self, key: &PriceKey, date: NaiveDate) -> Result<Option<ServicePrice>>;
}

#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>>;
}

/// Writes staged against an order store, applied all-or-nothing on `commit`.
/// Dropping a unit without committing discards every staged write.
#[async_trait]
pub trait OrderUnit: Send {
    /// Inserts or fully replaces an order, items included.
    fn save_order(&mut self, order: Order);
    fn append_status_log(&mut self, log: OrderStatusLog);
    fn delete_order(&mut self, id: Uuid);
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Opens a transaction-scoped unit bound to this store.
    fn begin(&self) -> Box<dyn OrderUnit>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>>;
    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>>;
    async fn list(&self, filter: &OrderFilter, pagination: Pagination) -> Result<Page<Order>>;
    /// All status logs for an order, oldest first.
    async fn status_logs(&self, order_id: Uuid) -> Result<Vec<OrderStatusLog>>;
}

#[async_trait]
pub trait PaymentUnit: Send {
    fn save_transaction(&mut self, tx: PaymentTransaction);
    fn append_status_log(&mut self, log: PaymentStatusLog);
    /// Inserts or replaces a webhook log row by id.
    fn save_webhook_log(&mut self, log: PaymentWebhookLog);
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    fn begin(&self) -> Box<dyn PaymentUnit>;
    async fn find_by_payment_order_id(
        &self,
        payment_order_id: &str,
    ) -> Result<Option<PaymentTransaction>>;
    /// Transactions for one order, newest first.
    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>>;
    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: Pagination,
    ) -> Result<Page<PaymentTransaction>>;
    async fn status_logs(&self, transaction_id: Uuid) -> Result<Vec<PaymentStatusLog>>;
    async fn webhook_logs(&self, payment_order_id: &str) -> Result<Vec<PaymentWebhookLog>>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(&self, request: &ChargeRequest) -> Result<ChargeToken>;
    async fn query_status(&self, payment_order_id: &str) -> Result<GatewayReport>;
}

/// Sent to the order subsystem once a payment settles successfully.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentConfirmed {
    pub order_id: Uuid,
    pub payment_order_id: String,
    pub note: String,
}

#[async_trait]
pub trait OrderStatusNotifier: Send + Sync {
    async fn payment_confirmed(&self, event: &PaymentConfirmed) -> Result<()>;
}

/// A held lease. Releasing is best-effort; the lease expires on its own otherwise.
#[async_trait]
pub trait Lease: Send {
    fn key(&self) -> &str;
    async fn release(self: Box<Self>) -> Result<()>;
}

/// Grants short-lived, exclusive, named leases.
#[async_trait]
pub trait Locker: Send + Sync {
    /// `Ok(None)` means another holder has the key. `Err` means the
    /// coordinator itself could not be reached.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<Box<dyn Lease>>>;
}

pub type CatalogStoreRef = Arc<dyn CatalogStore>;
pub type CustomerStoreRef = Arc<dyn CustomerStore>;
pub type OrderStoreRef = Arc<dyn OrderStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type OrderStatusNotifierRef = Arc<dyn OrderStatusNotifier>;
pub type LockerRef = Arc<dyn Locker>;

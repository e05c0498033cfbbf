use crate::domain::catalog::{
    Addon, Customer, PriceKey, Service, ServicePrice, latest_effective,
};
use crate::domain::order::{Order, OrderFilter, OrderStatusLog};
use crate::domain::page::{Page, Pagination};
use crate::domain::payment::{
    PaymentFilter, PaymentStatusLog, PaymentTransaction, PaymentWebhookLog,
};
use crate::domain::ports::{
    CatalogStore, CustomerStore, OrderStore, OrderUnit, PaymentStore, PaymentUnit,
};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct CatalogState {
    services: HashMap<Uuid, Service>,
    addons: HashMap<Uuid, Addon>,
    prices: Vec<ServicePrice>,
    customers: HashMap<Uuid, Customer>,
}

/// A thread-safe in-memory catalog and customer directory.
///
/// Price rows keep insertion order, so among rows with the same start date
/// the one inserted last wins.
#[derive(Default, Clone)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_service(&self, service: Service) {
        self.state.write().await.services.insert(service.id, service);
    }

    pub async fn insert_addon(&self, addon: Addon) {
        self.state.write().await.addons.insert(addon.id, addon);
    }

    pub async fn insert_price(&self, price: ServicePrice) {
        self.state.write().await.prices.push(price);
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.state
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn find_service(&self, id: Uuid) -> Result<Option<Service>> {
        Ok(self.state.read().await.services.get(&id).cloned())
    }

    async fn find_addon(&self, id: Uuid) -> Result<Option<Addon>> {
        Ok(self.state.read().await.addons.get(&id).cloned())
    }

    async fn find_price(&self, key: &PriceKey, date: NaiveDate) -> Result<Option<ServicePrice>> {
        let state = self.state.read().await;
        Ok(latest_effective(&state.prices, key, date).cloned())
    }
}

#[async_trait]
impl CustomerStore for InMemoryCatalog {
    async fn find_customer(&self, id: Uuid) -> Result<Option<Customer>> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }
}

#[derive(Default)]
struct OrderState {
    orders: HashMap<Uuid, Order>,
    order_numbers: HashMap<String, Uuid>,
    status_logs: Vec<OrderStatusLog>,
}

enum OrderWrite {
    Save(Order),
    Log(OrderStatusLog),
    Delete(Uuid),
}

/// Orders and their status logs held in memory.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InMemoryOrderUnit {
    state: Arc<RwLock<OrderState>>,
    writes: Vec<OrderWrite>,
}

#[async_trait]
impl OrderUnit for InMemoryOrderUnit {
    fn save_order(&mut self, order: Order) {
        self.writes.push(OrderWrite::Save(order));
    }

    fn append_status_log(&mut self, log: OrderStatusLog) {
        self.writes.push(OrderWrite::Log(log));
    }

    fn delete_order(&mut self, id: Uuid) {
        self.writes.push(OrderWrite::Delete(id));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { state, writes } = *self;
        let mut guard = state.write().await;
        let state = &mut *guard;

        // Validate everything before touching state so a failure applies nothing.
        for write in &writes {
            if let OrderWrite::Save(order) = write
                && let Some(owner) = state.order_numbers.get(&order.order_no)
                && *owner != order.id
            {
                return Err(AppError::storage(
                    format!("Duplicate order number {}", order.order_no),
                    "unique constraint violated",
                ));
            }
        }

        for write in writes {
            match write {
                OrderWrite::Save(order) => {
                    if let Some(previous) = state.orders.get(&order.id)
                        && previous.order_no != order.order_no
                    {
                        let stale = previous.order_no.clone();
                        state.order_numbers.remove(&stale);
                    }
                    state.order_numbers.insert(order.order_no.clone(), order.id);
                    state.orders.insert(order.id, order);
                }
                OrderWrite::Log(log) => state.status_logs.push(log),
                OrderWrite::Delete(id) => {
                    if let Some(order) = state.orders.remove(&id) {
                        state.order_numbers.remove(&order.order_no);
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    fn begin(&self) -> Box<dyn OrderUnit> {
        Box::new(InMemoryOrderUnit {
            state: Arc::clone(&self.state),
            writes: Vec::new(),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .order_numbers
            .get(order_no)
            .and_then(|id| state.orders.get(id))
            .cloned())
    }

    async fn list(&self, filter: &OrderFilter, pagination: Pagination) -> Result<Page<Order>> {
        let mut rows: Vec<Order> = {
            let state = self.state.read().await;
            state
                .orders
                .values()
                .filter(|o| filter.matches(o))
                .cloned()
                .collect()
        };
        filter.sort(&mut rows);
        Ok(pagination.paginate(rows))
    }

    async fn status_logs(&self, order_id: Uuid) -> Result<Vec<OrderStatusLog>> {
        let state = self.state.read().await;
        let mut logs: Vec<_> = state
            .status_logs
            .iter()
            .filter(|l| l.order_id == order_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.changed_at);
        Ok(logs)
    }
}

#[derive(Default)]
struct PaymentState {
    transactions: HashMap<String, PaymentTransaction>,
    status_logs: Vec<PaymentStatusLog>,
    webhook_logs: Vec<PaymentWebhookLog>,
}

enum PaymentWrite {
    Transaction(PaymentTransaction),
    StatusLog(PaymentStatusLog),
    WebhookLog(PaymentWebhookLog),
}

/// Payment transactions with their status and webhook logs, held in memory.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct InMemoryPaymentUnit {
    state: Arc<RwLock<PaymentState>>,
    writes: Vec<PaymentWrite>,
}

#[async_trait]
impl PaymentUnit for InMemoryPaymentUnit {
    fn save_transaction(&mut self, tx: PaymentTransaction) {
        self.writes.push(PaymentWrite::Transaction(tx));
    }

    fn append_status_log(&mut self, log: PaymentStatusLog) {
        self.writes.push(PaymentWrite::StatusLog(log));
    }

    fn save_webhook_log(&mut self, log: PaymentWebhookLog) {
        self.writes.push(PaymentWrite::WebhookLog(log));
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { state, writes } = *self;
        let mut guard = state.write().await;
        let state = &mut *guard;

        for write in &writes {
            if let PaymentWrite::Transaction(tx) = write
                && let Some(existing) = state.transactions.get(&tx.payment_order_id)
                && existing.id != tx.id
            {
                return Err(AppError::storage(
                    format!("Duplicate payment order id {}", tx.payment_order_id),
                    "unique constraint violated",
                ));
            }
        }

        for write in writes {
            match write {
                PaymentWrite::Transaction(tx) => {
                    state.transactions.insert(tx.payment_order_id.clone(), tx);
                }
                PaymentWrite::StatusLog(log) => state.status_logs.push(log),
                PaymentWrite::WebhookLog(log) => {
                    match state.webhook_logs.iter_mut().find(|l| l.id == log.id) {
                        Some(slot) => *slot = log,
                        None => state.webhook_logs.push(log),
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    fn begin(&self) -> Box<dyn PaymentUnit> {
        Box::new(InMemoryPaymentUnit {
            state: Arc::clone(&self.state),
            writes: Vec::new(),
        })
    }

    async fn find_by_payment_order_id(
        &self,
        payment_order_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .get(payment_order_id)
            .cloned())
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .transactions
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: Pagination,
    ) -> Result<Page<PaymentTransaction>> {
        let mut rows: Vec<_> = {
            let state = self.state.read().await;
            state
                .transactions
                .values()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect()
        };
        filter.sort(&mut rows);
        Ok(pagination.paginate(rows))
    }

    async fn status_logs(&self, transaction_id: Uuid) -> Result<Vec<PaymentStatusLog>> {
        let state = self.state.read().await;
        Ok(state
            .status_logs
            .iter()
            .filter(|l| l.transaction_id == transaction_id)
            .cloned()
            .collect())
    }

    async fn webhook_logs(&self, payment_order_id: &str) -> Result<Vec<PaymentWebhookLog>> {
        let state = self.state.read().await;
        Ok(state
            .webhook_logs
            .iter()
            .filter(|l| l.payment_order_id == payment_order_id)
            .cloned()
            .collect())
    }
}

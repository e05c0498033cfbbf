use crate::domain::order::{Order, OrderFilter, OrderStatusLog};
use crate::domain::page::{Page, Pagination};
use crate::domain::payment::{
    PaymentFilter, PaymentStatusLog, PaymentTransaction, PaymentWebhookLog,
};
use crate::domain::ports::{OrderStore, OrderUnit, PaymentStore, PaymentUnit};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_ORDERS: &str = "orders";
pub const CF_ORDER_NUMBERS: &str = "order_numbers";
pub const CF_ORDER_STATUS_LOGS: &str = "order_status_logs";
pub const CF_PAYMENTS: &str = "payments";
pub const CF_PAYMENT_STATUS_LOGS: &str = "payment_status_logs";
pub const CF_WEBHOOK_LOGS: &str = "webhook_logs";

const COLUMN_FAMILIES: [&str; 6] = [
    CF_ORDERS,
    CF_ORDER_NUMBERS,
    CF_ORDER_STATUS_LOGS,
    CF_PAYMENTS,
    CF_PAYMENT_STATUS_LOGS,
    CF_WEBHOOK_LOGS,
];

/// Persistent order and payment storage on RocksDB.
///
/// Each entity kind lives in its own column family. Log keys are prefixed by
/// their parent id and a timestamp, so a prefix scan returns them in order.
/// Units commit through a single `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    commit_guard: Arc<Mutex<()>>,
}

fn handle<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily> {
    db.cf_handle(name).ok_or_else(|| {
        AppError::storage(
            format!("Column family {name} not found"),
            std::io::Error::other("missing column family"),
        )
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn timestamp_key(at: DateTime<Utc>) -> [u8; 8] {
    let nanos = at.timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
    nanos.to_be_bytes()
}

fn log_key(parent: &[u8], at: DateTime<Utc>, id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(parent.len() + 1 + 8 + 16);
    key.extend_from_slice(parent);
    key.push(0);
    key.extend_from_slice(&timestamp_key(at));
    key.extend_from_slice(id.as_bytes());
    key
}

fn log_prefix(parent: &[u8]) -> Vec<u8> {
    let mut prefix = parent.to_vec();
    prefix.push(0);
    prefix
}

impl RocksDBStore {
    /// Opens or creates a database at `path`.
    ///
    /// Ensures the order, order-number index, payment and log column families exist.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            commit_guard: Arc::new(Mutex::new(())),
        })
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = handle(&self.db, cf)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = handle(&self.db, cf)?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }

    fn scan_prefix<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<T>> {
        let cf = handle(&self.db, cf)?;
        let mut rows = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            rows.push(decode(&value)?);
        }
        Ok(rows)
    }
}

enum OrderWrite {
    Save(Order),
    Log(OrderStatusLog),
    Delete(Uuid),
}

struct RocksOrderUnit {
    store: RocksDBStore,
    writes: Vec<OrderWrite>,
}

#[async_trait]
impl OrderUnit for RocksOrderUnit {
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
        let Self { store, writes } = *self;
        let _guard = store.commit_guard.lock().await;
        let db = &store.db;
        let orders = handle(db, CF_ORDERS)?;
        let numbers = handle(db, CF_ORDER_NUMBERS)?;
        let logs = handle(db, CF_ORDER_STATUS_LOGS)?;

        let mut batch = WriteBatch::default();
        for write in writes {
            match write {
                OrderWrite::Save(order) => {
                    if let Some(owner) = db.get_pinned_cf(numbers, order.order_no.as_bytes())?
                        && *owner != order.id.as_bytes()[..]
                    {
                        return Err(AppError::storage(
                            format!("Duplicate order number {}", order.order_no),
                            "unique constraint violated",
                        ));
                    }
                    if let Some(previous) = store.get::<Order>(CF_ORDERS, order.id.as_bytes())?
                        && previous.order_no != order.order_no
                    {
                        batch.delete_cf(numbers, previous.order_no.as_bytes());
                    }
                    batch.put_cf(numbers, order.order_no.as_bytes(), order.id.as_bytes());
                    batch.put_cf(orders, order.id.as_bytes(), encode(&order)?);
                }
                OrderWrite::Log(log) => {
                    let key = log_key(log.order_id.as_bytes(), log.changed_at, log.id);
                    batch.put_cf(logs, key, encode(&log)?);
                }
                OrderWrite::Delete(id) => {
                    if let Some(previous) = store.get::<Order>(CF_ORDERS, id.as_bytes())? {
                        batch.delete_cf(numbers, previous.order_no.as_bytes());
                    }
                    batch.delete_cf(orders, id.as_bytes());
                }
            }
        }

        db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for RocksDBStore {
    fn begin(&self) -> Box<dyn OrderUnit> {
        Box::new(RocksOrderUnit {
            store: self.clone(),
            writes: Vec::new(),
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.get(CF_ORDERS, id.as_bytes())
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        let numbers = handle(&self.db, CF_ORDER_NUMBERS)?;
        match self.db.get_pinned_cf(numbers, order_no.as_bytes())? {
            Some(id) => self.get(CF_ORDERS, &id),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &OrderFilter, pagination: Pagination) -> Result<Page<Order>> {
        let mut rows: Vec<Order> = self
            .scan_all::<Order>(CF_ORDERS)?
            .into_iter()
            .filter(|o| filter.matches(o))
            .collect();
        filter.sort(&mut rows);
        Ok(pagination.paginate(rows))
    }

    async fn status_logs(&self, order_id: Uuid) -> Result<Vec<OrderStatusLog>> {
        self.scan_prefix(CF_ORDER_STATUS_LOGS, &log_prefix(order_id.as_bytes()))
    }
}

enum PaymentWrite {
    Transaction(PaymentTransaction),
    StatusLog(PaymentStatusLog),
    WebhookLog(PaymentWebhookLog),
}

struct RocksPaymentUnit {
    store: RocksDBStore,
    writes: Vec<PaymentWrite>,
}

#[async_trait]
impl PaymentUnit for RocksPaymentUnit {
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
        let Self { store, writes } = *self;
        let _guard = store.commit_guard.lock().await;
        let db = &store.db;
        let payments = handle(db, CF_PAYMENTS)?;
        let status_logs = handle(db, CF_PAYMENT_STATUS_LOGS)?;
        let webhook_logs = handle(db, CF_WEBHOOK_LOGS)?;

        let mut batch = WriteBatch::default();
        for write in writes {
            match write {
                PaymentWrite::Transaction(tx) => {
                    let key = tx.payment_order_id.as_bytes();
                    if let Some(existing) = store.get::<PaymentTransaction>(CF_PAYMENTS, key)?
                        && existing.id != tx.id
                    {
                        return Err(AppError::storage(
                            format!("Duplicate payment order id {}", tx.payment_order_id),
                            "unique constraint violated",
                        ));
                    }
                    batch.put_cf(payments, key, encode(&tx)?);
                }
                PaymentWrite::StatusLog(log) => {
                    let key = log_key(log.transaction_id.as_bytes(), log.created_at, log.id);
                    batch.put_cf(status_logs, key, encode(&log)?);
                }
                PaymentWrite::WebhookLog(log) => {
                    let key = log_key(log.payment_order_id.as_bytes(), log.created_at, log.id);
                    batch.put_cf(webhook_logs, key, encode(&log)?);
                }
            }
        }

        db.write(batch)?;
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    fn begin(&self) -> Box<dyn PaymentUnit> {
        Box::new(RocksPaymentUnit {
            store: self.clone(),
            writes: Vec::new(),
        })
    }

    async fn find_by_payment_order_id(
        &self,
        payment_order_id: &str,
    ) -> Result<Option<PaymentTransaction>> {
        self.get(CF_PAYMENTS, payment_order_id.as_bytes())
    }

    async fn list_by_order(&self, order_id: Uuid) -> Result<Vec<PaymentTransaction>> {
        let mut rows: Vec<PaymentTransaction> = self
            .scan_all::<PaymentTransaction>(CF_PAYMENTS)?
            .into_iter()
            .filter(|t| t.order_id == order_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list(
        &self,
        filter: &PaymentFilter,
        pagination: Pagination,
    ) -> Result<Page<PaymentTransaction>> {
        let mut rows: Vec<PaymentTransaction> = self
            .scan_all::<PaymentTransaction>(CF_PAYMENTS)?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        filter.sort(&mut rows);
        Ok(pagination.paginate(rows))
    }

    async fn status_logs(&self, transaction_id: Uuid) -> Result<Vec<PaymentStatusLog>> {
        self.scan_prefix(CF_PAYMENT_STATUS_LOGS, &log_prefix(transaction_id.as_bytes()))
    }

    async fn webhook_logs(&self, payment_order_id: &str) -> Result<Vec<PaymentWebhookLog>> {
        self.scan_prefix(CF_WEBHOOK_LOGS, &log_prefix(payment_order_id.as_bytes()))
    }
}

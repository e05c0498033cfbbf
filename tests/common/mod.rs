#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as Days, NaiveDate, Utc};
use laundry_core::application::orders::{CreateOrderRequest, OrderEngine, OrderLine};
use laundry_core::application::payments::PaymentEngine;
use laundry_core::application::pricing::PricingResolver;
use laundry_core::application::quote::QuoteEngine;
use laundry_core::config::{GatewaySettings, LockPolicy};
use laundry_core::domain::catalog::{
    Addon, Customer, PriceKey, PricingModel, Service, ServicePrice,
};
use laundry_core::domain::money::Money;
use laundry_core::domain::order::{Order, OrderFilter, OrderStatusLog, OrderType};
use laundry_core::domain::page::{Page, Pagination};
use laundry_core::domain::payment::{
    ChargeRequest, ChargeToken, GatewayReport, notification_signature,
};
use laundry_core::domain::ports::{
    CatalogStore, OrderStatusNotifier, OrderStatusNotifierRef, OrderStore, OrderStoreRef,
    OrderUnit, PaymentConfirmed, PaymentGateway,
};
use laundry_core::error::{AppError, Result};
use laundry_core::infrastructure::in_memory::{
    InMemoryCatalog, InMemoryOrderStore, InMemoryPaymentStore,
};
use laundry_core::infrastructure::lock::memory::MemoryLocker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const SERVER_KEY: &str = "SB-Mid-server-test-key";

/// Ids of everything the seeded catalog contains.
pub struct Fixture {
    pub catalog: Arc<InMemoryCatalog>,
    pub locker: Arc<MemoryLocker>,
    pub outlet_id: Uuid,
    /// Per-piece service, base price 20000, GOLD price 12000, 48h.
    pub shirt_id: Uuid,
    /// Per-kg service, base 7000, default row 6000, express row 9000, 24h.
    pub wash_id: Uuid,
    /// Per-piece service, base 20000, default row 15000 only.
    pub bedcover_id: Uuid,
    pub perfume_id: Uuid,
    pub gold_customer_id: Uuid,
    pub plain_customer_id: Uuid,
}

fn service(code: &str, model: PricingModel, base: Decimal, hours: u32) -> Service {
    Service {
        id: Uuid::new_v4(),
        code: code.to_string(),
        name: code.replace('_', " "),
        pricing_model: model,
        base_price: Money::new(base),
        est_duration_hours: hours,
        is_express_available: true,
        is_active: true,
    }
}

fn price(service_id: Uuid, outlet_id: Uuid, tier: Option<&str>, express: bool, amount: Decimal) -> ServicePrice {
    ServicePrice {
        id: Uuid::new_v4(),
        service_id,
        outlet_id,
        member_tier: tier.map(str::to_string),
        is_express: express,
        price: Money::new(amount),
        effective_start: Utc::now().date_naive() - Days::days(1),
        effective_end: None,
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub async fn fixture() -> Fixture {
    let catalog = InMemoryCatalog::new();
    let outlet_id = Uuid::new_v4();

    let shirt = service("KEMEJA", PricingModel::ByPiece, dec!(20000), 48);
    let wash = service("CUCI_KERING", PricingModel::ByWeight, dec!(7000), 24);
    let bedcover = service("BEDCOVER", PricingModel::ByPiece, dec!(20000), 72);
    let perfume = Addon {
        id: Uuid::new_v4(),
        code: "PARFUM".into(),
        name: "Parfum".into(),
        price: Money::new(dec!(2500)),
        is_active: true,
    };

    catalog
        .insert_price(price(shirt.id, outlet_id, Some("GOLD"), false, dec!(12000)))
        .await;
    catalog
        .insert_price(price(wash.id, outlet_id, None, false, dec!(6000)))
        .await;
    catalog
        .insert_price(price(wash.id, outlet_id, None, true, dec!(9000)))
        .await;
    catalog
        .insert_price(price(bedcover.id, outlet_id, None, false, dec!(15000)))
        .await;

    let gold_customer_id = Uuid::new_v4();
    let plain_customer_id = Uuid::new_v4();
    catalog
        .insert_customer(Customer {
            id: gold_customer_id,
            member_tier_code: Some("GOLD".into()),
        })
        .await;
    catalog
        .insert_customer(Customer {
            id: plain_customer_id,
            member_tier_code: None,
        })
        .await;

    let fixture = Fixture {
        catalog: Arc::new(catalog),
        locker: Arc::new(MemoryLocker::new()),
        outlet_id,
        shirt_id: shirt.id,
        wash_id: wash.id,
        bedcover_id: bedcover.id,
        perfume_id: perfume.id,
        gold_customer_id,
        plain_customer_id,
    };
    fixture.catalog.insert_service(shirt).await;
    fixture.catalog.insert_service(wash).await;
    fixture.catalog.insert_service(bedcover).await;
    fixture.catalog.insert_addon(perfume).await;
    fixture
}

impl Fixture {
    pub fn pricing(&self) -> PricingResolver {
        PricingResolver::new(self.catalog.clone())
    }

    pub fn order_engine(&self, orders: OrderStoreRef) -> OrderEngine {
        OrderEngine::new(
            orders,
            self.catalog.clone(),
            self.pricing(),
            self.locker.clone(),
            LockPolicy::default(),
        )
    }

    pub fn quote_engine(&self) -> QuoteEngine {
        QuoteEngine::new(self.pricing(), self.locker.clone(), LockPolicy::default())
    }

    /// Quote engine over a catalog that is partly or fully unreachable.
    pub fn quote_engine_during_outage(&self, services_down: bool) -> QuoteEngine {
        let catalog = CatalogOutage {
            inner: self.catalog.clone(),
            services_down,
        };
        QuoteEngine::new(
            PricingResolver::new(Arc::new(catalog)),
            self.locker.clone(),
            LockPolicy::default(),
        )
    }

    pub fn pieces(&self, service_id: Uuid, qty: i32) -> OrderLine {
        line(service_id, None, Some(qty))
    }

    pub fn kilos(&self, service_id: Uuid, kg: Decimal) -> OrderLine {
        line(service_id, Some(kg), None)
    }

    pub fn create_request(&self, customer_id: Uuid, items: Vec<OrderLine>) -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: Some(customer_id),
            outlet_id: self.outlet_id,
            order_type: OrderType::Dropoff,
            requested_pickup_at: None,
            pickup_address: None,
            delivery_address: None,
            notes: None,
            member_tier: None,
            delivery_fee: None,
            items,
        }
    }
}

pub fn line(service_id: Uuid, weight_kg: Option<Decimal>, qty: Option<i32>) -> OrderLine {
    OrderLine {
        service_id,
        weight_kg,
        qty,
        is_express: false,
        addons: vec![],
        service_name: None,
        unit_price: None,
    }
}

/// Delays every commit, widening the window in which a lease is held.
pub struct SlowOrderStore {
    pub inner: InMemoryOrderStore,
    pub delay: Duration,
}

struct SlowUnit {
    inner: Box<dyn OrderUnit>,
    delay: Duration,
}

#[async_trait]
impl OrderUnit for SlowUnit {
    fn save_order(&mut self, order: Order) {
        self.inner.save_order(order);
    }

    fn append_status_log(&mut self, log: OrderStatusLog) {
        self.inner.append_status_log(log);
    }

    fn delete_order(&mut self, id: Uuid) {
        self.inner.delete_order(id);
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let Self { inner, delay } = *self;
        tokio::time::sleep(delay).await;
        inner.commit().await
    }
}

#[async_trait]
impl OrderStore for SlowOrderStore {
    fn begin(&self) -> Box<dyn OrderUnit> {
        Box::new(SlowUnit {
            inner: self.inner.begin(),
            delay: self.delay,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_order_no(&self, order_no: &str) -> Result<Option<Order>> {
        self.inner.find_by_order_no(order_no).await
    }

    async fn list(&self, filter: &OrderFilter, pagination: Pagination) -> Result<Page<Order>> {
        self.inner.list(filter, pagination).await
    }

    async fn status_logs(&self, order_id: Uuid) -> Result<Vec<OrderStatusLog>> {
        self.inner.status_logs(order_id).await
    }
}

/// Catalog reads that fail like a dropped database connection. Addon reads
/// always fail; service and price reads fail only while `services_down`.
pub struct CatalogOutage {
    pub inner: Arc<InMemoryCatalog>,
    pub services_down: bool,
}

fn catalog_unreachable() -> AppError {
    AppError::storage("catalog read failed", "connection refused")
}

#[async_trait]
impl CatalogStore for CatalogOutage {
    async fn find_service(&self, id: Uuid) -> Result<Option<Service>> {
        if self.services_down {
            return Err(catalog_unreachable());
        }
        self.inner.find_service(id).await
    }

    async fn find_addon(&self, _id: Uuid) -> Result<Option<Addon>> {
        Err(catalog_unreachable())
    }

    async fn find_price(&self, key: &PriceKey, date: NaiveDate) -> Result<Option<ServicePrice>> {
        if self.services_down {
            return Err(catalog_unreachable());
        }
        self.inner.find_price(key, date).await
    }
}

/// Gateway double: hands out deterministic tokens and replays a scripted status.
/// With `fail_create` set, transaction creation fails like a gateway outage.
#[derive(Default)]
pub struct FakeGateway {
    pub created: AtomicUsize,
    pub queried: AtomicUsize,
    pub fail_create: AtomicBool,
    pub requests: Mutex<Vec<ChargeRequest>>,
    pub report: Mutex<GatewayReport>,
}

impl FakeGateway {
    pub fn script(&self, transaction_status: &str, fraud_status: Option<&str>) {
        let mut report = self.report.lock().unwrap();
        report.transaction_status = Some(transaction_status.to_string());
        report.fraud_status = fraud_status.map(str::to_string);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_transaction(&self, request: &ChargeRequest) -> Result<ChargeToken> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::gateway(
                format!("create transaction {}", request.payment_order_id),
                "503 Service Unavailable",
            ));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        Ok(ChargeToken {
            token: format!("snap-{}", request.payment_order_id),
            redirect_url: format!("https://pay.test/{}", request.payment_order_id),
        })
    }

    async fn query_status(&self, payment_order_id: &str) -> Result<GatewayReport> {
        self.queried.fetch_add(1, Ordering::SeqCst);
        let mut report = self.report.lock().unwrap().clone();
        report.order_id = Some(payment_order_id.to_string());
        Ok(report)
    }
}

/// Records confirmations, optionally failing every call after recording it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub fail: bool,
    pub events: Mutex<Vec<PaymentConfirmed>>,
}

#[async_trait]
impl OrderStatusNotifier for RecordingNotifier {
    async fn payment_confirmed(&self, event: &PaymentConfirmed) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        if self.fail {
            return Err(AppError::storage(
                "order service unavailable",
                "connection refused",
            ));
        }
        Ok(())
    }
}

pub struct PaymentHarness {
    pub engine: PaymentEngine,
    pub store: Arc<InMemoryPaymentStore>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub locker: Arc<MemoryLocker>,
}

pub fn payment_harness(notifier: RecordingNotifier) -> PaymentHarness {
    let store = Arc::new(InMemoryPaymentStore::new());
    let gateway = Arc::new(FakeGateway::default());
    let notifier = Arc::new(notifier);
    let locker = Arc::new(MemoryLocker::new());
    let engine = PaymentEngine::new(
        store.clone(),
        gateway.clone(),
        notifier.clone(),
        locker.clone(),
        LockPolicy::default(),
        GatewaySettings {
            server_key: SERVER_KEY.to_string(),
            enabled_payments: vec!["bank_transfer".into(), "gopay".into()],
        },
    );
    PaymentHarness {
        engine,
        store,
        gateway,
        notifier,
        locker,
    }
}

impl PaymentHarness {
    /// A second engine over the same store, gateway and locker, reporting to `notifier`.
    pub fn engine_with(&self, notifier: OrderStatusNotifierRef) -> PaymentEngine {
        PaymentEngine::new(
            self.store.clone(),
            self.gateway.clone(),
            notifier,
            self.locker.clone(),
            LockPolicy::default(),
            GatewaySettings {
                server_key: SERVER_KEY.to_string(),
                enabled_payments: vec![],
            },
        )
    }
}

/// A notification body signed with [`SERVER_KEY`].
pub fn signed_notification(payment_order_id: &str, status: &str, gross: &str) -> Value {
    let status_code = if status == "settlement" { "200" } else { "201" };
    json!({
        "order_id": payment_order_id,
        "status_code": status_code,
        "gross_amount": gross,
        "transaction_id": "9aed5972-5b6a-401e-894b-a32c91ed1a3a",
        "transaction_status": status,
        "fraud_status": "accept",
        "payment_type": "bank_transfer",
        "transaction_time": "2024-05-01 10:00:00",
        "settlement_time": "2024-05-01 10:05:00",
        "status_message": "midtrans payment notification",
        "va_numbers": [{ "bank": "bca", "va_number": "12345678901" }],
        "signature_key": notification_signature(payment_order_id, status_code, gross, SERVER_KEY),
    })
}

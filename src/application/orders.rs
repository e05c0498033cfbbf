use super::locking::{ORDER_CREATE_KEY, order_key, with_lock};
use super::pricing::PricingResolver;
use crate::config::LockPolicy;
use crate::domain::catalog::Customer;
use crate::domain::money::Money;
use crate::domain::order::{
    Measure, Order, OrderFilter, OrderItem, OrderItemAddon, OrderStatus, OrderStatusLog,
    OrderType, generate_order_no,
};
use crate::domain::page::{Page, Pagination, SortOrder};
use crate::domain::ports::{CustomerStoreRef, LockerRef, OrderStoreRef};
use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Identity supplied by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: Uuid,
    pub member_tier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddonLine {
    pub addon_id: Uuid,
    pub qty: i32,
    /// Accepted for compatibility, never used.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderLine {
    pub service_id: Uuid,
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<i32>,
    #[serde(default)]
    pub is_express: bool,
    #[serde(default)]
    pub addons: Vec<AddonLine>,
    /// Client echoes of catalog data. Re-derived server side.
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    pub outlet_id: Uuid,
    pub order_type: OrderType,
    #[serde(default)]
    pub requested_pickup_at: Option<String>,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub member_tier: Option<String>,
    /// Ignored at creation; the fee is set to zero.
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    pub items: Vec<OrderLine>,
}

/// Partial update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateOrderRequest {
    #[serde(default)]
    pub order_type: Option<OrderType>,
    #[serde(default)]
    pub requested_pickup_at: Option<String>,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub delivery_address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub delivery_fee: Option<Decimal>,
    #[serde(default)]
    pub member_tier: Option<String>,
    #[serde(default)]
    pub items: Option<Vec<OrderLine>>,
}

struct PricedLines {
    items: Vec<OrderItem>,
    max_duration_hours: u32,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Identity tier first, then the stored customer's, then whatever the request says.
pub fn effective_tier(
    caller: Option<&Caller>,
    customer: Option<&Customer>,
    requested: Option<&str>,
) -> Option<String> {
    non_empty(caller.and_then(|c| c.member_tier.as_deref()))
        .or_else(|| non_empty(customer.and_then(|c| c.member_tier_code.as_deref())))
        .or_else(|| non_empty(requested))
}

fn measure_of(position: usize, line: &OrderLine) -> Result<Measure> {
    match (line.weight_kg, line.qty) {
        (Some(_), Some(_)) => Err(AppError::validation(format!(
            "Item {position}: provide either weight_kg or qty, not both"
        ))),
        (Some(kg), None) if kg > Decimal::ZERO => Ok(Measure::WeightKg(kg)),
        (Some(_), None) => Err(AppError::validation(format!(
            "Item {position}: Weight must be greater than 0"
        ))),
        (None, Some(qty)) => match u32::try_from(qty) {
            Ok(n) if n > 0 => Ok(Measure::Pieces(n)),
            _ => Err(AppError::validation(format!(
                "Item {position}: Quantity must be greater than 0"
            ))),
        },
        (None, None) => Err(AppError::validation(format!(
            "Item {position}: Either weight_kg or qty must be provided"
        ))),
    }
}

fn parse_pickup_time(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    match raw.map(str::trim).filter(|r| !r.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| {
                AppError::validation("Invalid requested_pickup_at format, expected RFC 3339")
            }),
    }
}

fn promised_at(now: DateTime<Utc>, max_duration_hours: u32) -> Option<DateTime<Utc>> {
    (max_duration_hours > 0).then(|| now + Duration::hours(i64::from(max_duration_hours)))
}

/// Owns order creation, mutation and the status state machine.
///
/// Every mutation runs under a lease: the shared creation key for new orders
/// and a per-order key for everything else. Reads take no lease.
pub struct OrderEngine {
    orders: OrderStoreRef,
    customers: CustomerStoreRef,
    pricing: PricingResolver,
    locker: LockerRef,
    policy: LockPolicy,
}

impl OrderEngine {
    /// Creates a new `OrderEngine`.
    ///
    /// # Arguments
    ///
    /// * `orders` - Persistence for orders, their items and status logs.
    /// * `customers` - Lookup for the customer record and its member tier.
    /// * `pricing` - Resolver used to re-price every line from the catalog.
    /// * `locker` - Lease coordinator guarding creation and per-order writes.
    /// * `policy` - Lease lifetime for guarded sections.
    pub fn new(
        orders: OrderStoreRef,
        customers: CustomerStoreRef,
        pricing: PricingResolver,
        locker: LockerRef,
        policy: LockPolicy,
    ) -> Self {
        Self {
            orders,
            customers,
            pricing,
            locker,
            policy,
        }
    }

    #[instrument(skip_all, fields(outlet_id = %request.outlet_id))]
    pub async fn create_order(
        &self,
        caller: Option<&Caller>,
        request: CreateOrderRequest,
    ) -> Result<Order> {
        with_lock(self.locker.as_ref(), ORDER_CREATE_KEY, self.policy.ttl, || {
            self.create_locked(caller, request)
        })
        .await
    }

    async fn create_locked(&self, caller: Option<&Caller>, request: CreateOrderRequest) -> Result<Order> {
        let customer_id = caller
            .map(|c| c.id)
            .or(request.customer_id)
            .ok_or_else(|| AppError::validation("customer_id is required"))?;
        if request.items.is_empty() {
            return Err(AppError::validation("Order must contain at least one item"));
        }

        let customer = self
            .customers
            .find_customer(customer_id)
            .await?
            .ok_or_else(|| AppError::validation("Customer not found"))?;
        let tier = effective_tier(caller, Some(&customer), request.member_tier.as_deref());
        let requested_pickup_at = parse_pickup_time(request.requested_pickup_at.as_deref())?;

        let now = Utc::now();
        let priced = self
            .price_lines(request.outlet_id, tier.as_deref(), now.date_naive(), &request.items)
            .await?;
        if request.delivery_fee.is_some() {
            debug!("client delivery fee ignored at creation");
        }

        let mut order = Order {
            id: Uuid::new_v4(),
            order_no: generate_order_no(now),
            customer_id,
            outlet_id: request.outlet_id,
            order_type: request.order_type,
            status: OrderStatus::New,
            requested_pickup_at,
            promised_at: promised_at(now, priced.max_duration_hours),
            pickup_address: request.pickup_address,
            delivery_address: request.delivery_address,
            notes: request.notes,
            subtotal: Money::ZERO,
            discount: Money::ZERO,
            tax: Money::ZERO,
            delivery_fee: Money::ZERO,
            grand_total: Money::ZERO,
            total_weight_kg: Decimal::ZERO,
            total_pieces: 0,
            items: priced.items,
            created_by: Some(customer_id),
            updated_by: Some(customer_id),
            created_at: now,
            updated_at: now,
        };
        order.recompute_totals()?;

        let mut unit = self.orders.begin();
        unit.save_order(order.clone());
        unit.append_status_log(OrderStatusLog::new(
            order.id,
            None,
            OrderStatus::New,
            Some(customer_id),
            Some("Order created".to_string()),
        ));
        unit.commit().await?;

        info!(
            order_id = %order.id,
            order_no = %order.order_no,
            tier = ?tier,
            grand_total = %order.grand_total,
            "order created"
        );
        Ok(order)
    }

    /// Re-prices request lines from the catalog.
    async fn price_lines(
        &self,
        outlet_id: Uuid,
        tier: Option<&str>,
        date: NaiveDate,
        lines: &[OrderLine],
    ) -> Result<PricedLines> {
        let mut items = Vec::with_capacity(lines.len());
        let mut max_duration_hours = 0;

        for (index, line) in lines.iter().enumerate() {
            let position = index + 1;
            let measure = measure_of(position, line)?;
            let service = self.pricing.resolve_service(line.service_id).await?;
            let unit_price = self
                .pricing
                .unit_price(&service, outlet_id, tier, date, line.is_express)
                .await?;

            let mut addons = Vec::with_capacity(line.addons.len());
            for addon_line in &line.addons {
                let qty = u32::try_from(addon_line.qty)
                    .ok()
                    .filter(|q| *q > 0)
                    .ok_or_else(|| {
                        AppError::validation(format!(
                            "Item {position}: Addon quantity must be greater than 0"
                        ))
                    })?;
                let addon = self.pricing.resolve_addon(addon_line.addon_id).await?;
                addons.push(OrderItemAddon {
                    addon_id: addon.id,
                    addon_code: addon.code,
                    addon_name: addon.name,
                    qty,
                    unit_price: addon.price,
                    line_total: addon.price.times(qty.into())?,
                });
            }

            max_duration_hours = max_duration_hours.max(service.est_duration_hours);
            items.push(OrderItem {
                id: Uuid::new_v4(),
                service_id: service.id,
                service_code: service.code,
                service_name: service.name,
                is_express: line.is_express,
                measure,
                unit_price,
                line_total: unit_price.times(measure.quantity())?,
                addons,
            });
        }

        Ok(PricedLines {
            items,
            max_duration_hours,
        })
    }

    #[instrument(skip(self, caller, patch))]
    pub async fn update_order(
        &self,
        id: Uuid,
        caller: Option<&Caller>,
        patch: UpdateOrderRequest,
    ) -> Result<Order> {
        with_lock(self.locker.as_ref(), &order_key(id), self.policy.ttl, || {
            self.update_locked(id, caller, patch)
        })
        .await
    }

    async fn update_locked(
        &self,
        id: Uuid,
        caller: Option<&Caller>,
        patch: UpdateOrderRequest,
    ) -> Result<Order> {
        let mut order = self.get_by_id(id).await?;
        if order.status.is_terminal() {
            return Err(AppError::FinalizedOrder);
        }

        if let Some(fee) = patch.delivery_fee {
            if fee < Decimal::ZERO {
                return Err(AppError::validation("Delivery fee must be >= 0"));
            }
            order.delivery_fee = Money::new(fee);
        }
        if let Some(raw) = patch.requested_pickup_at.as_deref() {
            order.requested_pickup_at = parse_pickup_time(Some(raw))?;
        }
        if let Some(order_type) = patch.order_type {
            order.order_type = order_type;
        }
        if let Some(address) = patch.pickup_address {
            order.pickup_address = Some(address);
        }
        if let Some(address) = patch.delivery_address {
            order.delivery_address = Some(address);
        }
        if let Some(notes) = patch.notes {
            order.notes = Some(notes);
        }

        let now = Utc::now();
        // An empty item list leaves the current items in place.
        if let Some(lines) = patch.items.as_deref().filter(|l| !l.is_empty()) {
            let customer = self.customers.find_customer(order.customer_id).await?;
            let tier = effective_tier(caller, customer.as_ref(), patch.member_tier.as_deref());
            let priced = self
                .price_lines(order.outlet_id, tier.as_deref(), now.date_naive(), lines)
                .await?;
            order.items = priced.items;
            order.promised_at = promised_at(now, priced.max_duration_hours);
        }

        order.recompute_totals()?;
        order.updated_at = now;
        if let Some(caller) = caller {
            order.updated_by = Some(caller.id);
        }

        let mut unit = self.orders.begin();
        unit.save_order(order.clone());
        unit.commit().await?;

        info!(order_id = %order.id, grand_total = %order.grand_total, "order updated");
        Ok(order)
    }

    #[instrument(skip(self, note))]
    pub async fn update_status(
        &self,
        id: Uuid,
        to: OrderStatus,
        actor: Option<Uuid>,
        note: Option<String>,
    ) -> Result<Order> {
        with_lock(self.locker.as_ref(), &order_key(id), self.policy.ttl, || {
            self.transition_locked(id, to, actor, note)
        })
        .await
    }

    async fn transition_locked(
        &self,
        id: Uuid,
        to: OrderStatus,
        actor: Option<Uuid>,
        note: Option<String>,
    ) -> Result<Order> {
        let mut order = self.get_by_id(id).await?;
        let from = order.status;
        if from == to {
            return Err(AppError::SameStatus(to));
        }
        if !from.can_transition_to(to) {
            return Err(AppError::InvalidTransition { from, to });
        }

        order.status = to;
        order.updated_at = Utc::now();
        if actor.is_some() {
            order.updated_by = actor;
        }

        let mut unit = self.orders.begin();
        unit.save_order(order.clone());
        unit.append_status_log(OrderStatusLog::new(order.id, Some(from), to, actor, note));
        unit.commit().await?;

        info!(order_id = %order.id, %from, %to, "order status changed");
        Ok(order)
    }

    pub async fn cancel_order(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
        reason: Option<String>,
    ) -> Result<Order> {
        self.update_status(id, OrderStatus::Canceled, actor, reason).await
    }

    #[instrument(skip(self))]
    pub async fn delete_order(&self, id: Uuid) -> Result<()> {
        with_lock(self.locker.as_ref(), &order_key(id), self.policy.ttl, || {
            self.delete_locked(id)
        })
        .await
    }

    async fn delete_locked(&self, id: Uuid) -> Result<()> {
        self.get_by_id(id).await?;
        let mut unit = self.orders.begin();
        unit.delete_order(id);
        unit.commit().await?;
        info!(order_id = %id, "order deleted");
        Ok(())
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Order> {
        self.orders
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("Order"))
    }

    pub async fn get_by_order_no(&self, order_no: &str) -> Result<Order> {
        self.orders
            .find_by_order_no(order_no)
            .await?
            .ok_or_else(|| AppError::not_found("Order"))
    }

    pub async fn list(&self, filter: &OrderFilter, pagination: Pagination) -> Result<Page<Order>> {
        self.orders.list(filter, pagination).await
    }

    pub async fn list_status_logs(
        &self,
        order_id: Uuid,
        pagination: Pagination,
        sort_order: SortOrder,
    ) -> Result<Page<OrderStatusLog>> {
        self.get_by_id(order_id).await?;
        let mut logs = self.orders.status_logs(order_id).await?;
        if sort_order == SortOrder::Desc {
            logs.reverse();
        }
        Ok(pagination.paginate(logs))
    }
}

use super::money::Money;
use super::page::SortOrder;
use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    InProgress,
    Completed,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    /// The legal transition table. Self-transitions are never legal.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::New, OrderStatus::InProgress)
                | (OrderStatus::New, OrderStatus::Canceled)
                | (OrderStatus::InProgress, OrderStatus::Completed)
                | (OrderStatus::InProgress, OrderStatus::Canceled)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Ok(OrderStatus::New),
            "IN_PROGRESS" => Ok(OrderStatus::InProgress),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELED" => Ok(OrderStatus::Canceled),
            other => Err(format!("Unknown order status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Dropoff,
    Pickup,
}

/// What an order line is measured in. Exactly one of the two is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    WeightKg(Decimal),
    Pieces(u32),
}

impl Measure {
    pub fn quantity(&self) -> Decimal {
        match self {
            Measure::WeightKg(kg) => *kg,
            Measure::Pieces(n) => Decimal::from(*n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemAddon {
    pub addon_id: Uuid,
    pub addon_code: String,
    pub addon_name: String,
    pub qty: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

/// Snapshot of a service selection, copied from the catalog at pricing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub service_id: Uuid,
    pub service_code: String,
    pub service_name: String,
    pub is_express: bool,
    pub measure: Measure,
    pub unit_price: Money,
    /// Unit price times the measure, excluding addons.
    pub line_total: Money,
    pub addons: Vec<OrderItemAddon>,
}

impl OrderItem {
    pub fn addons_total(&self) -> Result<Money> {
        Money::total(self.addons.iter().map(|a| a.line_total))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_no: String,
    pub customer_id: Uuid,
    pub outlet_id: Uuid,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub requested_pickup_at: Option<DateTime<Utc>>,
    pub promised_at: Option<DateTime<Utc>>,
    pub pickup_address: Option<String>,
    pub delivery_address: Option<String>,
    pub notes: Option<String>,
    pub subtotal: Money,
    pub discount: Money,
    pub tax: Money,
    pub delivery_fee: Money,
    pub grand_total: Money,
    pub total_weight_kg: Decimal,
    pub total_pieces: u32,
    pub items: Vec<OrderItem>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Re-derives every monetary and quantity total from the items.
    pub fn recompute_totals(&mut self) -> Result<()> {
        let mut subtotal = Money::ZERO;
        let mut total_weight_kg = Decimal::ZERO;
        let mut total_pieces: u32 = 0;
        for item in &self.items {
            subtotal = subtotal
                .checked_add(item.line_total)?
                .checked_add(item.addons_total()?)?;
            match item.measure {
                Measure::WeightKg(kg) => {
                    total_weight_kg = total_weight_kg
                        .checked_add(kg)
                        .ok_or_else(|| AppError::validation("Total weight out of range"))?;
                }
                Measure::Pieces(n) => {
                    total_pieces = total_pieces
                        .checked_add(n)
                        .ok_or_else(|| AppError::validation("Total pieces out of range"))?;
                }
            }
        }

        self.subtotal = subtotal;
        self.total_weight_kg = total_weight_kg;
        self.total_pieces = total_pieces;
        self.grand_total = subtotal
            .checked_sub(self.discount)?
            .checked_add(self.tax)?
            .checked_add(self.delivery_fee)?;
        Ok(())
    }
}

/// `ORD-YYYYMMDD-HHMMSS-xxxxxxxx`, the suffix taken from a random UUID.
pub fn generate_order_no(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusLog {
    pub id: Uuid,
    pub order_id: Uuid,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub changed_by: Option<Uuid>,
    pub note: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl OrderStatusLog {
    pub fn new(
        order_id: Uuid,
        from_status: Option<OrderStatus>,
        to_status: OrderStatus,
        changed_by: Option<Uuid>,
        note: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            from_status,
            to_status,
            changed_by,
            note,
            changed_at: Utc::now(),
        }
    }
}

/// Sort targets accepted by order listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSortKey {
    #[default]
    CreatedAt,
    OrderNo,
    GrandTotal,
    Status,
}

impl OrderSortKey {
    /// Unknown values fall back to the default instead of failing.
    pub fn from_param(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("order_no") => OrderSortKey::OrderNo,
            Some("grand_total") => OrderSortKey::GrandTotal,
            Some("status") => OrderSortKey::Status,
            _ => OrderSortKey::CreatedAt,
        }
    }

    fn compare(&self, a: &Order, b: &Order) -> Ordering {
        match self {
            OrderSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            OrderSortKey::OrderNo => a.order_no.cmp(&b.order_no),
            OrderSortKey::GrandTotal => a.grand_total.cmp(&b.grand_total),
            OrderSortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<Uuid>,
    pub outlet_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
    pub order_type: Option<OrderType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub search: Option<String>,
    pub sort_by: OrderSortKey,
    pub sort_order: SortOrder,
}

impl OrderFilter {
    pub fn matches(&self, order: &Order) -> bool {
        let created = order.created_at.date_naive();
        self.customer_id.is_none_or(|id| order.customer_id == id)
            && self.outlet_id.is_none_or(|id| order.outlet_id == id)
            && self.status.is_none_or(|s| order.status == s)
            && self.order_type.is_none_or(|t| order.order_type == t)
            && self.start_date.is_none_or(|d| created >= d)
            && self.end_date.is_none_or(|d| created <= d)
            && self.search.as_deref().is_none_or(|term| {
                let term = term.to_lowercase();
                order.order_no.to_lowercase().contains(&term)
                    || order
                        .notes
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&term))
            })
    }

    pub fn sort(&self, orders: &mut [Order]) {
        orders.sort_by(|a, b| self.sort_order.apply(self.sort_by.compare(a, b)));
    }
}

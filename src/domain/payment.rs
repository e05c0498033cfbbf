use super::money::Money;
use super::page::SortOrder;
use crate::error::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha512};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
    Expired,
    Canceled,
}

impl PaymentStatus {
    /// Derives the local status from a gateway `(transaction_status, fraud_status)` pair.
    /// Unknown statuses map to `Pending`.
    pub fn from_gateway(transaction_status: &str, fraud_status: Option<&str>) -> Self {
        match transaction_status {
            "capture" if fraud_status == Some("accept") => PaymentStatus::Success,
            "capture" => PaymentStatus::Pending,
            "settlement" => PaymentStatus::Success,
            "pending" => PaymentStatus::Pending,
            "deny" | "cancel" => PaymentStatus::Canceled,
            "expire" => PaymentStatus::Expired,
            "failure" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Success => "SUCCESS",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
            PaymentStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    ApiCreate,
    ApiCheck,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_order_id: String,
    pub payment_method: Option<String>,
    pub payment_type: Option<String>,
    pub gross_amount: Money,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub fraud_status: Option<String>,
    pub snap_token: Option<String>,
    pub snap_redirect_url: Option<String>,
    pub va_number: Option<String>,
    pub biller_code: Option<String>,
    pub bill_key: Option<String>,
    pub expiry_time: Option<DateTime<Utc>>,
    pub settlement_time: Option<DateTime<Utc>>,
    pub transaction_time: Option<DateTime<Utc>>,
    pub request_payload: Option<serde_json::Value>,
    pub response_payload: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of folding a gateway report into a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merge {
    pub previous: PaymentStatus,
    pub current: PaymentStatus,
    pub fields_changed: bool,
}

impl Merge {
    pub fn status_changed(&self) -> bool {
        self.previous != self.current
    }

    pub fn changed(&self) -> bool {
        self.fields_changed || self.status_changed()
    }

    pub fn became_successful(&self) -> bool {
        self.current == PaymentStatus::Success && self.previous != PaymentStatus::Success
    }
}

fn assign<T: PartialEq>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(v) if slot.as_ref() != Some(&v) => {
            *slot = Some(v);
            true
        }
        _ => false,
    }
}

impl PaymentTransaction {
    /// Merges a gateway report. Absent fields never clear stored values, and a
    /// settled transaction is not pulled back to `Pending` by a stale report.
    pub fn merge_report(&mut self, report: &GatewayReport, now: DateTime<Utc>) -> Merge {
        let previous = self.status;
        let reported = report
            .transaction_status
            .as_deref()
            .map(|s| PaymentStatus::from_gateway(s, report.fraud_status.as_deref()));
        if let Some(next) = reported
            && !(previous.is_settled() && next == PaymentStatus::Pending)
        {
            self.status = next;
        }

        let mut changed = false;
        changed |= assign(&mut self.transaction_id, report.transaction_id.clone());
        changed |= assign(&mut self.payment_type, report.payment_type.clone());
        changed |= assign(&mut self.fraud_status, report.fraud_status.clone());
        changed |= assign(
            &mut self.transaction_time,
            report.transaction_time.as_deref().and_then(parse_gateway_time),
        );
        changed |= assign(
            &mut self.settlement_time,
            report.settlement_time.as_deref().and_then(parse_gateway_time),
        );
        changed |= assign(
            &mut self.expiry_time,
            report.expiry_time.as_deref().and_then(parse_gateway_time),
        );
        let va = report.va_numbers.first();
        changed |= assign(&mut self.va_number, va.and_then(|v| v.va_number.clone()));
        // An explicit biller code wins over the VA bank.
        let biller_code = report
            .biller_code
            .clone()
            .or_else(|| va.and_then(|v| v.bank.clone()));
        changed |= assign(&mut self.biller_code, biller_code);
        changed |= assign(&mut self.bill_key, report.bill_key.clone());

        let merge = Merge {
            previous,
            current: self.status,
            fields_changed: changed,
        };
        if merge.changed() {
            self.updated_at = now;
        }
        merge
    }
}

/// Accepts `YYYY-MM-DD HH:MM:SS` (read as UTC) or RFC 3339.
pub fn parse_gateway_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStatusLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub payment_order_id: String,
    pub previous_status: Option<PaymentStatus>,
    pub new_status: PaymentStatus,
    pub fraud_status: Option<String>,
    pub status_message: Option<String>,
    pub source: PaymentSource,
    pub raw_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl PaymentStatusLog {
    pub fn new(
        tx: &PaymentTransaction,
        previous_status: Option<PaymentStatus>,
        source: PaymentSource,
        status_message: Option<String>,
        raw_data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id: tx.id,
            payment_order_id: tx.payment_order_id.clone(),
            previous_status,
            new_status: tx.status,
            fraud_status: tx.fraud_status.clone(),
            status_message,
            source,
            raw_data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentWebhookLog {
    pub id: Uuid,
    pub payment_transaction_id: Option<Uuid>,
    pub payment_order_id: String,
    pub source: String,
    pub event_type: Option<String>,
    pub transaction_status: Option<String>,
    pub fraud_status: Option<String>,
    pub status_code: Option<String>,
    pub gross_amount: Option<String>,
    pub signature_key: Option<String>,
    pub signature_verified: bool,
    pub raw_payload: serde_json::Value,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl PaymentWebhookLog {
    pub fn received(report: &GatewayReport, raw_payload: serde_json::Value, verified: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_transaction_id: None,
            payment_order_id: report.order_id.clone().unwrap_or_default(),
            source: WEBHOOK_SOURCE.to_string(),
            event_type: report.transaction_status.clone(),
            transaction_status: report.transaction_status.clone(),
            fraud_status: report.fraud_status.clone(),
            status_code: report.status_code.clone(),
            gross_amount: report.gross_amount.clone(),
            signature_key: report.signature_key.clone(),
            signature_verified: verified,
            raw_payload,
            processed_at: None,
            processing_error: None,
            created_at: Utc::now(),
        }
    }
}

pub const WEBHOOK_SOURCE: &str = "gateway";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VaNumber {
    pub bank: Option<String>,
    pub va_number: Option<String>,
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A transaction snapshot as reported by the gateway, either pushed through a
/// notification or returned from a status query. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayReport {
    pub order_id: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    pub status_code: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    pub gross_amount: Option<String>,
    pub signature_key: Option<String>,
    pub transaction_id: Option<String>,
    pub transaction_status: Option<String>,
    pub fraud_status: Option<String>,
    pub payment_type: Option<String>,
    pub status_message: Option<String>,
    pub transaction_time: Option<String>,
    pub settlement_time: Option<String>,
    pub expiry_time: Option<String>,
    pub va_numbers: Vec<VaNumber>,
    pub biller_code: Option<String>,
    pub bill_key: Option<String>,
}

/// Lowercase hex SHA-512 of `order_id + status_code + gross_amount + server_key`.
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.trim().as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks a notification's signature in constant time. Hex case is ignored.
pub fn verify_notification(report: &GatewayReport, server_key: &str) -> bool {
    let (Some(order_id), Some(status_code), Some(gross_amount), Some(signature)) = (
        report.order_id.as_deref(),
        report.status_code.as_deref(),
        report.gross_amount.as_deref(),
        report.signature_key.as_deref(),
    ) else {
        return false;
    };
    if server_key.is_empty() {
        return false;
    }

    let Ok(provided) = hex::decode(signature.trim().to_ascii_lowercase()) else {
        return false;
    };
    let expected_hex = notification_signature(order_id, status_code, gross_amount, server_key);
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeItem {
    pub id: String,
    pub name: String,
    pub price: Money,
    pub quantity: u32,
}

impl ChargeItem {
    pub fn total(&self) -> Result<Money> {
        self.price.times(self.quantity.into())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeCustomer {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// What gets submitted to the gateway to open a payment page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub payment_order_id: String,
    pub gross_amount: Money,
    pub items: Vec<ChargeItem>,
    pub customer: Option<ChargeCustomer>,
    pub enabled_payments: Vec<String>,
    pub expiry_minutes: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeToken {
    pub token: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaymentSortKey {
    #[default]
    CreatedAt,
    GrossAmount,
    Status,
}

impl PaymentSortKey {
    fn compare(&self, a: &PaymentTransaction, b: &PaymentTransaction) -> Ordering {
        match self {
            PaymentSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            PaymentSortKey::GrossAmount => a.gross_amount.cmp(&b.gross_amount),
            PaymentSortKey::Status => a.status.as_str().cmp(b.status.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PaymentFilter {
    pub order_id: Option<Uuid>,
    pub status: Option<PaymentStatus>,
    pub payment_method: Option<String>,
    pub payment_type: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort_by: PaymentSortKey,
    pub sort_order: SortOrder,
}

impl PaymentFilter {
    pub fn matches(&self, tx: &PaymentTransaction) -> bool {
        let created = tx.created_at.date_naive();
        self.order_id.is_none_or(|id| tx.order_id == id)
            && self.status.is_none_or(|s| tx.status == s)
            && self
                .payment_method
                .as_deref()
                .is_none_or(|m| tx.payment_method.as_deref() == Some(m))
            && self
                .payment_type
                .as_deref()
                .is_none_or(|t| tx.payment_type.as_deref() == Some(t))
            && self.start_date.is_none_or(|d| created >= d)
            && self.end_date.is_none_or(|d| created <= d)
    }

    pub fn sort(&self, rows: &mut [PaymentTransaction]) {
        rows.sort_by(|a, b| self.sort_order.apply(self.sort_by.compare(a, b)));
    }
}

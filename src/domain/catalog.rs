use super::money::Money;
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// How a service's unit price is applied to an order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingModel {
    #[serde(rename = "weight")]
    ByWeight,
    #[serde(rename = "piece")]
    ByPiece,
    Flat,
}

impl PricingModel {
    /// Accepts both the current names and the legacy `PER_KG`/`PER_ITEM` codes.
    /// Anything unrecognized prices as a flat line.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "weight" | "PER_KG" => PricingModel::ByWeight,
            "piece" | "PER_ITEM" => PricingModel::ByPiece,
            _ => PricingModel::Flat,
        }
    }
}

impl<'de> Deserialize<'de> for PricingModel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(PricingModel::parse(&raw))
    }
}

fn default_duration_hours() -> u32 {
    24
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub pricing_model: PricingModel,
    pub base_price: Money,
    #[serde(default = "default_duration_hours")]
    pub est_duration_hours: u32,
    #[serde(default)]
    pub is_express_available: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Addon {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub price: Money,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// A time-versioned price override for one service at one outlet.
///
/// `member_tier` of `None` is the default-tier row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePrice {
    pub id: Uuid,
    pub service_id: Uuid,
    pub outlet_id: Uuid,
    #[serde(default)]
    pub member_tier: Option<String>,
    #[serde(default)]
    pub is_express: bool,
    pub price: Money,
    pub effective_start: NaiveDate,
    #[serde(default)]
    pub effective_end: Option<NaiveDate>,
}

impl ServicePrice {
    /// Whether `date` falls inside `[effective_start, effective_end)`.
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.effective_start <= date && self.effective_end.is_none_or(|end| date < end)
    }

    pub fn matches(&self, key: &PriceKey) -> bool {
        self.service_id == key.service_id
            && self.outlet_id == key.outlet_id
            && self.is_express == key.is_express
            && self.member_tier.as_deref() == key.member_tier.as_deref()
    }
}

/// Exact lookup key for one price-table search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceKey {
    pub service_id: Uuid,
    pub outlet_id: Uuid,
    pub member_tier: Option<String>,
    pub is_express: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    #[serde(default)]
    pub member_tier_code: Option<String>,
}

/// Picks the row a price search returns: latest start wins, later rows win ties.
pub fn latest_effective<'a, I>(rows: I, key: &PriceKey, date: NaiveDate) -> Option<&'a ServicePrice>
where
    I: IntoIterator<Item = &'a ServicePrice>,
{
    rows.into_iter()
        .filter(|row| row.matches(key) && row.covers(date))
        .max_by_key(|row| row.effective_start)
}

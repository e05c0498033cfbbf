use super::locking::{quote_key, with_lock};
use super::pricing::PricingResolver;
use crate::config::LockPolicy;
use crate::domain::catalog::{PricingModel, Service};
use crate::domain::money::Money;
use crate::domain::ports::LockerRef;
use crate::error::{AppError, Result};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteAddonLine {
    pub addon_id: String,
    pub qty: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteLine {
    pub service_id: String,
    #[serde(default)]
    pub weight_kg: Option<Decimal>,
    #[serde(default)]
    pub qty: Option<i32>,
    #[serde(default)]
    pub is_express: bool,
    #[serde(default)]
    pub addons: Vec<QuoteAddonLine>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub outlet_id: Uuid,
    #[serde(default)]
    pub member_tier: Option<String>,
    /// `YYYY-MM-DD`; today when absent or unparseable.
    #[serde(default)]
    pub date: Option<String>,
    pub items: Vec<QuoteLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteMeta {
    pub outlet_id: Uuid,
    pub member_tier: Option<String>,
    pub date: NaiveDate,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteAddon {
    pub addon_id: Uuid,
    pub addon_code: String,
    pub addon_name: String,
    pub qty: u32,
    pub unit_price: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteItem {
    pub service_id: Uuid,
    pub service_code: String,
    pub service_name: String,
    pub pricing_model: PricingModel,
    pub is_express: bool,
    pub qty: Option<i32>,
    pub weight_kg: Option<Decimal>,
    pub unit_price: Money,
    pub base_total: Money,
    pub addons: Vec<QuoteAddon>,
    pub addons_total: Money,
    pub line_total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteResult {
    pub meta: QuoteMeta,
    pub items: Vec<QuoteItem>,
    pub subtotal: Money,
    pub grand_total: Money,
}

/// Prices a hypothetical cart without persisting anything.
///
/// Bad lines become warnings and are skipped. Only infrastructure failures
/// fail the whole quote.
pub struct QuoteEngine {
    pricing: PricingResolver,
    locker: LockerRef,
    policy: LockPolicy,
}

impl QuoteEngine {
    /// Creates a new `QuoteEngine`.
    ///
    /// # Arguments
    ///
    /// * `pricing` - Resolver shared with order creation.
    /// * `locker` - Lease coordinator; one quote per outlet runs at a time.
    /// * `policy` - Lease lifetime for the per-outlet lease.
    pub fn new(pricing: PricingResolver, locker: LockerRef, policy: LockPolicy) -> Self {
        Self {
            pricing,
            locker,
            policy,
        }
    }

    #[instrument(skip_all, fields(outlet_id = %request.outlet_id))]
    pub async fn calculate_quote(&self, request: QuoteRequest) -> Result<QuoteResult> {
        let key = quote_key(request.outlet_id);
        with_lock(self.locker.as_ref(), &key, self.policy.ttl, || self.calculate(request)).await
    }

    async fn calculate(&self, request: QuoteRequest) -> Result<QuoteResult> {
        let mut warnings = Vec::new();
        let mut date = Utc::now().date_naive();
        if let Some(raw) = request.date.as_deref().filter(|d| !d.trim().is_empty()) {
            match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
                Ok(parsed) => date = parsed,
                Err(_) => warnings.push(format!("Invalid date format: {raw}, using today")),
            }
        }
        let tier = request.member_tier.as_deref();

        let mut items = Vec::with_capacity(request.items.len());
        let mut subtotal = Money::ZERO;
        for (index, line) in request.items.iter().enumerate() {
            let position = index + 1;
            let Ok(service_id) = Uuid::parse_str(line.service_id.trim()) else {
                warnings.push(format!("Item {position}: Invalid service_id: {}", line.service_id));
                continue;
            };
            let service = match self.pricing.resolve_service(service_id).await {
                Ok(service) => service,
                Err(AppError::NotFound(_)) => {
                    warnings.push(format!("Item {position}: Service not found: {service_id}"));
                    continue;
                }
                Err(e) => return Err(e),
            };

            let unit_price = self
                .pricing
                .unit_price(&service, request.outlet_id, tier, date, line.is_express)
                .await?;
            let base_total = match base_total(&service, unit_price, line) {
                Ok(Some(total)) => total,
                Ok(None) => {
                    let missing = match service.pricing_model {
                        PricingModel::ByWeight => "Weight",
                        _ => "Quantity",
                    };
                    warnings.push(format!("Item {position}: {missing} required for {}", service.code));
                    continue;
                }
                Err(e) => {
                    warnings.push(format!("Item {position}: {e}"));
                    continue;
                }
            };

            let addons = self.quote_addons(position, line, &mut warnings).await?;
            let totals = Money::total(addons.iter().map(|a| a.line_total)).and_then(|addons_total| {
                let line_total = base_total.checked_add(addons_total)?;
                Ok((addons_total, line_total, subtotal.checked_add(line_total)?))
            });
            let (addons_total, line_total, running) = match totals {
                Ok(totals) => totals,
                Err(e) => {
                    warnings.push(format!("Item {position}: {e}"));
                    continue;
                }
            };
            subtotal = running;
            debug!(
                position,
                service = %service.code,
                %unit_price,
                %base_total,
                %addons_total,
                "quote line priced"
            );

            items.push(QuoteItem {
                service_id: service.id,
                service_code: service.code,
                service_name: service.name,
                pricing_model: service.pricing_model,
                is_express: line.is_express,
                qty: line.qty,
                weight_kg: line.weight_kg,
                unit_price,
                base_total,
                addons,
                addons_total,
                line_total,
            });
        }

        info!(
            %subtotal,
            items = items.len(),
            warnings = warnings.len(),
            "quote calculated"
        );
        Ok(QuoteResult {
            meta: QuoteMeta {
                outlet_id: request.outlet_id,
                member_tier: request.member_tier.clone(),
                date,
                warnings,
            },
            items,
            subtotal,
            grand_total: subtotal,
        })
    }

    async fn quote_addons(
        &self,
        position: usize,
        line: &QuoteLine,
        warnings: &mut Vec<String>,
    ) -> Result<Vec<QuoteAddon>> {
        let mut addons = Vec::with_capacity(line.addons.len());
        for (index, addon_line) in line.addons.iter().enumerate() {
            let label = format!("Item {position}, Addon {}", index + 1);
            let Ok(addon_id) = Uuid::parse_str(addon_line.addon_id.trim()) else {
                warnings.push(format!("{label}: Invalid addon_id: {}", addon_line.addon_id));
                continue;
            };
            let Some(qty) = u32::try_from(addon_line.qty).ok().filter(|q| *q > 0) else {
                warnings.push(format!("{label}: Addon quantity must be greater than 0"));
                continue;
            };
            let addon = match self.pricing.resolve_addon(addon_id).await {
                Ok(addon) => addon,
                Err(AppError::NotFound(_)) => {
                    warnings.push(format!("{label}: Addon not found: {addon_id}"));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let line_total = match addon.price.times(qty.into()) {
                Ok(total) => total,
                Err(e) => {
                    warnings.push(format!("{label}: {e}"));
                    continue;
                }
            };
            addons.push(QuoteAddon {
                addon_id: addon.id,
                addon_code: addon.code,
                addon_name: addon.name,
                qty,
                unit_price: addon.price,
                line_total,
            });
        }
        Ok(addons)
    }
}

/// Line base total per pricing model, or `None` when the required measure is missing.
fn base_total(service: &Service, unit_price: Money, line: &QuoteLine) -> Result<Option<Money>> {
    let quantity = match service.pricing_model {
        PricingModel::ByWeight => line.weight_kg.filter(|kg| *kg > Decimal::ZERO),
        PricingModel::ByPiece => line.qty.filter(|q| *q > 0).map(Decimal::from),
        PricingModel::Flat => return Ok(Some(unit_price)),
    };
    quantity.map(|q| unit_price.times(q)).transpose()
}

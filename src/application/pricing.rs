use crate::domain::catalog::{Addon, PriceKey, Service, ServicePrice};
use crate::domain::money::Money;
use crate::domain::ports::CatalogStoreRef;
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use std::iter;
use tracing::{debug, warn};
use uuid::Uuid;

/// One lookup against the price table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceAttempt {
    pub is_express: bool,
    pub member_tier: Option<String>,
}

/// The ordered search over `(express, tier)` combinations.
///
/// Express requests fall back to non-express, never the reverse. Within one
/// express flag an exact tier is tried before the default tier.
pub fn price_attempts(member_tier: Option<&str>, is_express: bool) -> Vec<PriceAttempt> {
    let tier = member_tier.map(str::trim).filter(|t| !t.is_empty());
    let express_flags: &[bool] = if is_express { &[true, false] } else { &[false] };

    express_flags
        .iter()
        .flat_map(|&flag| {
            tier.map(|t| PriceAttempt {
                is_express: flag,
                member_tier: Some(t.to_string()),
            })
            .into_iter()
            .chain(iter::once(PriceAttempt {
                is_express: flag,
                member_tier: None,
            }))
        })
        .collect()
}

/// Resolves authoritative catalog rows and unit prices.
///
/// Nothing a client sends about names, codes or prices is consulted here.
#[derive(Clone)]
pub struct PricingResolver {
    catalog: CatalogStoreRef,
}

impl PricingResolver {
    /// # Arguments
    ///
    /// * `catalog` - Read access to services, addons and price rows.
    pub fn new(catalog: CatalogStoreRef) -> Self {
        Self { catalog }
    }

    /// Active service by id. Inactive services count as missing.
    pub async fn resolve_service(&self, id: Uuid) -> Result<Service> {
        match self.catalog.find_service(id).await? {
            Some(service) if service.is_active => Ok(service),
            _ => Err(AppError::not_found(format!("Service {id}"))),
        }
    }

    pub async fn resolve_addon(&self, id: Uuid) -> Result<Addon> {
        match self.catalog.find_addon(id).await? {
            Some(addon) if addon.is_active => Ok(addon),
            _ => Err(AppError::not_found(format!("Addon {id}"))),
        }
    }

    /// Walks [`price_attempts`] in order and returns the first hit.
    pub async fn resolve_price(
        &self,
        service_id: Uuid,
        outlet_id: Uuid,
        member_tier: Option<&str>,
        date: NaiveDate,
        is_express: bool,
    ) -> Result<Option<ServicePrice>> {
        for attempt in price_attempts(member_tier, is_express) {
            let key = PriceKey {
                service_id,
                outlet_id,
                member_tier: attempt.member_tier,
                is_express: attempt.is_express,
            };
            if let Some(row) = self.catalog.find_price(&key, date).await? {
                debug!(
                    %service_id,
                    %outlet_id,
                    tier = ?key.member_tier,
                    express = key.is_express,
                    price = %row.price,
                    "price row matched"
                );
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Unit price for a service, falling back to its base price with a warning.
    pub async fn unit_price(
        &self,
        service: &Service,
        outlet_id: Uuid,
        member_tier: Option<&str>,
        date: NaiveDate,
        is_express: bool,
    ) -> Result<Money> {
        match self
            .resolve_price(service.id, outlet_id, member_tier, date, is_express)
            .await?
        {
            Some(row) => Ok(row.price),
            None => {
                warn!(
                    service = %service.code,
                    %outlet_id,
                    tier = ?member_tier,
                    express = is_express,
                    base_price = %service.base_price,
                    "no price row matched, using base price"
                );
                Ok(service.base_price)
            }
        }
    }
}

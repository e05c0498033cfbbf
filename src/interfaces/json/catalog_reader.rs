use crate::domain::catalog::{Addon, Customer, Service, ServicePrice};
use crate::error::Result;
use crate::infrastructure::in_memory::InMemoryCatalog;
use serde::{Deserialize, Serialize};
use std::io::Read;
use tracing::info;

/// A catalog snapshot: services, addons, the price table and known customers.
///
/// Every section is optional. Price rows are loaded in file order, which
/// decides ties between rows sharing a start date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    pub services: Vec<Service>,
    pub addons: Vec<Addon>,
    pub prices: Vec<ServicePrice>,
    pub customers: Vec<Customer>,
}

impl CatalogSeed {
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        super::read_json(source)
    }

    /// Loads the seed into a fresh in-memory catalog.
    pub async fn into_catalog(self) -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        info!(
            services = self.services.len(),
            addons = self.addons.len(),
            prices = self.prices.len(),
            customers = self.customers.len(),
            "loading catalog"
        );
        for service in self.services {
            catalog.insert_service(service).await;
        }
        for addon in self.addons {
            catalog.insert_addon(addon).await;
        }
        for price in self.prices {
            catalog.insert_price(price).await;
        }
        for customer in self.customers {
            catalog.insert_customer(customer).await;
        }
        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::catalog::{PriceKey, PricingModel};
    use crate::domain::money::Money;
    use crate::domain::ports::{CatalogStore, CustomerStore};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    const SEED: &str = r#"{
        "services": [{
            "id": "11111111-1111-1111-1111-111111111111",
            "code": "CUCI_KERING",
            "name": "Cuci Kering",
            "pricing_model": "PER_KG",
            "base_price": "7000"
        }],
        "prices": [{
            "id": "22222222-2222-2222-2222-222222222222",
            "service_id": "11111111-1111-1111-1111-111111111111",
            "outlet_id": "33333333-3333-3333-3333-333333333333",
            "member_tier": "GOLD",
            "price": "6500",
            "effective_start": "2024-01-01"
        }],
        "customers": [{ "id": "44444444-4444-4444-4444-444444444444", "member_tier_code": "GOLD" }]
    }"#;

    #[tokio::test]
    async fn test_seed_loads_into_catalog() {
        let seed = CatalogSeed::from_reader(SEED.as_bytes()).unwrap();
        assert!(seed.addons.is_empty());
        assert_eq!(seed.services[0].pricing_model, PricingModel::ByWeight);
        assert_eq!(seed.services[0].est_duration_hours, 24);
        assert!(seed.services[0].is_active);

        let catalog = seed.into_catalog().await;
        let service_id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let key = PriceKey {
            service_id,
            outlet_id: Uuid::parse_str("33333333-3333-3333-3333-333333333333").unwrap(),
            member_tier: Some("GOLD".into()),
            is_express: false,
        };
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let price = catalog.find_price(&key, date).await.unwrap().unwrap();
        assert_eq!(price.price, Money::new(dec!(6500)));

        let customer_id = Uuid::parse_str("44444444-4444-4444-4444-444444444444").unwrap();
        let customer = catalog.find_customer(customer_id).await.unwrap().unwrap();
        assert_eq!(customer.member_tier_code.as_deref(), Some("GOLD"));
    }

    #[test]
    fn test_seed_malformed_document() {
        assert!(CatalogSeed::from_reader("{\"services\": 3}".as_bytes()).is_err());
    }
}

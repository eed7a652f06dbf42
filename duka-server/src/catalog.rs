//! Product catalog and delivery fee lookup
//!
//! The checkout engine prices cart lines from the catalog at checkout time
//! and snapshots the result into the order, so later catalog edits never
//! change what an existing order owes. The catalog itself is behind a trait:
//! production wires a real product source, tests use [`StaticCatalog`].

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use shared::money;

/// Pricing snapshot for one product at checkout time.
#[derive(Debug, Clone)]
pub struct ProductInfo {
    pub product_id: String,
    pub name: String,
    pub sku: String,
    /// List price
    pub price: Decimal,
    /// Promotional price, when one is running
    pub discount_price: Option<Decimal>,
    /// Inactive products are not purchasable
    pub active: bool,
}

impl ProductInfo {
    /// The price a buyer actually pays: discount price when present,
    /// list price otherwise.
    pub fn effective_price(&self) -> Decimal {
        money::round2(self.discount_price.unwrap_or(self.price))
    }
}

/// Read-only product lookup used by the checkout engine.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, product_id: &str) -> Option<ProductInfo>;
}

/// In-memory catalog backed by a concurrent map.
///
/// Products are seeded at startup (or by tests) and looked up by id.
#[derive(Default)]
pub struct StaticCatalog {
    products: DashMap<String, ProductInfo>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, product: ProductInfo) {
        self.products.insert(product.product_id.clone(), product);
    }

    pub fn remove(&self, product_id: &str) {
        self.products.remove(product_id);
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_product(&self, product_id: &str) -> Option<ProductInfo> {
        self.products.get(product_id).map(|p| p.value().clone())
    }
}

/// Delivery fee lookup by destination city.
pub trait DeliveryEstimator: Send + Sync {
    fn fee_for_city(&self, city: &str) -> Decimal;
}

/// Flat per-city rate table with a fallback rate for unlisted cities.
///
/// City matching is case-insensitive on the trimmed name.
pub struct CityRateTable {
    rates: Vec<(String, Decimal)>,
    default_fee: Decimal,
}

impl CityRateTable {
    pub fn new(rates: Vec<(String, Decimal)>, default_fee: Decimal) -> Self {
        let rates = rates
            .into_iter()
            .map(|(city, fee)| (city.trim().to_lowercase(), money::round2(fee)))
            .collect();
        Self {
            rates,
            default_fee: money::round2(default_fee),
        }
    }

    /// The standard Kenyan delivery zones.
    pub fn kenyan_defaults() -> Self {
        Self::new(
            vec![
                ("Nairobi".to_string(), Decimal::new(300, 0)),
                ("Mombasa".to_string(), Decimal::new(500, 0)),
                ("Kisumu".to_string(), Decimal::new(500, 0)),
                ("Nakuru".to_string(), Decimal::new(400, 0)),
                ("Eldoret".to_string(), Decimal::new(450, 0)),
                ("Thika".to_string(), Decimal::new(350, 0)),
            ],
            Decimal::new(600, 0),
        )
    }
}

impl DeliveryEstimator for CityRateTable {
    fn fee_for_city(&self, city: &str) -> Decimal {
        let needle = city.trim().to_lowercase();
        self.rates
            .iter()
            .find(|(name, _)| *name == needle)
            .map(|(_, fee)| *fee)
            .unwrap_or(self.default_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn product(id: &str, price: Decimal, discount: Option<Decimal>) -> ProductInfo {
        ProductInfo {
            product_id: id.to_string(),
            name: format!("Product {id}"),
            sku: format!("SKU-{id}"),
            price,
            discount_price: discount,
            active: true,
        }
    }

    #[test]
    fn test_effective_price_prefers_discount() {
        let p = product("p1", dec(1200), Some(dec(950)));
        assert_eq!(p.effective_price(), dec(950));
        let p = product("p1", dec(1200), None);
        assert_eq!(p.effective_price(), dec(1200));
    }

    #[tokio::test]
    async fn test_static_catalog_lookup() {
        let catalog = StaticCatalog::new();
        catalog.insert(product("p1", dec(100), None));

        assert!(catalog.get_product("p1").await.is_some());
        assert!(catalog.get_product("p2").await.is_none());

        catalog.remove("p1");
        assert!(catalog.get_product("p1").await.is_none());
    }

    #[test]
    fn test_city_rate_table() {
        let table = CityRateTable::kenyan_defaults();
        assert_eq!(table.fee_for_city("Nairobi"), dec(300));
        assert_eq!(table.fee_for_city("  nairobi "), dec(300));
        assert_eq!(table.fee_for_city("Mombasa"), dec(500));
        // Unlisted cities get the fallback rate.
        assert_eq!(table.fee_for_city("Garissa"), dec(600));
    }
}

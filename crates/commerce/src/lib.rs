//! Storefront platform client.
//!
//! Thin wrapper over the Shopify Admin REST API used to pull order and
//! product context into the chat pipeline. Lookups are best-effort by
//! contract: callers treat any error as "no data available" and continue
//! without context.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use shopclerk_core::config::CommerceConfig;
use shopclerk_core::domain::commerce::{OrderRecord, ProductRecord};
use tracing::debug;

const MAX_PRODUCT_MATCHES: usize = 3;
const PRODUCT_FETCH_LIMIT: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum CommerceError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform returned status {status}")]
    Api { status: u16 },
    #[error("malformed platform response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// Looks an order up by customer-facing number. `Ok(None)` means the
    /// order does not exist for this shop; errors mean the platform could not
    /// be asked.
    async fn fetch_order(
        &self,
        shop: &str,
        access_token: &SecretString,
        order_number: &str,
    ) -> Result<Option<OrderRecord>, CommerceError>;

    /// Title/type search over the shop's catalog, top matches only.
    async fn fetch_products(
        &self,
        shop: &str,
        access_token: &SecretString,
        search_term: &str,
    ) -> Result<Vec<ProductRecord>, CommerceError>;
}

pub struct ShopifyClient {
    client: reqwest::Client,
    api_version: String,
}

#[derive(Deserialize)]
struct OrdersEnvelope {
    #[serde(default)]
    orders: Vec<OrderRecord>,
}

#[derive(Deserialize)]
struct ProductsEnvelope {
    #[serde(default)]
    products: Vec<ProductRecord>,
}

impl ShopifyClient {
    pub fn new(config: &CommerceConfig) -> Result<Self, CommerceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { client, api_version: config.api_version.clone() })
    }

    fn admin_url(&self, shop: &str, resource: &str) -> String {
        format!("https://{shop}/admin/api/{}/{resource}.json", self.api_version)
    }

    async fn get_orders_by_name(
        &self,
        shop: &str,
        access_token: &SecretString,
        name: &str,
    ) -> Result<Vec<OrderRecord>, CommerceError> {
        let response = self
            .client
            .get(self.admin_url(shop, "orders"))
            .header("X-Shopify-Access-Token", access_token.expose_secret())
            .query(&[("name", name), ("status", "any")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommerceError::Api { status: status.as_u16() });
        }

        let envelope: OrdersEnvelope = response
            .json()
            .await
            .map_err(|error| CommerceError::Decode(error.to_string()))?;
        Ok(envelope.orders)
    }
}

#[async_trait]
impl CommerceApi for ShopifyClient {
    async fn fetch_order(
        &self,
        shop: &str,
        access_token: &SecretString,
        order_number: &str,
    ) -> Result<Option<OrderRecord>, CommerceError> {
        let clean_number = order_number.trim_start_matches('#');

        debug!(event_name = "commerce.fetch_order", shop, order_number = clean_number, "order lookup");

        // Platforms differ on whether the stored name carries the `#`; try
        // the bare number first and the prefixed form second.
        let mut orders = self.get_orders_by_name(shop, access_token, clean_number).await?;
        if orders.is_empty() {
            orders = self
                .get_orders_by_name(shop, access_token, &format!("#{clean_number}"))
                .await?;
        }

        Ok(orders.into_iter().next())
    }

    async fn fetch_products(
        &self,
        shop: &str,
        access_token: &SecretString,
        search_term: &str,
    ) -> Result<Vec<ProductRecord>, CommerceError> {
        debug!(event_name = "commerce.fetch_products", shop, search_term, "product search");

        let response = self
            .client
            .get(self.admin_url(shop, "products"))
            .header("X-Shopify-Access-Token", access_token.expose_secret())
            .query(&[("limit", PRODUCT_FETCH_LIMIT)])
            .query(&[("fields", "id,title,body_html,variants,product_type")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CommerceError::Api { status: status.as_u16() });
        }

        let envelope: ProductsEnvelope = response
            .json()
            .await
            .map_err(|error| CommerceError::Decode(error.to_string()))?;

        Ok(filter_products(envelope.products, search_term))
    }
}

/// The products endpoint has no free-text search on this API surface, so
/// matching happens client-side against title and product type.
fn filter_products(products: Vec<ProductRecord>, search_term: &str) -> Vec<ProductRecord> {
    let needle = search_term.to_lowercase();
    products
        .into_iter()
        .filter(|product| {
            product.title.to_lowercase().contains(&needle)
                || product
                    .product_type
                    .as_deref()
                    .map(|kind| kind.to_lowercase().contains(&needle))
                    .unwrap_or(false)
        })
        .take(MAX_PRODUCT_MATCHES)
        .collect()
}

/// Fixed-response double for pipeline and handler tests.
#[derive(Default)]
pub struct StaticCommerce {
    pub order: Option<OrderRecord>,
    pub products: Vec<ProductRecord>,
    pub fail: bool,
}

#[async_trait]
impl CommerceApi for StaticCommerce {
    async fn fetch_order(
        &self,
        _shop: &str,
        _access_token: &SecretString,
        _order_number: &str,
    ) -> Result<Option<OrderRecord>, CommerceError> {
        if self.fail {
            return Err(CommerceError::Api { status: 503 });
        }
        Ok(self.order.clone())
    }

    async fn fetch_products(
        &self,
        _shop: &str,
        _access_token: &SecretString,
        _search_term: &str,
    ) -> Result<Vec<ProductRecord>, CommerceError> {
        if self.fail {
            return Err(CommerceError::Api { status: 503 });
        }
        Ok(self.products.clone())
    }
}

#[cfg(test)]
mod tests {
    use shopclerk_core::domain::commerce::ProductRecord;

    use super::filter_products;

    fn product(title: &str, product_type: Option<&str>) -> ProductRecord {
        ProductRecord {
            title: title.to_string(),
            product_type: product_type.map(|kind| kind.to_string()),
            ..ProductRecord::default()
        }
    }

    #[test]
    fn filters_by_title_or_type_case_insensitively() {
        let products = vec![
            product("Trail Sock", Some("Socks")),
            product("Rain Jacket", Some("Outerwear")),
            product("Wool Beanie", None),
        ];

        let socks = filter_products(products.clone(), "sock");
        assert_eq!(socks.len(), 1);
        assert_eq!(socks[0].title, "Trail Sock");

        let outerwear = filter_products(products, "OUTERWEAR");
        assert_eq!(outerwear.len(), 1);
        assert_eq!(outerwear[0].title, "Rain Jacket");
    }

    #[test]
    fn caps_matches_at_three() {
        let products = (0..6).map(|i| product(&format!("Sock {i}"), None)).collect();
        assert_eq!(filter_products(products, "sock").len(), 3);
    }
}

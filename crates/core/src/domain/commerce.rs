use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order and product records as returned by the storefront platform's Admin
/// API. Field names follow the platform's JSON so the commerce client can
/// deserialize responses directly; money amounts stay in the provider's
/// string form because they are only ever echoed into prompts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub quantity: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Fulfillment {
    pub status: String,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub tracking_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    /// Customer-facing order name, usually `#` + order number.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub financial_status: String,
    #[serde(default)]
    pub fulfillment_status: Option<String>,
    pub currency: String,
    pub total_price: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub fulfillments: Vec<Fulfillment>,
}

impl OrderRecord {
    /// The order number without the `#` the platform prepends to names.
    pub fn number(&self) -> &str {
        self.name.strip_prefix('#').unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub price: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub body_html: Option<String>,
    #[serde(default)]
    pub product_type: Option<String>,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

impl ProductRecord {
    pub fn first_variant_price(&self) -> Option<&str> {
        self.variants.first().map(|variant| variant.price.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{OrderRecord, ProductRecord, ProductVariant};

    #[test]
    fn order_number_strips_leading_hash() {
        let order: OrderRecord = serde_json::from_str(
            r##"{
                "id": 820982911946154500,
                "name": "#4521",
                "created_at": "2026-07-02T09:15:00Z",
                "financial_status": "paid",
                "fulfillment_status": "fulfilled",
                "currency": "USD",
                "total_price": "89.90",
                "line_items": [{"quantity": 2, "name": "Trail Sock"}]
            }"##,
        )
        .expect("deserialize order");

        assert_eq!(order.number(), "4521");
        assert_eq!(order.line_items[0].quantity, 2);
        assert!(order.fulfillments.is_empty());
    }

    #[test]
    fn first_variant_price_handles_missing_variants() {
        let bare = ProductRecord { title: "Gift Card".to_string(), ..ProductRecord::default() };
        assert_eq!(bare.first_variant_price(), None);

        let priced = ProductRecord {
            title: "Trail Sock".to_string(),
            variants: vec![ProductVariant { price: "14.50".to_string() }],
            ..ProductRecord::default()
        };
        assert_eq!(priced.first_variant_price(), Some("14.50"));
    }
}

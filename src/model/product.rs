use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Product as written to the `products` collection.
///
/// Carries its category's name by value so the mobile app can render a
/// product list without a second lookup; the category itself still owns the
/// `categories` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub product_id: i64,
    pub barcode: Option<String>,
    pub name: String,
    pub description: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub purchase_price: bson::Decimal128,
    pub sale_price: bson::Decimal128,
    pub current_stock: f64,
    pub minimum_stock: f64,
    pub supplier_id: Option<i64>,
    pub is_active: bool,
    pub created_at: bson::DateTime,
    pub speed: Option<String>,
    pub updated_at: Option<bson::DateTime>,
    pub image_path: Option<String>,
}

impl ProductDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

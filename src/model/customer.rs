use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Customer as written to the `customers` collection. Transactions refer to
/// customers by id only; nothing is embedded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub customer_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: bson::DateTime,
    pub updated_at: Option<bson::DateTime>,
    pub balance: bson::Decimal128,
}

impl CustomerDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

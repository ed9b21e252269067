use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Category as written to the `categories` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub category_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(rename = "type")]
    pub category_type: Option<String>,
}

impl CategoryDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Key/value configuration row as written to the `business_settings`
/// collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSettingDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub setting_id: i64,
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub group: String,
    pub data_type: String,
    pub is_system: bool,
    pub last_modified: bson::DateTime,
    pub modified_by: Option<String>,
}

impl BusinessSettingDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Expense as written to the `expenses` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub expense_id: i64,
    pub reason: String,
    pub amount: bson::Decimal128,
    pub date: bson::DateTime,
    pub notes: Option<String>,
    pub category: Option<String>,
    pub is_recurring: bool,
    pub created_at: bson::DateTime,
    pub updated_at: Option<bson::DateTime>,
}

impl ExpenseDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

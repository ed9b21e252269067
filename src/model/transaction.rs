//! Sales transaction documents and their integer-coded enums.
//!
//! The source stores `TransactionType` and `Status` as integers; consumers
//! get the string names. Codes outside the known range serialize as
//! `Unknown(<n>)` so a poison value is visible instead of dropping the row.

use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Largest transaction document the target store accepts. Documents over
/// this limit are written without their line items so a repair pass can
/// find them later via `detailsRemovedForSize`.
pub const MAX_DOCUMENT_BYTES: usize = 15 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Sale,
    Purchase,
    Adjustment,
    Unknown(i64),
}

impl TransactionType {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Sale,
            1 => Self::Purchase,
            2 => Self::Adjustment,
            n => Self::Unknown(n),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Sale => "Sale".to_string(),
            Self::Purchase => "Purchase".to_string(),
            Self::Adjustment => "Adjustment".to_string(),
            Self::Unknown(n) => format!("Unknown({n})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
    Unknown(i64),
}

impl TransactionStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Pending,
            1 => Self::Completed,
            2 => Self::Cancelled,
            n => Self::Unknown(n),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::Pending => "Pending".to_string(),
            Self::Completed => "Completed".to_string(),
            Self::Cancelled => "Cancelled".to_string(),
            Self::Unknown(n) => format!("Unknown({n})"),
        }
    }
}

/// Sales transaction as written to the `transactions` collection, line items
/// embedded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub transaction_id: i64,
    pub customer_id: Option<i64>,
    pub customer_name: Option<String>,
    pub total_amount: bson::Decimal128,
    pub paid_amount: bson::Decimal128,
    pub transaction_date: bson::DateTime,
    pub transaction_type: String,
    pub status: String,
    pub payment_method: Option<String>,
    pub cashier_id: Option<i64>,
    pub cashier_name: Option<String>,
    pub cashier_role: Option<String>,
    pub created_date: bson::DateTime,
    pub modified_date: bson::DateTime,
    pub transaction_details: Vec<TransactionDetailDoc>,
    #[serde(skip_serializing_if = "is_false", default)]
    pub details_removed_for_size: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub original_detail_count: Option<i64>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One line item, embedded in its transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetailDoc {
    pub transaction_detail_id: i64,
    pub transaction_id: i64,
    pub product_id: Option<i64>,
    pub quantity: f64,
    pub unit_price: bson::Decimal128,
    pub purchase_price: bson::Decimal128,
    pub discount: bson::Decimal128,
    pub total: bson::Decimal128,
}

impl TransactionDoc {
    /// Serialize, enforcing the per-document size ceiling. An oversized
    /// transaction is written without its line items, flagged with the
    /// original child count.
    pub fn into_sized_document(mut self) -> anyhow::Result<bson::Document> {
        let bytes = bson::to_vec(&self)?;
        if bytes.len() <= MAX_DOCUMENT_BYTES {
            return Ok(bson::to_document(&self)?);
        }

        tracing::warn!(
            "Transaction {} exceeds {} bytes ({}); dropping {} embedded details",
            self.transaction_id,
            MAX_DOCUMENT_BYTES,
            bytes.len(),
            self.transaction_details.len()
        );
        self.original_detail_count = Some(self.transaction_details.len() as i64);
        self.details_removed_for_size = true;
        self.transaction_details.clear();
        Ok(bson::to_document(&self)?)
    }
}

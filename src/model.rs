//! Target document types.
//!
//! One struct per MongoDB collection, shaped the way the read-side consumers
//! expect them: `_id` mirrors the source primary key, a redundant named key
//! field (`productId`, ...) is kept for caller convenience, money rides as
//! Decimal128, timestamps as BSON UTC datetimes. The loader stamps `syncedAt`
//! at write time, so the structs here do not carry it.

pub mod business_setting;
pub mod category;
pub mod customer;
pub mod employee;
pub mod expense;
pub mod product;
pub mod sync_log;
pub mod transaction;

pub use business_setting::BusinessSettingDoc;
pub use category::CategoryDoc;
pub use customer::CustomerDoc;
pub use employee::{EmployeeDoc, SalaryTransactionDoc};
pub use expense::ExpenseDoc;
pub use product::ProductDoc;
pub use sync_log::SyncLogDoc;
pub use transaction::{TransactionDetailDoc, TransactionDoc, TransactionStatus, TransactionType};

use anyhow::Context;
use chrono::{DateTime, Utc};
use mongodb::bson;
use rust_decimal::Decimal;

/// Exact-decimal bridge: MySQL DECIMAL -> rust_decimal -> BSON Decimal128.
pub fn money(value: Decimal) -> anyhow::Result<bson::Decimal128> {
    value
        .to_string()
        .parse::<bson::Decimal128>()
        .with_context(|| format!("Decimal {value} not representable as Decimal128"))
}

pub fn opt_money(value: Option<Decimal>) -> anyhow::Result<Option<bson::Decimal128>> {
    value.map(money).transpose()
}

pub fn bson_dt(at: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_chrono(at)
}

pub fn opt_bson_dt(at: Option<DateTime<Utc>>) -> Option<bson::DateTime> {
    at.map(bson_dt)
}

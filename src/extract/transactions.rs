//! Sales-transaction extraction with embedded line items.
//!
//! Rows are filtered on `ModifiedDate` and `IsDeleted = 0`; the deletion
//! sweep surfaces ids flagged `IsDeleted = 1` since the cursor so the engine
//! can remove them from the target before the insert phase. Every emitted
//! transaction embeds all of its line items, subject to the per-document
//! size ceiling.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Conn, Pool, Row, Value};
use tracing::warn;

use super::{in_placeholders, ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::transaction::{TransactionStatus, TransactionType};
use crate::model::{bson_dt, money, TransactionDetailDoc, TransactionDoc};
use crate::mysql::{
    get_datetime, get_decimal, get_f64, get_i64, get_opt_datetime, get_opt_i64, get_opt_string,
    to_sql_datetime,
};

const CHANGED_SQL: &str = "\
    SELECT TransactionId, CustomerId, CustomerName, TotalAmount, PaidAmount, TransactionDate, \
           TransactionType, Status, PaymentMethod, CashierId, CashierName, CashierRole, \
           CreatedDate, ModifiedDate \
    FROM Transactions \
    WHERE IsDeleted = 0 \
      AND (ModifiedDate > ? OR (ModifiedDate = ? AND TransactionId > ?)) \
    ORDER BY ModifiedDate, TransactionId \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT TransactionId FROM Transactions WHERE IsDeleted = 0";

const SOFT_DELETED_SQL: &str =
    "SELECT TransactionId FROM Transactions WHERE IsDeleted = 1 AND ModifiedDate > ?";

pub struct TransactionExtractor {
    pool: Pool,
}

impl TransactionExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for TransactionExtractor {
    fn entity(&self) -> Entity {
        Entity::Transactions
    }

    async fn changed_page(
        &self,
        cursor: ChangeCursor,
        batch_size: usize,
    ) -> anyhow::Result<ChangedPage> {
        let mut conn = self.pool.get_conn().await?;
        let since = to_sql_datetime(cursor.since);
        let rows: Vec<Row> = conn
            .exec(
                CHANGED_SQL,
                (since.clone(), since, cursor.after_id, batch_size as u64),
            )
            .await?;

        let transaction_ids: Vec<i64> = rows
            .iter()
            .filter_map(|row| get_i64(row, "TransactionId").ok())
            .collect();
        let mut details = fetch_details(&mut conn, &transaction_ids).await?;

        let mut page = ChangedPage::default();
        for row in rows {
            let id = get_i64(&row, "TransactionId")?;
            page.last_key = Some(PageKey {
                id,
                marker: get_opt_datetime(&row, "ModifiedDate").ok().flatten(),
            });
            let items = details.remove(&id).unwrap_or_default();
            match project(&row, id, items) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping transaction {id}: {e}");
                    page.skipped += 1;
                }
            }
        }
        Ok(page)
    }

    async fn live_ids(&self) -> anyhow::Result<HashSet<i64>> {
        let mut conn = self.pool.get_conn().await?;
        let ids: Vec<i64> = conn.query(LIVE_SQL).await?;
        Ok(ids.into_iter().collect())
    }

    async fn soft_deleted_ids(&self, since: DateTime<Utc>) -> anyhow::Result<Vec<i64>> {
        let mut conn = self.pool.get_conn().await?;
        let ids: Vec<i64> = conn
            .exec(SOFT_DELETED_SQL, (to_sql_datetime(since),))
            .await?;
        Ok(ids)
    }
}

/// All line items for the given transactions, keyed by transaction id.
/// Callable repeatedly within a pass; the backfill reuses it per window.
pub async fn fetch_details(
    conn: &mut Conn,
    transaction_ids: &[i64],
) -> anyhow::Result<HashMap<i64, Vec<TransactionDetailDoc>>> {
    if transaction_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let query = format!(
        "SELECT TransactionDetailId, TransactionId, ProductId, Quantity, UnitPrice, \
                PurchasePrice, Discount, Total \
         FROM TransactionDetails \
         WHERE TransactionId IN ({}) \
         ORDER BY TransactionId, TransactionDetailId",
        in_placeholders(transaction_ids.len())
    );
    let params: Vec<Value> = transaction_ids.iter().map(|id| Value::Int(*id)).collect();
    let rows: Vec<Row> = conn.exec(query, params).await?;

    let mut grouped: HashMap<i64, Vec<TransactionDetailDoc>> = HashMap::new();
    for row in rows {
        let transaction_id = get_i64(&row, "TransactionId")?;
        grouped
            .entry(transaction_id)
            .or_default()
            .push(TransactionDetailDoc {
                transaction_detail_id: get_i64(&row, "TransactionDetailId")?,
                transaction_id,
                product_id: get_opt_i64(&row, "ProductId")?,
                quantity: get_f64(&row, "Quantity")?,
                unit_price: money(get_decimal(&row, "UnitPrice")?)?,
                purchase_price: money(get_decimal(&row, "PurchasePrice")?)?,
                discount: money(get_decimal(&row, "Discount")?)?,
                total: money(get_decimal(&row, "Total")?)?,
            });
    }
    Ok(grouped)
}

/// Project one source row plus its line items into a target document,
/// enforcing the size ceiling.
pub fn project(
    row: &Row,
    id: i64,
    details: Vec<TransactionDetailDoc>,
) -> anyhow::Result<ChangedDoc> {
    let marker = get_datetime(row, "ModifiedDate")?;
    let doc = TransactionDoc {
        id,
        transaction_id: id,
        customer_id: get_opt_i64(row, "CustomerId")?,
        customer_name: get_opt_string(row, "CustomerName")?,
        total_amount: money(get_decimal(row, "TotalAmount")?)?,
        paid_amount: money(get_decimal(row, "PaidAmount")?)?,
        transaction_date: bson_dt(get_datetime(row, "TransactionDate")?),
        transaction_type: TransactionType::from_code(get_i64(row, "TransactionType")?).label(),
        status: TransactionStatus::from_code(get_i64(row, "Status")?).label(),
        payment_method: get_opt_string(row, "PaymentMethod")?,
        cashier_id: get_opt_i64(row, "CashierId")?,
        cashier_name: get_opt_string(row, "CashierName")?,
        cashier_role: get_opt_string(row, "CashierRole")?,
        created_date: bson_dt(get_datetime(row, "CreatedDate")?),
        modified_date: bson_dt(marker),
        transaction_details: details,
        details_removed_for_size: false,
        original_detail_count: None,
    };
    Ok(ChangedDoc {
        id,
        marker: Some(marker),
        doc: doc.into_sized_document()?,
    })
}

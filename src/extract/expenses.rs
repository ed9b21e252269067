//! Expense extraction. Expenses have no soft-delete marker; removal from the
//! live set is the only deletion signal.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use super::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::{bson_dt, money, opt_bson_dt, ExpenseDoc};
use crate::mysql::{
    get_bool, get_datetime, get_decimal, get_i64, get_opt_datetime, get_opt_string, get_string,
    to_sql_datetime,
};

const CHANGED_SQL: &str = "\
    SELECT ExpenseId, Reason, Amount, Date, Notes, Category, IsRecurring, CreatedAt, UpdatedAt, \
           COALESCE(UpdatedAt, CreatedAt) AS Marker \
    FROM Expenses \
    WHERE (COALESCE(UpdatedAt, CreatedAt) > ? \
           OR (COALESCE(UpdatedAt, CreatedAt) = ? AND ExpenseId > ?)) \
    ORDER BY Marker, ExpenseId \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT ExpenseId FROM Expenses";

pub struct ExpenseExtractor {
    pool: Pool,
}

impl ExpenseExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for ExpenseExtractor {
    fn entity(&self) -> Entity {
        Entity::Expenses
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

        let mut page = ChangedPage::default();
        for row in rows {
            let id = get_i64(&row, "ExpenseId")?;
            page.last_key = Some(PageKey {
                id,
                marker: get_opt_datetime(&row, "Marker").ok().flatten(),
            });
            match project(&row, id) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping expense {id}: {e}");
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
}

fn project(row: &Row, id: i64) -> anyhow::Result<ChangedDoc> {
    let marker = get_datetime(row, "Marker")?;
    let doc = ExpenseDoc {
        id,
        expense_id: id,
        reason: get_string(row, "Reason")?,
        amount: money(get_decimal(row, "Amount")?)?,
        date: bson_dt(get_datetime(row, "Date")?),
        notes: get_opt_string(row, "Notes")?,
        category: get_opt_string(row, "Category")?,
        is_recurring: get_bool(row, "IsRecurring")?,
        created_at: bson_dt(get_datetime(row, "CreatedAt")?),
        updated_at: opt_bson_dt(get_opt_datetime(row, "UpdatedAt")?),
    };
    Ok(ChangedDoc {
        id,
        marker: Some(marker),
        doc: doc.into_document()?,
    })
}

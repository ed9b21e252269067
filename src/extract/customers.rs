//! Customer extraction. Same marker rule as products: `UpdatedAt` falling
//! back to `CreatedAt`.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use super::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::{bson_dt, money, opt_bson_dt, CustomerDoc};
use crate::mysql::{
    get_bool, get_datetime, get_decimal, get_i64, get_opt_datetime, get_opt_string, get_string,
    to_sql_datetime,
};

const CHANGED_SQL: &str = "\
    SELECT CustomerId, Name, Phone, Email, Address, IsActive, CreatedAt, UpdatedAt, Balance, \
           COALESCE(UpdatedAt, CreatedAt) AS Marker \
    FROM Customers \
    WHERE IsActive = 1 \
      AND (COALESCE(UpdatedAt, CreatedAt) > ? \
           OR (COALESCE(UpdatedAt, CreatedAt) = ? AND CustomerId > ?)) \
    ORDER BY Marker, CustomerId \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT CustomerId FROM Customers WHERE IsActive = 1";

pub struct CustomerExtractor {
    pool: Pool,
}

impl CustomerExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for CustomerExtractor {
    fn entity(&self) -> Entity {
        Entity::Customers
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
            let id = get_i64(&row, "CustomerId")?;
            page.last_key = Some(PageKey {
                id,
                marker: get_opt_datetime(&row, "Marker").ok().flatten(),
            });
            match project(&row, id) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping customer {id}: {e}");
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
    let doc = CustomerDoc {
        id,
        customer_id: id,
        name: get_string(row, "Name")?,
        phone: get_opt_string(row, "Phone")?,
        email: get_opt_string(row, "Email")?,
        address: get_opt_string(row, "Address")?,
        is_active: get_bool(row, "IsActive")?,
        created_at: bson_dt(get_datetime(row, "CreatedAt")?),
        updated_at: opt_bson_dt(get_opt_datetime(row, "UpdatedAt")?),
        balance: money(get_decimal(row, "Balance")?)?,
    };
    Ok(ChangedDoc {
        id,
        marker: Some(marker),
        doc: doc.into_document()?,
    })
}

//! Product extraction.
//!
//! The modification marker is `UpdatedAt` falling back to `CreatedAt`, so a
//! row that has never been edited is picked up by its creation time. The
//! category name is joined in by value; read-side consumers render product
//! lists without touching `categories`.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use super::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::{bson_dt, money, opt_bson_dt, ProductDoc};
use crate::mysql::{
    get_bool, get_datetime, get_decimal, get_f64, get_i64, get_opt_datetime, get_opt_i64,
    get_opt_string, get_string, to_sql_datetime,
};

const CHANGED_SQL: &str = "\
    SELECT p.ProductId, p.Barcode, p.Name, p.Description, p.CategoryId, c.Name AS CategoryName, \
           p.PurchasePrice, p.SalePrice, p.CurrentStock, p.MinimumStock, p.SupplierId, \
           p.IsActive, p.CreatedAt, p.Speed, p.UpdatedAt, p.ImagePath, \
           COALESCE(p.UpdatedAt, p.CreatedAt) AS Marker \
    FROM Products p \
    LEFT JOIN Categories c ON c.CategoryId = p.CategoryId \
    WHERE p.IsActive = 1 \
      AND (COALESCE(p.UpdatedAt, p.CreatedAt) > ? \
           OR (COALESCE(p.UpdatedAt, p.CreatedAt) = ? AND p.ProductId > ?)) \
    ORDER BY Marker, p.ProductId \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT ProductId FROM Products WHERE IsActive = 1";

pub struct ProductExtractor {
    pool: Pool,
}

impl ProductExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for ProductExtractor {
    fn entity(&self) -> Entity {
        Entity::Products
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
            let id = get_i64(&row, "ProductId")?;
            page.last_key = Some(PageKey {
                id,
                marker: get_opt_datetime(&row, "Marker").ok().flatten(),
            });
            match project(&row, id) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping product {id}: {e}");
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
    let doc = ProductDoc {
        id,
        product_id: id,
        barcode: get_opt_string(row, "Barcode")?,
        name: get_string(row, "Name")?,
        description: get_string(row, "Description")?,
        category_id: get_opt_i64(row, "CategoryId")?,
        category_name: get_opt_string(row, "CategoryName")?,
        purchase_price: money(get_decimal(row, "PurchasePrice")?)?,
        sale_price: money(get_decimal(row, "SalePrice")?)?,
        current_stock: get_f64(row, "CurrentStock")?,
        minimum_stock: get_f64(row, "MinimumStock")?,
        supplier_id: get_opt_i64(row, "SupplierId")?,
        is_active: get_bool(row, "IsActive")?,
        created_at: bson_dt(get_datetime(row, "CreatedAt")?),
        speed: get_opt_string(row, "Speed")?,
        updated_at: opt_bson_dt(get_opt_datetime(row, "UpdatedAt")?),
        image_path: get_opt_string(row, "ImagePath")?,
    };
    Ok(ChangedDoc {
        id,
        marker: Some(marker),
        doc: doc.into_document()?,
    })
}

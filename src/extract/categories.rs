//! Category extraction. Small table, no modification marker: every pass
//! re-reads the full live snapshot, paged by id only.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use super::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::CategoryDoc;
use crate::mysql::{get_bool, get_i64, get_opt_string, get_string};

const CHANGED_SQL: &str = "\
    SELECT CategoryId, Name, Description, IsActive, Type \
    FROM Categories \
    WHERE IsActive = 1 AND CategoryId > ? \
    ORDER BY CategoryId \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT CategoryId FROM Categories WHERE IsActive = 1";

pub struct CategoryExtractor {
    pool: Pool,
}

impl CategoryExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for CategoryExtractor {
    fn entity(&self) -> Entity {
        Entity::Categories
    }

    fn snapshot(&self) -> bool {
        true
    }

    async fn changed_page(
        &self,
        cursor: ChangeCursor,
        batch_size: usize,
    ) -> anyhow::Result<ChangedPage> {
        let mut conn = self.pool.get_conn().await?;
        let rows: Vec<Row> = conn
            .exec(CHANGED_SQL, (cursor.after_id, batch_size as u64))
            .await?;

        let mut page = ChangedPage::default();
        for row in rows {
            let id = get_i64(&row, "CategoryId")?;
            page.last_key = Some(PageKey { id, marker: None });
            match project(&row, id) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping category {id}: {e}");
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
    let doc = CategoryDoc {
        id,
        category_id: id,
        name: get_string(row, "Name")?,
        description: get_opt_string(row, "Description")?,
        is_active: get_bool(row, "IsActive")?,
        category_type: get_opt_string(row, "Type")?,
    };
    Ok(ChangedDoc {
        id,
        marker: None,
        doc: doc.into_document()?,
    })
}

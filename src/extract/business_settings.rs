//! Business-settings extraction. Small table; still filtered by
//! `LastModified` so an unchanged settings table costs one empty query.
//! `Key`, `Value` and `Group` are reserved words, hence the backticks.

use std::collections::HashSet;

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use super::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use crate::model::{bson_dt, BusinessSettingDoc};
use crate::mysql::{
    get_bool, get_datetime, get_i64, get_opt_datetime, get_opt_string, get_string, to_sql_datetime,
};

const CHANGED_SQL: &str = "\
    SELECT `Id`, `Key`, `Value`, `Description`, `Group`, `DataType`, `IsSystem`, \
           `LastModified`, `ModifiedBy` \
    FROM BusinessSettings \
    WHERE (`LastModified` > ? OR (`LastModified` = ? AND `Id` > ?)) \
    ORDER BY `LastModified`, `Id` \
    LIMIT ?";

const LIVE_SQL: &str = "SELECT `Id` FROM BusinessSettings";

pub struct BusinessSettingExtractor {
    pool: Pool,
}

impl BusinessSettingExtractor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Extractor for BusinessSettingExtractor {
    fn entity(&self) -> Entity {
        Entity::BusinessSettings
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
            let id = get_i64(&row, "Id")?;
            page.last_key = Some(PageKey {
                id,
                marker: get_opt_datetime(&row, "LastModified").ok().flatten(),
            });
            match project(&row, id) {
                Ok(changed) => page.docs.push(changed),
                Err(e) => {
                    warn!("Skipping business setting {id}: {e}");
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
    let marker = get_datetime(row, "LastModified")?;
    let doc = BusinessSettingDoc {
        id,
        setting_id: id,
        key: get_string(row, "Key")?,
        value: get_string(row, "Value")?,
        description: get_opt_string(row, "Description")?,
        group: get_string(row, "Group")?,
        data_type: get_string(row, "DataType")?,
        is_system: get_bool(row, "IsSystem")?,
        last_modified: bson_dt(marker),
        modified_by: get_opt_string(row, "ModifiedBy")?,
    };
    Ok(ChangedDoc {
        id,
        marker: Some(marker),
        doc: doc.into_document()?,
    })
}

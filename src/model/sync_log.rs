use mongodb::bson;
use serde::{Deserialize, Serialize};

/// Outcome of one pass, inserted (never upserted) into `sync_logs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogDoc {
    pub device_id: String,
    pub entity_type: String,
    pub last_sync_time: bson::DateTime,
    pub is_success: bool,
    pub records_synced: i64,
    pub records_deleted: i64,
    pub rows_skipped: i64,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl SyncLogDoc {
    pub fn into_document(self) -> anyhow::Result<bson::Document> {
        Ok(bson::to_document(&self)?)
    }
}

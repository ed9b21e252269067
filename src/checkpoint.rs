//! Durable per-(device, entity) cursor state.
//!
//! Checkpoints live in a `SyncCheckpoints` table inside the MySQL source
//! itself, so advancing the cursor is transactional with reading the rows it
//! covers. The store is the sole source of truth for "where we were": the
//! engine advances it only after the target has acknowledged a batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::warn;

use crate::extract::Entity;
use crate::mysql::{get_datetime, get_opt_i64, get_opt_string, get_string, to_sql_datetime};

/// Payload sentinel written when the historical backfill has covered the
/// whole transaction history.
pub const BACKFILL_COMPLETED: &str = "COMPLETED";

/// Payload prefix recording the last calendar day the backfill processed.
pub const PROCESSED_DATE_PREFIX: &str = "ProcessedDate:";

#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub device_id: String,
    pub entity_type: String,
    /// Largest modification marker whose rows are known written.
    pub last_sync_time: DateTime<Utc>,
    /// Id of the last acknowledged row at `last_sync_time`; breaks ties when
    /// a page boundary lands inside a group of equal markers.
    pub last_record_id: Option<i64>,
    /// Opaque free-form state; the backfill keeps its progress here.
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn backfill_completed(&self) -> bool {
        self.payload.as_deref() == Some(BACKFILL_COMPLETED)
    }
}

/// Storage contract for checkpoints. `get` never fails into the engine: a
/// broken store reads as "no checkpoint", which only widens the replay
/// window. `upsert` must be atomic and durable on return, and must never
/// regress `last_sync_time`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, device_id: &str, entity: Entity) -> Option<Checkpoint>;

    async fn upsert(
        &self,
        device_id: &str,
        entity: Entity,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Record when the deletion reconciliation last ran for the pair.
    async fn mark_delete_check(
        &self,
        device_id: &str,
        entity: Entity,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

const GET_SQL: &str = "\
    SELECT DeviceId, EntityType, LastSyncTime, LastRecordId, CheckpointData, CreatedAt, UpdatedAt \
    FROM SyncCheckpoints \
    WHERE DeviceId = ? AND EntityType = ?";

// GREATEST keeps a concurrent writer from regressing the high water mark;
// COALESCE keeps touch-only updates from clearing the cursor id or payload.
const UPSERT_SQL: &str = "\
    INSERT INTO SyncCheckpoints \
        (DeviceId, EntityType, LastSyncTime, LastRecordId, CheckpointData, CreatedAt, UpdatedAt) \
    VALUES (?, ?, ?, ?, ?, NOW(6), NOW(6)) \
    ON DUPLICATE KEY UPDATE \
        LastSyncTime = GREATEST(LastSyncTime, VALUES(LastSyncTime)), \
        LastRecordId = COALESCE(VALUES(LastRecordId), LastRecordId), \
        CheckpointData = COALESCE(VALUES(CheckpointData), CheckpointData), \
        UpdatedAt = NOW(6)";

const MARK_DELETE_SQL: &str = "\
    UPDATE SyncCheckpoints SET LastDeleteCheck = ?, UpdatedAt = NOW(6) \
    WHERE DeviceId = ? AND EntityType = ?";

const SCHEMA_SQL: &str = "\
    CREATE TABLE IF NOT EXISTS SyncCheckpoints ( \
        Id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY, \
        DeviceId VARCHAR(100) NOT NULL, \
        EntityType VARCHAR(50) NOT NULL, \
        LastSyncTime DATETIME(6) NOT NULL, \
        LastRecordId BIGINT NULL, \
        LastDeleteCheck DATETIME(6) NULL, \
        CheckpointData TEXT NULL, \
        CreatedAt DATETIME(6) NOT NULL, \
        UpdatedAt DATETIME(6) NOT NULL, \
        UNIQUE KEY UxSyncCheckpointsDeviceEntity (DeviceId, EntityType) \
    )";

/// Checkpoint store backed by the source database.
pub struct MySqlCheckpointStore {
    pool: Pool,
}

impl MySqlCheckpointStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the `SyncCheckpoints` table if the source has never hosted a
    /// sync service before.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop(SCHEMA_SQL).await?;
        Ok(())
    }

    async fn get_inner(&self, device_id: &str, entity: Entity) -> anyhow::Result<Option<Checkpoint>> {
        let mut conn = self.pool.get_conn().await?;
        let row: Option<Row> = conn.exec_first(GET_SQL, (device_id, entity.key())).await?;
        row.map(|row| {
            Ok(Checkpoint {
                device_id: get_string(&row, "DeviceId")?,
                entity_type: get_string(&row, "EntityType")?,
                last_sync_time: get_datetime(&row, "LastSyncTime")?,
                last_record_id: get_opt_i64(&row, "LastRecordId")?,
                payload: get_opt_string(&row, "CheckpointData")?,
                created_at: get_datetime(&row, "CreatedAt")?,
                updated_at: get_datetime(&row, "UpdatedAt")?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl CheckpointStore for MySqlCheckpointStore {
    async fn get(&self, device_id: &str, entity: Entity) -> Option<Checkpoint> {
        match self.get_inner(device_id, entity).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Failed to read checkpoint for {device_id}/{entity}: {e}");
                None
            }
        }
    }

    async fn upsert(
        &self,
        device_id: &str,
        entity: Entity,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            UPSERT_SQL,
            (
                device_id,
                entity.key(),
                to_sql_datetime(last_sync_time),
                last_record_id,
                payload,
            ),
        )
        .await?;
        Ok(())
    }

    async fn mark_delete_check(
        &self,
        device_id: &str,
        entity: Entity,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.exec_drop(
            MARK_DELETE_SQL,
            (to_sql_datetime(at), device_id, entity.key()),
        )
        .await?;
        Ok(())
    }
}

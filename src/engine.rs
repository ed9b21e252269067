//! One incremental pass for one `(device, entity)` pair.
//!
//! The pass reads its checkpoint, reconciles deletions before any insert
//! (so a delete-then-recreate with the same id ends up present), then walks
//! changed rows in `(marker, id)` order, upserting in bounded batches and
//! advancing the checkpoint only after the target has acknowledged the
//! batch. An interrupted pass replays at most one acknowledged-but-not-yet-
//! checkpointed batch; upserts are idempotent by `_id`, so replay is safe.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::SyncTuning;
use crate::extract::{ChangeCursor, Entity, Extractor};
use crate::load::DocumentSink;
use crate::model::{bson_dt, SyncLogDoc};

/// Outcome of one pass, reported to the scheduler and to `sync_logs`.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub entity: Entity,
    pub records_synced: u64,
    pub records_deleted: u64,
    pub rows_skipped: u64,
    /// High water mark at the end of the pass.
    pub last_sync_time: DateTime<Utc>,
    pub elapsed: Duration,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
struct PassStats {
    synced: u64,
    deleted: u64,
    skipped: u64,
}

/// Replay window start for a pass.
///
/// With a checkpoint the pass resumes from its high water mark; once the
/// transaction backfill has recorded completion, a stale transaction
/// checkpoint is narrowed to the recent window since history is known
/// covered. Without a checkpoint the default window applies, floored by the
/// replay horizon so a first run against an old database stays bounded.
pub fn resolve_since(
    entity: Entity,
    checkpoint: Option<&Checkpoint>,
    tuning: &SyncTuning,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match checkpoint {
        Some(cp) => {
            if entity == Entity::Transactions && cp.backfill_completed() {
                cp.last_sync_time
                    .max(now - chrono::Duration::days(tuning.recent_window_days))
            } else {
                cp.last_sync_time
            }
        }
        None => {
            let horizon = now - chrono::Duration::days(tuning.max_replay_horizon_days);
            (now - chrono::Duration::days(tuning.default_window_days)).max(horizon)
        }
    }
}

/// Run one incremental pass. Never panics and never returns `Err`: every
/// failure lands in the [`SyncResult`] so sibling entities still run.
pub async fn run_pass(
    device_id: &str,
    extractor: &dyn Extractor,
    sink: &dyn DocumentSink,
    checkpoints: &dyn CheckpointStore,
    tuning: &SyncTuning,
) -> SyncResult {
    let entity = extractor.entity();
    let started = Instant::now();
    let mut stats = PassStats::default();
    let mut last_sync_time = Utc::now();

    let outcome = pass_inner(
        device_id,
        extractor,
        sink,
        checkpoints,
        tuning,
        &mut stats,
        &mut last_sync_time,
    )
    .await;

    let result = SyncResult {
        entity,
        records_synced: stats.synced,
        records_deleted: stats.deleted,
        rows_skipped: stats.skipped,
        last_sync_time,
        elapsed: started.elapsed(),
        success: outcome.is_ok(),
        error: outcome.err().map(|e| format!("{e:#}")),
    };

    match &result.error {
        None => info!(
            "Synced {entity}: {} written, {} deleted, {} skipped in {:?}",
            result.records_synced, result.records_deleted, result.rows_skipped, result.elapsed
        ),
        Some(e) => warn!("Pass for {entity} failed: {e}"),
    }

    let log = SyncLogDoc {
        device_id: device_id.to_string(),
        entity_type: entity.key().to_string(),
        last_sync_time: bson_dt(result.last_sync_time),
        is_success: result.success,
        records_synced: result.records_synced as i64,
        records_deleted: result.records_deleted as i64,
        rows_skipped: result.rows_skipped as i64,
        duration_ms: result.elapsed.as_millis() as i64,
        error_message: result.error.clone(),
    };
    if let Err(e) = sink.insert_sync_log(log).await {
        warn!("Failed to record sync log for {entity}: {e}");
    }

    result
}

async fn pass_inner(
    device_id: &str,
    extractor: &dyn Extractor,
    sink: &dyn DocumentSink,
    checkpoints: &dyn CheckpointStore,
    tuning: &SyncTuning,
    stats: &mut PassStats,
    last_sync_time: &mut DateTime<Utc>,
) -> anyhow::Result<()> {
    let entity = extractor.entity();
    let collection = entity.collection();
    let now = Utc::now();

    let checkpoint = checkpoints.get(device_id, entity).await;
    let since = resolve_since(entity, checkpoint.as_ref(), tuning, now);
    *last_sync_time = since;

    // Resume mid-tie only when the stored cursor id still belongs to the
    // window we are about to read.
    let after_id = match (&checkpoint, extractor.snapshot()) {
        (Some(cp), false) if cp.last_sync_time == since => cp.last_record_id,
        _ => None,
    };
    let mut cursor = ChangeCursor::start(since, after_id);
    debug!("Starting {entity} pass from {since} (after id {:?})", after_id);

    // Deletion reconciliation runs before inserts so a row deleted and
    // re-created under the same id ends up present.
    let live = extractor.live_ids().await?;
    let present = sink.present_ids(collection).await?;
    let mut to_delete: HashSet<i64> = present.difference(&live).copied().collect();
    to_delete.extend(extractor.soft_deleted_ids(since).await?);
    if !to_delete.is_empty() {
        let ids: Vec<i64> = to_delete.into_iter().collect();
        stats.deleted = sink.delete_by_ids(collection, &ids).await?;
        debug!("Deleted {} stale documents from {collection}", stats.deleted);
    }
    checkpoints.mark_delete_check(device_id, entity, now).await?;

    let batch_size = tuning.batch_size_for(entity);
    let mut advanced = false;

    loop {
        let page = extractor.changed_page(cursor, batch_size).await?;
        stats.skipped += page.skipped;

        if !page.docs.is_empty() {
            let summary = sink.upsert_batch(collection, &page.docs).await?;
            stats.synced += page.docs.len() as u64 - summary.failed;
            stats.skipped += summary.failed;
        }

        if let Some(key) = page.last_key {
            cursor.advance(key.id, key.marker);
            // the batch is acknowledged; persist the cursor before the next
            // page so a crash replays at most this page
            let record_id = (!extractor.snapshot()).then_some(cursor.after_id);
            checkpoints
                .upsert(device_id, entity, cursor.since, record_id, None)
                .await?;
            *last_sync_time = cursor.since;
            advanced = true;
        }

        if page.rows_seen() < batch_size {
            break;
        }
        tokio::time::sleep(tuning.inter_batch_delay).await;
    }

    if !advanced {
        // nothing new: still touch the checkpoint so `updatedAt` records the
        // pass; `since` never regresses thanks to the store's guard
        checkpoints
            .upsert(device_id, entity, since, None, None)
            .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn checkpoint_at(at: DateTime<Utc>, payload: Option<&str>) -> Checkpoint {
        Checkpoint {
            device_id: "dev".to_string(),
            entity_type: "transactions".to_string(),
            last_sync_time: at,
            last_record_id: None,
            payload: payload.map(str::to_string),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn absent_checkpoint_uses_default_window() {
        let tuning = SyncTuning::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let since = resolve_since(Entity::Products, None, &tuning, now);
        assert_eq!(since, now - chrono::Duration::days(30));
    }

    #[test]
    fn default_window_is_floored_by_replay_horizon() {
        let mut tuning = SyncTuning::default();
        tuning.default_window_days = 365;
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let since = resolve_since(Entity::Products, None, &tuning, now);
        assert_eq!(since, now - chrono::Duration::days(90));
    }

    #[test]
    fn existing_checkpoint_wins_over_default() {
        let tuning = SyncTuning::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let cp = checkpoint_at(at, None);
        assert_eq!(
            resolve_since(Entity::Transactions, Some(&cp), &tuning, now),
            at
        );
    }

    #[test]
    fn completed_backfill_narrows_a_stale_transaction_checkpoint() {
        let tuning = SyncTuning::default();
        let now = Utc.with_ymd_and_hms(2024, 6, 30, 0, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let cp = checkpoint_at(stale, Some(crate::checkpoint::BACKFILL_COMPLETED));

        let since = resolve_since(Entity::Transactions, Some(&cp), &tuning, now);
        assert_eq!(since, now - chrono::Duration::days(3));

        // the narrowing is transaction-specific
        let since = resolve_since(Entity::Products, Some(&cp), &tuning, now);
        assert_eq!(since, stale);
    }
}

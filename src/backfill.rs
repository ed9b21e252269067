//! Bulk historical backfill for transactions.
//!
//! Walks the whole transaction history in week-sized calendar windows,
//! oldest first, embedding line items and flushing fixed-size batches to the
//! loader. Progress is persisted in the transactions checkpoint payload as
//! `ProcessedDate:YYYY-MM-DD` after every window, so an interrupted backfill
//! resumes at the next unprocessed window. On completion the payload flips
//! to `COMPLETED`, which lets the incremental pass narrow its window.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use mysql_async::prelude::*;
use mysql_async::{Pool, Row};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, BACKFILL_COMPLETED, PROCESSED_DATE_PREFIX};
use crate::config::SyncTuning;
use crate::extract::transactions::{fetch_details, project};
use crate::extract::{ChangedDoc, Entity};
use crate::load::DocumentSink;
use crate::mysql::{get_i64, get_opt_datetime, to_sql_datetime};

const RANGE_SQL: &str = "\
    SELECT MIN(TransactionDate) AS MinDate, MAX(TransactionDate) AS MaxDate, COUNT(*) AS Total \
    FROM Transactions WHERE IsDeleted = 0";

const WINDOW_SQL: &str = "\
    SELECT TransactionId, CustomerId, CustomerName, TotalAmount, PaidAmount, TransactionDate, \
           TransactionType, Status, PaymentMethod, CashierId, CashierName, CashierRole, \
           CreatedDate, ModifiedDate \
    FROM Transactions \
    WHERE IsDeleted = 0 AND TransactionDate >= ? AND TransactionDate < ? \
    ORDER BY TransactionDate, TransactionId";

#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillSummary {
    pub total_rows: u64,
    pub written: u64,
    pub skipped: u64,
    pub windows: u64,
}

/// `[start, end)` windows of `window_days` covering the closed date range.
pub fn backfill_windows(
    first_day: NaiveDate,
    last_day: NaiveDate,
    window_days: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut cursor = first_day;
    while cursor <= last_day {
        let end = cursor + chrono::Duration::days(window_days);
        windows.push((day_start(cursor), day_start(end)));
        cursor = end;
    }
    windows
}

pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap())
}

pub fn processed_payload(window_end: DateTime<Utc>) -> String {
    format!("{PROCESSED_DATE_PREFIX}{}", window_end.date_naive())
}

/// Parse a `ProcessedDate:YYYY-MM-DD` payload back into the resume day.
pub fn parse_processed_date(payload: &str) -> Option<NaiveDate> {
    payload
        .strip_prefix(PROCESSED_DATE_PREFIX)
        .and_then(|s| s.parse().ok())
}

/// Walk the full transaction history into the target. Safe to re-run: an
/// already-completed backfill returns immediately, a partial one resumes.
pub async fn run_transaction_backfill(
    device_id: &str,
    pool: &Pool,
    sink: &dyn DocumentSink,
    checkpoints: &dyn CheckpointStore,
    tuning: &SyncTuning,
    mut on_progress: impl FnMut(String) + Send,
) -> anyhow::Result<BackfillSummary> {
    let entity = Entity::Transactions;
    let mut summary = BackfillSummary::default();

    let resume_from = match checkpoints.get(device_id, entity).await {
        Some(cp) if cp.backfill_completed() => {
            info!("Transaction backfill already completed; nothing to do");
            return Ok(summary);
        }
        Some(cp) => cp.payload.as_deref().and_then(parse_processed_date),
        None => None,
    };

    let mut conn = pool.get_conn().await?;
    let range: Option<Row> = conn.query_first(RANGE_SQL).await?;
    let range = range.ok_or_else(|| anyhow::anyhow!("Range query returned no row"))?;
    let total: i64 = get_i64(&range, "Total")?;
    let (min_date, max_date) = (
        get_opt_datetime(&range, "MinDate")?,
        get_opt_datetime(&range, "MaxDate")?,
    );
    summary.total_rows = total.max(0) as u64;

    let (Some(min_date), Some(max_date)) = (min_date, max_date) else {
        info!("No transaction history to backfill");
        checkpoints
            .upsert(device_id, entity, Utc::now(), None, Some(BACKFILL_COMPLETED))
            .await?;
        return Ok(summary);
    };

    let first_day = resume_from.unwrap_or_else(|| min_date.date_naive());
    let windows = backfill_windows(first_day, max_date.date_naive(), tuning.backfill_window_days);
    info!(
        "Backfilling {} transactions across {} windows from {first_day}",
        summary.total_rows,
        windows.len()
    );

    for (window_start, window_end) in windows {
        let rows: Vec<Row> = conn
            .exec(
                WINDOW_SQL,
                (to_sql_datetime(window_start), to_sql_datetime(window_end)),
            )
            .await?;

        for chunk in rows.chunks(tuning.backfill_batch_size) {
            let ids: Vec<i64> = chunk
                .iter()
                .filter_map(|row| get_i64(row, "TransactionId").ok())
                .collect();
            let mut details = fetch_details(&mut conn, &ids).await?;

            let mut batch: Vec<ChangedDoc> = Vec::with_capacity(chunk.len());
            for row in chunk {
                let id = get_i64(row, "TransactionId")?;
                let items = details.remove(&id).unwrap_or_default();
                match project(row, id, items) {
                    Ok(changed) => batch.push(changed),
                    Err(e) => {
                        warn!("Skipping transaction {id} during backfill: {e}");
                        summary.skipped += 1;
                    }
                }
            }

            let outcome = sink.upsert_batch(entity.collection(), &batch).await?;
            summary.written += batch.len() as u64 - outcome.failed;
            summary.skipped += outcome.failed;
            tokio::time::sleep(tuning.inter_batch_delay).await;
        }

        checkpoints
            .upsert(
                device_id,
                entity,
                window_end,
                None,
                Some(&processed_payload(window_end)),
            )
            .await?;
        summary.windows += 1;

        let percent = if summary.total_rows > 0 {
            summary.written * 100 / summary.total_rows
        } else {
            100
        };
        on_progress(format!(
            "{} ({}/{} rows, {percent}%)",
            window_end.date_naive(),
            summary.written,
            summary.total_rows
        ));
    }

    checkpoints
        .upsert(
            device_id,
            entity,
            max_date,
            None,
            Some(BACKFILL_COMPLETED),
        )
        .await?;
    info!(
        "Transaction backfill completed: {} rows written across {} windows",
        summary.written, summary.windows
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_the_range_without_gaps() {
        let first = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2024, 2, 15).unwrap();
        let windows = backfill_windows(first, last, 7);

        assert_eq!(windows.first().unwrap().0, day_start(first));
        // contiguous: each window starts where the previous one ended
        for pair in windows.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        // the last window reaches past the final day
        assert!(windows.last().unwrap().1 > day_start(last));
        assert_eq!(windows.len(), 7);
    }

    #[test]
    fn processed_payload_round_trips() {
        let end = day_start(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        let payload = processed_payload(end);
        assert_eq!(payload, "ProcessedDate:2024-03-11");
        assert_eq!(
            parse_processed_date(&payload),
            Some(NaiveDate::from_ymd_opt(2024, 3, 11).unwrap())
        );
        assert_eq!(parse_processed_date("COMPLETED"), None);
    }
}

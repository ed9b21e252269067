//! Periodic trigger and service wiring.
//!
//! One service owns the source pool, the loader, the checkpoint store, and
//! the extractor set, and runs every entity sequentially within a tick so
//! the source never sees concurrent extraction. Ticks that fire while a
//! pass is still running are dropped, never queued. Shutdown lets the
//! in-flight pass finish; the checkpoint protocol makes a harder kill safe
//! anyway.

use std::sync::Arc;

use mysql_async::prelude::*;
use mysql_async::Pool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::backfill::{run_transaction_backfill, BackfillSummary};
use crate::checkpoint::MySqlCheckpointStore;
use crate::config::SyncTuning;
use crate::engine::{run_pass, SyncResult};
use crate::extract::{all_extractors, Extractor};
use crate::load::MongoSink;
use crate::status::{EndpointStatus, LogRing, ServerStatus, StatusSnapshot};

pub struct SyncService {
    device_id: String,
    pool: Pool,
    sink: Arc<MongoSink>,
    checkpoints: Arc<MySqlCheckpointStore>,
    extractors: Vec<Box<dyn Extractor>>,
    tuning: SyncTuning,
    status_tx: watch::Sender<StatusSnapshot>,
    auto_sync_tx: watch::Sender<bool>,
    log: Arc<LogRing>,
}

impl SyncService {
    pub fn new(
        device_id: String,
        pool: Pool,
        sink: MongoSink,
        checkpoints: MySqlCheckpointStore,
        tuning: SyncTuning,
    ) -> Self {
        let extractors = all_extractors(&pool);
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let (auto_sync_tx, _) = watch::channel(false);
        Self {
            device_id,
            pool,
            sink: Arc::new(sink),
            checkpoints: Arc::new(checkpoints),
            extractors,
            tuning,
            status_tx,
            auto_sync_tx,
            log: Arc::new(LogRing::default()),
        }
    }

    /// Snapshot stream for the UI.
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn log(&self) -> Arc<LogRing> {
        self.log.clone()
    }

    /// Toggle the periodic trigger. Enabling fires a tick immediately.
    pub fn set_auto_sync(&self, enabled: bool) {
        self.status_tx
            .send_modify(|s| s.auto_sync_enabled = enabled);
        self.log.push(if enabled {
            "Automatic sync enabled"
        } else {
            "Automatic sync disabled"
        });
        let _ = self.auto_sync_tx.send(enabled);
    }

    fn set_status(&self, update: impl FnOnce(&mut StatusSnapshot)) {
        self.status_tx.send_modify(update);
    }

    /// Test source and target reachability once and publish the results.
    /// Runs on process start regardless of the auto-sync toggle.
    pub async fn startup_probe(&self) {
        match self.probe_source().await {
            Ok(()) => {
                self.set_status(|s| s.source_status = EndpointStatus::Connected);
                self.log.push("Source database reachable");
            }
            Err(e) => {
                self.set_status(|s| s.source_status = EndpointStatus::Error);
                self.log.error(format!("Source database unreachable: {e}"));
            }
        }

        match self.sink.ping().await {
            Ok(()) => {
                self.set_status(|s| s.target_status = EndpointStatus::Connected);
                self.log.push("Target database reachable");
            }
            Err(e) => {
                self.set_status(|s| s.target_status = EndpointStatus::Error);
                self.log.error(format!("Target database unreachable: {e}"));
            }
        }
    }

    async fn probe_source(&self) -> anyhow::Result<()> {
        let mut conn = self.pool.get_conn().await?;
        conn.query_drop("SELECT 1").await?;
        Ok(())
    }

    /// Run one pass for every registered entity, sequentially. A failing
    /// entity never stops its siblings.
    pub async fn run_all_once(&self) -> Vec<SyncResult> {
        self.set_status(|s| s.is_syncing = true);
        let mut results = Vec::with_capacity(self.extractors.len());

        for extractor in &self.extractors {
            let result = run_pass(
                &self.device_id,
                extractor.as_ref(),
                self.sink.as_ref(),
                self.checkpoints.as_ref(),
                &self.tuning,
            )
            .await;

            match &result.error {
                None => self.log.success(format!(
                    "{}: {} written, {} deleted",
                    result.entity, result.records_synced, result.records_deleted
                )),
                Some(e) => self
                    .log
                    .error(format!("{} pass failed: {e}", result.entity)),
            }
            if result.rows_skipped > 0 {
                self.log.warning(format!(
                    "{}: {} rows skipped",
                    result.entity, result.rows_skipped
                ));
            }
            results.push(result);
        }

        self.set_status(|s| s.is_syncing = false);
        results
    }

    /// Run a single entity by name; used by the `sync --entity` subcommand.
    pub async fn run_entity_once(&self, key: &str) -> anyhow::Result<SyncResult> {
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.entity().key() == key)
            .ok_or_else(|| anyhow::anyhow!("Unknown entity: {key}"))?;
        Ok(run_pass(
            &self.device_id,
            extractor.as_ref(),
            self.sink.as_ref(),
            self.checkpoints.as_ref(),
            &self.tuning,
        )
        .await)
    }

    /// Walk the full transaction history into the target, publishing
    /// progress as it goes.
    pub async fn run_backfill(&self) -> anyhow::Result<BackfillSummary> {
        self.set_status(|s| {
            s.is_bulk_syncing = true;
            s.bulk_sync_progress = Some("starting".to_string());
        });
        self.log.push("Transaction backfill started");

        let outcome = run_transaction_backfill(
            &self.device_id,
            &self.pool,
            self.sink.as_ref(),
            self.checkpoints.as_ref(),
            &self.tuning,
            |progress| {
                self.log.push(format!("Backfill: {progress}"));
                self.status_tx
                    .send_modify(|s| s.bulk_sync_progress = Some(progress));
            },
        )
        .await;

        self.set_status(|s| s.is_bulk_syncing = false);
        match &outcome {
            Ok(summary) => self.log.success(format!(
                "Backfill completed: {} rows across {} windows",
                summary.written, summary.windows
            )),
            Err(e) => self.log.error(format!("Backfill failed: {e}")),
        }
        outcome
    }

    /// Periodic trigger loop. Runs until `shutdown` flips; the pass in
    /// flight at that point completes before the loop returns.
    pub async fn run_scheduler(&self, mut shutdown: watch::Receiver<bool>) {
        self.set_status(|s| s.server_status = ServerStatus::Running);
        self.startup_probe().await;

        let mut enabled_rx = self.auto_sync_tx.subscribe();
        let mut ticker = tokio::time::interval(self.tuning.interval);
        // a tick that lands while a pass is running is dropped, not queued
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Scheduler started (interval {:?}, auto-sync {})",
            self.tuning.interval,
            if *enabled_rx.borrow() { "on" } else { "off" }
        );

        loop {
            if !*enabled_rx.borrow() {
                tokio::select! {
                    changed = enabled_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *enabled_rx.borrow() {
                            // fire immediately on enable, then on cadence
                            self.run_all_once().await;
                            ticker.reset();
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                continue;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.run_all_once().await;
                }
                changed = enabled_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.set_status(|s| s.server_status = ServerStatus::Stopped);
        self.log.push("Scheduler stopped");
        info!("Scheduler shut down");
    }
}

//! Pass semantics, driven through in-memory fakes of the extractor, sink,
//! and checkpoint store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mongodb::bson::{doc, Document};

use pos_sync::checkpoint::{Checkpoint, CheckpointStore};
use pos_sync::config::SyncTuning;
use pos_sync::engine::run_pass;
use pos_sync::extract::{ChangeCursor, ChangedDoc, ChangedPage, Entity, Extractor, PageKey};
use pos_sync::load::{DocumentSink, UpsertSummary};
use pos_sync::model::SyncLogDoc;

#[derive(Debug, Clone)]
struct SourceRow {
    id: i64,
    marker: DateTime<Utc>,
    name: String,
    poison: bool,
}

impl SourceRow {
    fn new(id: i64, marker: DateTime<Utc>, name: &str) -> Self {
        Self {
            id,
            marker,
            name: name.to_string(),
            poison: false,
        }
    }

    fn document(&self) -> Document {
        doc! { "_id": self.id, "name": self.name.clone() }
    }
}

struct MemExtractor {
    entity: Entity,
    rows: Mutex<Vec<SourceRow>>,
    soft_deleted: Mutex<Vec<i64>>,
}

impl MemExtractor {
    fn new(entity: Entity, rows: Vec<SourceRow>) -> Self {
        Self {
            entity,
            rows: Mutex::new(rows),
            soft_deleted: Mutex::new(Vec::new()),
        }
    }

    fn remove_row(&self, id: i64) {
        self.rows.lock().unwrap().retain(|r| r.id != id);
    }

    fn soft_delete(&self, id: i64) {
        self.remove_row(id);
        self.soft_deleted.lock().unwrap().push(id);
    }
}

#[async_trait]
impl Extractor for MemExtractor {
    fn entity(&self) -> Entity {
        self.entity
    }

    async fn changed_page(
        &self,
        cursor: ChangeCursor,
        batch_size: usize,
    ) -> anyhow::Result<ChangedPage> {
        let mut matching: Vec<SourceRow> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.marker > cursor.since || (r.marker == cursor.since && r.id > cursor.after_id)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| (r.marker, r.id));
        matching.truncate(batch_size);

        let mut page = ChangedPage::default();
        for row in matching {
            page.last_key = Some(PageKey {
                id: row.id,
                marker: Some(row.marker),
            });
            if row.poison {
                page.skipped += 1;
            } else {
                page.docs.push(ChangedDoc {
                    id: row.id,
                    marker: Some(row.marker),
                    doc: row.document(),
                });
            }
        }
        Ok(page)
    }

    async fn live_ids(&self) -> anyhow::Result<HashSet<i64>> {
        Ok(self.rows.lock().unwrap().iter().map(|r| r.id).collect())
    }

    async fn soft_deleted_ids(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<i64>> {
        Ok(self.soft_deleted.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct MemSink {
    collections: Mutex<HashMap<String, HashMap<i64, Document>>>,
    batch_summaries: Mutex<Vec<UpsertSummary>>,
    logs: Mutex<Vec<SyncLogDoc>>,
    fail_upserts: AtomicBool,
}

impl MemSink {
    fn seed(&self, collection: &str, id: i64, document: Document) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .insert(id, document);
    }

    fn stored_ids(&self, collection: &str) -> HashSet<i64> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map(|c| c.keys().copied().collect())
            .unwrap_or_default()
    }

    fn batches(&self) -> Vec<UpsertSummary> {
        self.batch_summaries.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for MemSink {
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: &[ChangedDoc],
    ) -> anyhow::Result<UpsertSummary> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            anyhow::bail!("target unavailable");
        }
        let mut collections = self.collections.lock().unwrap();
        let stored = collections.entry(collection.to_string()).or_default();

        let mut summary = UpsertSummary::default();
        for changed in docs {
            match stored.get(&changed.id) {
                None => {
                    summary.upserted += 1;
                    stored.insert(changed.id, changed.doc.clone());
                }
                Some(existing) if existing != &changed.doc => {
                    summary.modified += 1;
                    stored.insert(changed.id, changed.doc.clone());
                }
                Some(_) => {}
            }
        }
        self.batch_summaries.lock().unwrap().push(summary);
        Ok(summary)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> anyhow::Result<u64> {
        let mut collections = self.collections.lock().unwrap();
        let stored = collections.entry(collection.to_string()).or_default();
        let mut deleted = 0;
        for id in ids {
            if stored.remove(id).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn present_ids(&self, collection: &str) -> anyhow::Result<HashSet<i64>> {
        Ok(self.stored_ids(collection))
    }

    async fn insert_sync_log(&self, log: SyncLogDoc) -> anyhow::Result<()> {
        self.logs.lock().unwrap().push(log);
        Ok(())
    }
}

#[derive(Default)]
struct MemCheckpoints {
    map: Mutex<HashMap<(String, String), Checkpoint>>,
}

impl MemCheckpoints {
    fn stored(&self, device_id: &str, entity: Entity) -> Option<Checkpoint> {
        self.map
            .lock()
            .unwrap()
            .get(&(device_id.to_string(), entity.key().to_string()))
            .cloned()
    }

    fn reset(&self, device_id: &str, entity: Entity, at: DateTime<Utc>) {
        let key = (device_id.to_string(), entity.key().to_string());
        let mut map = self.map.lock().unwrap();
        if let Some(cp) = map.get_mut(&key) {
            cp.last_sync_time = at;
            cp.last_record_id = None;
        }
    }
}

#[async_trait]
impl CheckpointStore for MemCheckpoints {
    async fn get(&self, device_id: &str, entity: Entity) -> Option<Checkpoint> {
        self.stored(device_id, entity)
    }

    async fn upsert(
        &self,
        device_id: &str,
        entity: Entity,
        last_sync_time: DateTime<Utc>,
        last_record_id: Option<i64>,
        payload: Option<&str>,
    ) -> anyhow::Result<()> {
        let key = (device_id.to_string(), entity.key().to_string());
        let now = Utc::now();
        let mut map = self.map.lock().unwrap();
        match map.get_mut(&key) {
            Some(cp) => {
                // mirrors the real store: the high water mark never regresses
                cp.last_sync_time = cp.last_sync_time.max(last_sync_time);
                if last_record_id.is_some() {
                    cp.last_record_id = last_record_id;
                }
                if payload.is_some() {
                    cp.payload = payload.map(str::to_string);
                }
                cp.updated_at = now;
            }
            None => {
                map.insert(
                    key,
                    Checkpoint {
                        device_id: device_id.to_string(),
                        entity_type: entity.key().to_string(),
                        last_sync_time,
                        last_record_id,
                        payload: payload.map(str::to_string),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn mark_delete_check(
        &self,
        _device_id: &str,
        _entity: Entity,
        _at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

fn tuning() -> SyncTuning {
    let mut tuning = SyncTuning::default();
    tuning.inter_batch_delay = Duration::ZERO;
    tuning
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
}

fn recent(hours: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::hours(hours)
}

#[tokio::test]
async fn first_pass_writes_fresh_rows_and_creates_a_checkpoint() {
    let marker = recent(24);
    let extractor = MemExtractor::new(
        Entity::Products,
        vec![SourceRow::new(7, marker, "Widget")],
    );
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(result.success);
    assert_eq!(result.records_synced, 1);
    assert!(sink.stored_ids("products").contains(&7));

    let cp = checkpoints.stored("dev-1", Entity::Products).unwrap();
    assert_eq!(cp.last_sync_time, marker);
    assert_eq!(cp.last_record_id, Some(7));

    let logs = sink.logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].is_success);
    assert_eq!(logs[0].records_synced, 1);
}

#[tokio::test]
async fn rows_older_than_the_default_window_are_not_emitted() {
    let extractor = MemExtractor::new(
        Entity::Products,
        vec![
            SourceRow::new(1, Utc::now() - chrono::Duration::days(45), "Stale"),
            SourceRow::new(2, recent(1), "Fresh"),
        ],
    );
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(result.success);
    assert_eq!(sink.stored_ids("products"), HashSet::from([2]));
}

#[tokio::test]
async fn replaying_an_unchanged_window_writes_nothing() {
    let extractor = MemExtractor::new(
        Entity::Products,
        vec![
            SourceRow::new(1, recent(10), "A"),
            SourceRow::new(2, recent(5), "B"),
        ],
    );
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let first = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert_eq!(first.records_synced, 2);
    let cp_after_first = checkpoints.stored("dev-1", Entity::Products).unwrap();

    let second = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert!(second.success);
    assert_eq!(second.records_synced, 0);

    // no new upsert batches went out, and the cursor did not move
    assert_eq!(sink.batches().len(), 1);
    let cp_after_second = checkpoints.stored("dev-1", Entity::Products).unwrap();
    assert_eq!(cp_after_second.last_sync_time, cp_after_first.last_sync_time);
    assert!(cp_after_second.updated_at >= cp_after_first.updated_at);
}

#[tokio::test]
async fn equal_markers_page_through_on_the_id_tiebreak() {
    let marker = recent(2);
    let rows = (1..=5)
        .map(|id| SourceRow::new(id, marker, "same-instant"))
        .collect();
    let extractor = MemExtractor::new(Entity::Products, rows);
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let mut tuning = tuning();
    tuning.batch_sizes.insert("products".to_string(), 2);

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning).await;

    assert!(result.success);
    assert_eq!(result.records_synced, 5);
    assert_eq!(sink.stored_ids("products").len(), 5);
    // pages of 2, 2, 1
    assert_eq!(sink.batches().len(), 3);

    let cp = checkpoints.stored("dev-1", Entity::Products).unwrap();
    assert_eq!(cp.last_sync_time, marker);
    assert_eq!(cp.last_record_id, Some(5));

    // the next pass starts past the tie group and emits nothing
    let again = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning).await;
    assert_eq!(again.records_synced, 0);
    assert_eq!(sink.batches().len(), 3);
}

#[tokio::test]
async fn rows_gone_from_the_live_set_are_deleted() {
    let extractor = MemExtractor::new(Entity::Customers, vec![SourceRow::new(1, recent(3), "Ada")]);
    let sink = MemSink::default();
    sink.seed("customers", 99, doc! { "_id": 99i64, "name": "Ghost" });
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(result.success);
    assert_eq!(result.records_deleted, 1);
    assert_eq!(sink.stored_ids("customers"), HashSet::from([1]));
}

#[tokio::test]
async fn soft_deleted_transactions_are_swept() {
    let extractor = MemExtractor::new(
        Entity::Transactions,
        vec![
            SourceRow::new(41, recent(8), "kept"),
            SourceRow::new(42, recent(8), "doomed"),
        ],
    );
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let first = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert_eq!(first.records_synced, 2);

    extractor.soft_delete(42);
    let second = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(second.success);
    assert!(second.records_deleted >= 1);
    assert_eq!(sink.stored_ids("transactions"), HashSet::from([41]));
}

#[tokio::test]
async fn deletion_runs_before_inserts_so_a_recreated_row_survives() {
    // id 7 was soft-deleted and then re-created with a fresh marker in the
    // same window; the delete phase must not win over the re-insert
    let extractor = MemExtractor::new(Entity::Transactions, vec![SourceRow::new(7, recent(1), "reborn")]);
    extractor.soft_deleted.lock().unwrap().push(7);
    let sink = MemSink::default();
    sink.seed("transactions", 7, doc! { "_id": 7i64, "name": "old" });
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(result.success);
    assert!(result.records_deleted >= 1);
    assert!(sink.stored_ids("transactions").contains(&7));
}

#[tokio::test]
async fn failed_batch_leaves_the_checkpoint_untouched() {
    let extractor = MemExtractor::new(Entity::Products, vec![SourceRow::new(1, recent(2), "A")]);
    let sink = MemSink::default();
    sink.fail_upserts.store(true, Ordering::SeqCst);
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(!result.success);
    assert!(result.error.is_some());
    assert!(checkpoints.stored("dev-1", Entity::Products).is_none());

    // the failure is recorded in the sync log as well
    let logs = sink.logs.lock().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(!logs[0].is_success);
    assert!(logs[0].error_message.is_some());

    // target recovers: the next pass replays the same window
    drop(logs);
    sink.fail_upserts.store(false, Ordering::SeqCst);
    let retry = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert!(retry.success);
    assert_eq!(retry.records_synced, 1);
}

#[tokio::test]
async fn empty_source_still_touches_the_checkpoint() {
    let extractor = MemExtractor::new(Entity::Expenses, vec![]);
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;

    assert!(result.success);
    assert_eq!(result.records_synced, 0);
    assert!(sink.batches().is_empty());
    assert!(checkpoints.stored("dev-1", Entity::Expenses).is_some());
}

#[tokio::test]
async fn lost_checkpoint_write_replays_idempotently() {
    let markers: Vec<_> = (0..5).map(|i| at(1, i)).collect();
    let rows: Vec<_> = markers
        .iter()
        .enumerate()
        .map(|(i, m)| SourceRow::new(i as i64 + 1, *m, "row"))
        .collect();
    let extractor = MemExtractor::new(Entity::Products, rows);
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    // seed a checkpoint so the fixed 2024 markers are inside the window
    checkpoints
        .upsert("dev-1", Entity::Products, at(1, 0) - chrono::Duration::days(1), None, None)
        .await
        .unwrap();

    let first = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert_eq!(first.records_synced, 5);

    // the batch was acknowledged but the checkpoint write was lost
    checkpoints.reset("dev-1", Entity::Products, at(1, 0) - chrono::Duration::days(1));

    let replay = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning()).await;
    assert!(replay.success);

    // every replayed row matched an identical document: nothing inserted,
    // nothing modified
    let last = *sink.batches().last().unwrap();
    assert_eq!(last, UpsertSummary::default());
    let cp = checkpoints.stored("dev-1", Entity::Products).unwrap();
    assert_eq!(cp.last_sync_time, markers[4]);
}

#[tokio::test]
async fn poison_rows_are_skipped_without_stalling_the_cursor() {
    let marker = recent(4);
    let mut bad = SourceRow::new(2, marker, "bad");
    bad.poison = true;
    let extractor = MemExtractor::new(
        Entity::Transactions,
        vec![
            SourceRow::new(1, marker, "ok"),
            bad,
            SourceRow::new(3, marker, "also ok"),
        ],
    );
    let sink = MemSink::default();
    let checkpoints = MemCheckpoints::default();

    let mut tuning = tuning();
    tuning.batch_sizes.insert("transactions".to_string(), 2);

    let result = run_pass("dev-1", &extractor, &sink, &checkpoints, &tuning).await;

    assert!(result.success);
    assert_eq!(result.records_synced, 2);
    assert_eq!(result.rows_skipped, 1);
    assert_eq!(sink.stored_ids("transactions"), HashSet::from([1, 3]));

    let cp = checkpoints.stored("dev-1", Entity::Transactions).unwrap();
    assert_eq!(cp.last_record_id, Some(3));
}

//! MongoDB target writes.
//!
//! One loader per process, shared across entities. Upserts go out as
//! unordered bulk replaces keyed by `_id`, so one bad row fails alone
//! instead of failing its batch. The loader stamps `syncedAt` on every
//! document as it writes it. Nothing here retries; failures bubble to the
//! engine, which leaves the checkpoint alone and lets the next pass re-drive.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{ClientOptions, ReplaceOneModel};
use mongodb::{Client, Namespace};
use tracing::{debug, warn};

use crate::extract::ChangedDoc;
use crate::model::SyncLogDoc;
use crate::TargetOpts;

/// Outcome of one bulk upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub upserted: u64,
    pub modified: u64,
    pub failed: u64,
}

/// Write side of the pipeline, as the engine sees it.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Upsert a batch keyed by `_id`. Per-row failures are reported in the
    /// summary, not as an error.
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: &[ChangedDoc],
    ) -> anyhow::Result<UpsertSummary>;

    /// Delete by `_id`; returns how many documents went away.
    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> anyhow::Result<u64>;

    /// Cheap `_id`-only projection of what the target currently holds.
    async fn present_ids(&self, collection: &str) -> anyhow::Result<HashSet<i64>>;

    /// Append one pass outcome to `sync_logs`.
    async fn insert_sync_log(&self, log: SyncLogDoc) -> anyhow::Result<()>;
}

pub struct MongoSink {
    client: Client,
    database: String,
    op_timeout: Duration,
    dry_run: bool,
}

impl MongoSink {
    /// Connect with explicit timeouts so a dead target fails fast instead of
    /// hanging a pass.
    pub async fn connect(opts: &TargetOpts) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(&opts.target_uri)
            .await
            .context("Failed to parse MongoDB connection options")?;
        options.connect_timeout = Some(Duration::from_secs(10));
        options.server_selection_timeout =
            Some(Duration::from_secs(opts.server_selection_timeout_secs));

        let client = Client::with_options(options)?;
        Ok(Self {
            client,
            database: opts.target_database.clone(),
            op_timeout: Duration::from_secs(opts.socket_timeout_secs),
            dry_run: opts.dry_run,
        })
    }

    /// Round-trip to the server; used by the startup probe.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }

    fn namespace(&self, collection: &str) -> Namespace {
        Namespace::new(self.database.clone(), collection)
    }

    /// Per-call deadline; expiry aborts the batch and surfaces as an error.
    async fn bounded<T>(
        &self,
        what: &str,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| anyhow::anyhow!("{what} timed out after {:?}", self.op_timeout))?
    }
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn upsert_batch(
        &self,
        collection: &str,
        docs: &[ChangedDoc],
    ) -> anyhow::Result<UpsertSummary> {
        if docs.is_empty() {
            return Ok(UpsertSummary::default());
        }
        if self.dry_run {
            debug!(
                "Dry-run: would upsert {} documents into {collection}",
                docs.len()
            );
            return Ok(UpsertSummary::default());
        }

        let synced_at = Bson::DateTime(BsonDateTime::now());
        let namespace = self.namespace(collection);
        let models: Vec<ReplaceOneModel> = docs
            .iter()
            .map(|changed| {
                let mut replacement = changed.doc.clone();
                replacement.insert("syncedAt", synced_at.clone());
                ReplaceOneModel::builder()
                    .namespace(namespace.clone())
                    .filter(doc! { "_id": changed.id })
                    .replacement(replacement)
                    .upsert(true)
                    .build()
            })
            .collect();

        let outcome = self
            .bounded("bulk upsert", async {
                Ok(self.client.bulk_write(models).ordered(false).await)
            })
            .await?;

        match outcome {
            Ok(result) => Ok(UpsertSummary {
                upserted: result.upserted_count as u64,
                modified: result.modified_count as u64,
                failed: 0,
            }),
            Err(e) => {
                // Unordered writes keep going past individual failures; pull
                // the per-row errors out and report the rest as written.
                if let mongodb::error::ErrorKind::BulkWrite(ref bulk_error) = *e.kind {
                    if !bulk_error.write_errors.is_empty() {
                        for (index, write_error) in &bulk_error.write_errors {
                            let id = docs.get(*index).map(|d| d.id).unwrap_or(-1);
                            warn!(
                                "Upsert into {collection} failed for _id {id}: {}",
                                write_error.message
                            );
                        }
                        return Ok(UpsertSummary {
                            upserted: 0,
                            modified: 0,
                            failed: bulk_error.write_errors.len() as u64,
                        });
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[i64]) -> anyhow::Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        if self.dry_run {
            debug!(
                "Dry-run: would delete {} documents from {collection}",
                ids.len()
            );
            return Ok(0);
        }

        let coll = self
            .client
            .database(&self.database)
            .collection::<Document>(collection);
        let result = self
            .bounded("bulk delete", async {
                Ok(coll
                    .delete_many(doc! { "_id": { "$in": ids.to_vec() } })
                    .await?)
            })
            .await?;
        Ok(result.deleted_count)
    }

    async fn present_ids(&self, collection: &str) -> anyhow::Result<HashSet<i64>> {
        let coll = self
            .client
            .database(&self.database)
            .collection::<Document>(collection);

        let mut ids = HashSet::new();
        let mut cursor = coll
            .find(doc! {})
            .projection(doc! { "_id": 1 })
            .await
            .with_context(|| format!("Failed to project ids from {collection}"))?;
        while cursor.advance().await? {
            let document: Document = cursor.current().try_into()?;
            match document.get_i64("_id") {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => warn!(
                    "Ignoring non-integer _id in {collection}: {:?}",
                    document.get("_id")
                ),
            }
        }
        Ok(ids)
    }

    async fn insert_sync_log(&self, log: SyncLogDoc) -> anyhow::Result<()> {
        if self.dry_run {
            debug!("Dry-run: would insert sync log for {}", log.entity_type);
            return Ok(());
        }
        let coll = self
            .client
            .database(&self.database)
            .collection::<Document>("sync_logs");
        coll.insert_one(log.into_document()?).await?;
        Ok(())
    }
}

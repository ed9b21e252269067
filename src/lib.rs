//! pos-sync library
//!
//! One-way replication of point-of-sale records from an authoritative MySQL
//! database into MongoDB, so read-only consumers (the mobile app, the
//! analytics dashboard) never touch the primary.
//!
//! # Components
//!
//! - [`checkpoint`] - durable per-(device, entity) cursors, stored in the
//!   source database itself
//! - [`extract`] - per-entity change extraction into target documents
//! - [`load`] - batched MongoDB upserts and deletes
//! - [`engine`] - the incremental pass: reconcile deletions, page changed
//!   rows, advance the checkpoint per acknowledged batch
//! - [`backfill`] - the one-time transaction-history walk
//! - [`scheduler`] - periodic trigger, startup probe, operator status
//!
//! # CLI Usage
//!
//! ```bash
//! # Scheduler daemon, ticking every two minutes
//! pos-sync --source-uri mysql://... --target-uri mongodb://... run
//!
//! # One pass over a single entity
//! pos-sync --source-uri ... --target-uri ... sync --entity products
//!
//! # Historical transaction backfill
//! pos-sync --source-uri ... --target-uri ... backfill
//! ```

use clap::Parser;

pub mod backfill;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod extract;
pub mod load;
pub mod model;
pub mod mysql;
pub mod scheduler;
pub mod status;

pub use engine::{run_pass, SyncResult};
pub use scheduler::SyncService;

#[derive(Parser, Clone, Debug)]
pub struct SourceOpts {
    /// MySQL source endpoint URL
    #[arg(long, env = "SOURCE_DATABASE_URL")]
    pub source_uri: String,
}

#[derive(Parser, Clone, Debug)]
pub struct TargetOpts {
    /// MongoDB target endpoint URL
    #[arg(long, env = "TARGET_DATABASE_URL")]
    pub target_uri: String,

    /// MongoDB database name
    #[arg(long, env = "TARGET_DATABASE_NAME", default_value = "pos_reporting")]
    pub target_database: String,

    /// Per-call deadline for bulk writes, in seconds
    #[arg(long, default_value = "600")]
    pub socket_timeout_secs: u64,

    /// Server selection timeout, in seconds
    #[arg(long, default_value = "30")]
    pub server_selection_timeout_secs: u64,

    /// Dry run mode - don't actually write data
    #[arg(long)]
    pub dry_run: bool,
}

//! Per-entity extraction from the MySQL source.
//!
//! Every entity implements [`Extractor`]: a keyset-paged "what changed since
//! the cursor" query, the set of currently-live primary ids for deletion
//! reconciliation, and (for transactions) the soft-delete sweep. Extractors
//! materialize rows straight into the target document shape; the engine never
//! sees a source row.

pub mod business_settings;
pub mod categories;
pub mod customers;
pub mod employees;
pub mod expenses;
pub mod products;
pub mod transactions;

pub use business_settings::BusinessSettingExtractor;
pub use categories::CategoryExtractor;
pub use customers::CustomerExtractor;
pub use employees::EmployeeExtractor;
pub use expenses::ExpenseExtractor;
pub use products::ProductExtractor;
pub use transactions::TransactionExtractor;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson;
use mysql_async::Pool;

/// The seven replicated entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Entity {
    Categories,
    BusinessSettings,
    Products,
    Customers,
    Employees,
    Expenses,
    Transactions,
}

impl Entity {
    /// Pass order: reference data first, transactions last.
    pub const ALL: [Entity; 7] = [
        Entity::Categories,
        Entity::BusinessSettings,
        Entity::Products,
        Entity::Customers,
        Entity::Employees,
        Entity::Expenses,
        Entity::Transactions,
    ];

    /// Name used for checkpoints, sync logs, config keys, and the target
    /// collection alike.
    pub fn key(&self) -> &'static str {
        match self {
            Entity::Categories => "categories",
            Entity::BusinessSettings => "business_settings",
            Entity::Products => "products",
            Entity::Customers => "customers",
            Entity::Employees => "employees",
            Entity::Expenses => "expenses",
            Entity::Transactions => "transactions",
        }
    }

    pub fn collection(&self) -> &'static str {
        self.key()
    }

    pub fn default_batch_size(&self) -> usize {
        match self {
            Entity::Transactions => 200,
            Entity::Products | Entity::Customers | Entity::Expenses => 500,
            Entity::Employees => 200,
            // snapshot entities; sized so one page normally covers the table
            Entity::Categories | Entity::BusinessSettings => 1000,
        }
    }

    pub fn parse(s: &str) -> Option<Entity> {
        Entity::ALL.iter().copied().find(|e| e.key() == s)
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One changed row, already projected into its target document.
#[derive(Debug, Clone)]
pub struct ChangedDoc {
    pub id: i64,
    /// Modification marker of the source row; `None` for snapshot entities
    /// that have no marker.
    pub marker: Option<DateTime<Utc>>,
    pub doc: bson::Document,
}

/// `(id, marker)` position of the last row a page covered, including rows
/// that failed projection. The engine keys the next page off this, so a
/// poison row cannot stall the cursor.
#[derive(Debug, Clone, Copy)]
pub struct PageKey {
    pub id: i64,
    pub marker: Option<DateTime<Utc>>,
}

/// A page of changed rows plus the count of rows that failed projection and
/// were skipped.
#[derive(Debug, Default)]
pub struct ChangedPage {
    pub docs: Vec<ChangedDoc>,
    pub skipped: u64,
    pub last_key: Option<PageKey>,
}

impl ChangedPage {
    /// Rows the page covered, written or skipped; the engine uses this to
    /// detect a saturated page.
    pub fn rows_seen(&self) -> usize {
        self.docs.len() + self.skipped as usize
    }
}

/// Composite keyset cursor: rows strictly after `(since, after_id)` in
/// `(marker, id)` order. Two rows may share a marker; the id breaks the tie,
/// so a saturated page never re-reads acknowledged rows and never skips the
/// rest of a tie group.
#[derive(Debug, Clone, Copy)]
pub struct ChangeCursor {
    pub since: DateTime<Utc>,
    pub after_id: i64,
}

impl ChangeCursor {
    pub fn start(since: DateTime<Utc>, after_id: Option<i64>) -> Self {
        Self {
            since,
            after_id: after_id.unwrap_or(0),
        }
    }

    /// Advance past a row the loader has acknowledged.
    pub fn advance(&mut self, row_id: i64, marker: Option<DateTime<Utc>>) {
        if let Some(marker) = marker {
            if marker > self.since {
                self.since = marker;
                self.after_id = row_id;
                return;
            }
        }
        self.after_id = row_id;
    }
}

/// Contract between the engine and one entity's source queries.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn entity(&self) -> Entity;

    /// Snapshot extractors re-read the whole live table every pass and carry
    /// no modification marker; the engine starts their cursor from zero
    /// instead of the persisted checkpoint id.
    fn snapshot(&self) -> bool {
        false
    }

    /// Changed rows strictly after the cursor, ascending `(marker, id)`,
    /// at most `batch_size` of them. A page shorter than `batch_size` is the
    /// last one.
    async fn changed_page(&self, cursor: ChangeCursor, batch_size: usize)
        -> anyhow::Result<ChangedPage>;

    /// Primary ids currently live in the source. Invoked once per pass.
    async fn live_ids(&self) -> anyhow::Result<HashSet<i64>>;

    /// Ids soft-deleted since the given time. Only transactions carry an
    /// explicit delete flag; everything else reconciles by set difference.
    async fn soft_deleted_ids(&self, _since: DateTime<Utc>) -> anyhow::Result<Vec<i64>> {
        Ok(Vec::new())
    }
}

/// `?, ?, ...` for an `IN (...)` clause.
pub(crate) fn in_placeholders(count: usize) -> String {
    let mut out = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// Construct the full extractor set over one shared pool.
pub fn all_extractors(pool: &Pool) -> Vec<Box<dyn Extractor>> {
    vec![
        Box::new(CategoryExtractor::new(pool.clone())),
        Box::new(BusinessSettingExtractor::new(pool.clone())),
        Box::new(ProductExtractor::new(pool.clone())),
        Box::new(CustomerExtractor::new(pool.clone())),
        Box::new(EmployeeExtractor::new(pool.clone())),
        Box::new(ExpenseExtractor::new(pool.clone())),
        Box::new(TransactionExtractor::new(pool.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entity_keys_round_trip() {
        for entity in Entity::ALL {
            assert_eq!(Entity::parse(entity.key()), Some(entity));
        }
        assert_eq!(Entity::parse("nope"), None);
    }

    #[test]
    fn cursor_advances_through_a_tie_group() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut cursor = ChangeCursor::start(t0, None);

        cursor.advance(5, Some(t1));
        assert_eq!(cursor.since, t1);
        assert_eq!(cursor.after_id, 5);

        // same marker, later id: only the id moves
        cursor.advance(9, Some(t1));
        assert_eq!(cursor.since, t1);
        assert_eq!(cursor.after_id, 9);

        // marker-less row (snapshot entity) only moves the id
        cursor.advance(12, None);
        assert_eq!(cursor.since, t1);
        assert_eq!(cursor.after_id, 12);
    }
}

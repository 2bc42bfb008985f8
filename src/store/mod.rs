//! Persistence of code records.
//!
//! [`CodeStore`] is the seam between the engine and storage. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`] keeps records in a `BTreeMap`, for tests and demos.
//! - [`SqliteStore`] persists to SQLite through `sqlx`.
//!
//! Both enforce uniqueness of the [`DedupKey`] themselves, so a concurrent
//! writer that slips past the engine's pre-check still cannot create a
//! duplicate.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::record::{CodeRecord, DedupKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Records written.
    pub inserted: usize,
    /// Records skipped because their key already existed.
    pub duplicates: usize,
}

/// Narrows a [`CodeStore::find_recent`] query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentFilter {
    /// Only records for this (normalized) recipient.
    pub recipient: Option<String>,
    /// At most this many records.
    pub limit: Option<usize>,
}

impl RecentFilter {
    /// Filter for one recipient.
    #[must_use]
    pub fn recipient(recipient: impl Into<String>) -> Self {
        Self {
            recipient: Some(recipient.into()),
            limit: None,
        }
    }

    /// Caps the number of returned records.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage for [`CodeRecord`]s.
#[async_trait]
pub trait CodeStore: Send + Sync {
    /// Returns which of `keys` already exist.
    async fn find_matching(&self, keys: &[DedupKey]) -> Result<Vec<DedupKey>>;

    /// Inserts records, skipping any whose key already exists.
    async fn insert_many(&self, records: Vec<CodeRecord>) -> Result<InsertReport>;

    /// Returns records received strictly after `since`, newest first.
    async fn find_recent(
        &self,
        since: DateTime<Utc>,
        filter: &RecentFilter,
    ) -> Result<Vec<CodeRecord>>;
}

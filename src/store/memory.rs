use super::{CodeStore, InsertReport, RecentFilter};
use crate::error::Result;
use crate::record::{CodeRecord, DedupKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// In-memory [`CodeStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<DedupKey, CodeRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Returns every record, ordered by key.
    pub async fn snapshot(&self) -> Vec<CodeRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl CodeStore for MemoryStore {
    async fn find_matching(&self, keys: &[DedupKey]) -> Result<Vec<DedupKey>> {
        let records = self.records.read().await;
        Ok(keys
            .iter()
            .filter(|key| records.contains_key(key))
            .cloned()
            .collect())
    }

    async fn insert_many(&self, records: Vec<CodeRecord>) -> Result<InsertReport> {
        let mut stored = self.records.write().await;
        let mut report = InsertReport::default();

        for record in records {
            let key = record.key();
            if stored.contains_key(&key) {
                report.duplicates += 1;
            } else {
                stored.insert(key, record);
                report.inserted += 1;
            }
        }

        Ok(report)
    }

    async fn find_recent(
        &self,
        since: DateTime<Utc>,
        filter: &RecentFilter,
    ) -> Result<Vec<CodeRecord>> {
        let records = self.records.read().await;
        let mut recent: Vec<CodeRecord> = records
            .values()
            .filter(|r| r.received_at > since)
            .filter(|r| filter.recipient.as_ref().map_or(true, |to| &r.recipient == to))
            .cloned()
            .collect();

        recent.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        if let Some(limit) = filter.limit {
            recent.truncate(limit);
        }
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(code: &str, to: &str, secs: i64) -> CodeRecord {
        CodeRecord {
            code: code.into(),
            recipient: to.into(),
            sender: None,
            subject: "Your code".into(),
            received_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            is_protected: false,
        }
    }

    #[tokio::test]
    async fn test_insert_skips_existing_keys() {
        let store = MemoryStore::new();
        let first = store
            .insert_many(vec![record("111111", "a@x.io", 0), record("222222", "a@x.io", 0)])
            .await
            .unwrap();
        assert_eq!(first, InsertReport { inserted: 2, duplicates: 0 });

        let second = store
            .insert_many(vec![record("111111", "a@x.io", 0), record("111111", "b@x.io", 0)])
            .await
            .unwrap();
        assert_eq!(second, InsertReport { inserted: 1, duplicates: 1 });
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test]
    async fn test_find_matching() {
        let store = MemoryStore::new();
        let stored = record("111111", "a@x.io", 0);
        store.insert_many(vec![stored.clone()]).await.unwrap();

        let probe = vec![stored.key(), record("111111", "a@x.io", 1).key()];
        assert_eq!(store.find_matching(&probe).await.unwrap(), vec![stored.key()]);
        assert!(store.find_matching(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_recent_orders_and_filters() {
        let store = MemoryStore::new();
        store
            .insert_many(vec![
                record("111111", "a@x.io", 0),
                record("222222", "b@x.io", 10),
                record("333333", "a@x.io", 20),
                record("444444", "a@x.io", -600),
            ])
            .await
            .unwrap();
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap() - Duration::seconds(1);

        let all = store.find_recent(since, &RecentFilter::default()).await.unwrap();
        let codes: Vec<&str> = all.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, ["333333", "222222", "111111"]);

        let mine = store
            .find_recent(since, &RecentFilter::recipient("a@x.io").with_limit(1))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].code, "333333");
    }

    #[tokio::test]
    async fn test_window_bound_is_exclusive() {
        let store = MemoryStore::new();
        store
            .insert_many(vec![record("111111", "a@x.io", 0), record("222222", "a@x.io", 1)])
            .await
            .unwrap();
        let since = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let found = store.find_recent(since, &RecentFilter::default()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, "222222");
    }
}

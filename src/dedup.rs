//! Filtering of candidate records against what is already stored.

use crate::error::Result;
use crate::record::{CodeRecord, DedupKey};
use crate::store::CodeStore;
use std::collections::HashSet;
use tracing::debug;

/// Returns the candidates whose key is neither stored nor repeated earlier in
/// `candidates`, preserving input order.
///
/// Keys are looked up `chunk_size` at a time to bound query size. A
/// `chunk_size` of zero is treated as one.
///
/// # Errors
///
/// Returns the first store error; nothing is filtered in that case.
pub async fn filter_new(
    store: &dyn CodeStore,
    candidates: Vec<CodeRecord>,
    chunk_size: usize,
) -> Result<Vec<CodeRecord>> {
    if candidates.is_empty() {
        return Ok(candidates);
    }

    let keys: Vec<DedupKey> = candidates.iter().map(CodeRecord::key).collect();
    let mut seen: HashSet<DedupKey> = HashSet::new();
    for chunk in keys.chunks(chunk_size.max(1)) {
        seen.extend(store.find_matching(chunk).await?);
    }
    let existing = seen.len();

    let total = candidates.len();
    let fresh: Vec<CodeRecord> = candidates
        .into_iter()
        .zip(keys)
        .filter_map(|(record, key)| seen.insert(key).then_some(record))
        .collect();

    debug!(total, existing, fresh = fresh.len(), "Filtered candidates");
    Ok(fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn record(code: &str, ms: i64) -> CodeRecord {
        CodeRecord {
            code: code.into(),
            recipient: "user@example.com".into(),
            sender: None,
            subject: "Code".into(),
            received_at: Utc.timestamp_millis_opt(ms).unwrap(),
            is_protected: false,
        }
    }

    #[tokio::test]
    async fn test_drops_stored_and_repeated_keys() {
        let store = MemoryStore::new();
        store.insert_many(vec![record("111111", 1)]).await.unwrap();

        let candidates = vec![
            record("111111", 1),
            record("222222", 1),
            record("222222", 1),
            record("111111", 2),
        ];
        let fresh = filter_new(&store, candidates, 2).await.unwrap();

        let keys: Vec<(String, i64)> = fresh
            .iter()
            .map(|r| (r.code.clone(), r.received_at.timestamp_millis()))
            .collect();
        assert_eq!(keys, [("222222".to_string(), 1), ("111111".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_chunking_covers_every_key() {
        let store = MemoryStore::new();
        let stored: Vec<CodeRecord> = (0..25).map(|i| record("123456", i)).collect();
        store.insert_many(stored.clone()).await.unwrap();

        let mut candidates = stored;
        candidates.push(record("654321", 0));
        let fresh = filter_new(&store, candidates, 7).await.unwrap();

        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].code, "654321");
    }

    #[tokio::test]
    async fn test_zero_chunk_size_and_empty_input() {
        let store = MemoryStore::new();
        assert!(filter_new(&store, Vec::new(), 0).await.unwrap().is_empty());
        assert_eq!(
            filter_new(&store, vec![record("111111", 1)], 0)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}

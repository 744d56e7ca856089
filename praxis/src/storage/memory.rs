//! In-memory state store.
//!
//! Backed by a [`DashMap`]; conditional writes hold the entry's shard lock for
//! the whole check-and-set, which makes them atomic across tasks. Nothing
//! survives process exit, so this backend is for tests, demos and
//! single-process deployments.

use super::{expiry_from, Record, Result, StateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

type RecordKey = (String, String);

#[derive(Default)]
pub struct InMemoryStateStore {
    records: DashMap<RecordKey, Record>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of physically stored records, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_key(collection: &str, key: &str) -> RecordKey {
        (collection.to_string(), key.to_string())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Record>> {
        let now = Utc::now();
        Ok(self
            .records
            .get(&Self::record_key(collection, key))
            .filter(|r| r.is_live(now))
            .map(|r| r.value().clone()))
    }

    async fn put(
        &self,
        collection: &str,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Record> {
        let now = Utc::now();
        let expires_at = expiry_from(now, ttl)?;

        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let record = occupied.get_mut();
                record.version += 1;
                record.value = value.to_vec();
                record.expires_at = expires_at;
                record.updated_at = now;
                Ok(record.clone())
            }
            Entry::Vacant(vacant) => {
                let record = Record {
                    key: key.to_string(),
                    value: value.to_vec(),
                    version: 1,
                    expires_at,
                    updated_at: now,
                };
                vacant.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn compare_and_swap(
        &self,
        collection: &str,
        key: &str,
        expected: Option<u64>,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<Option<Record>> {
        let now = Utc::now();
        let expires_at = expiry_from(now, ttl)?;

        match self.records.entry(Self::record_key(collection, key)) {
            Entry::Occupied(mut occupied) => {
                let current = Some(occupied.get())
                    .filter(|r| r.is_live(now))
                    .map(|r| r.version);
                if current != expected {
                    return Ok(None);
                }

                // Expired records keep counting so a stale version can never match again.
                let record = occupied.get_mut();
                record.version += 1;
                record.value = value.to_vec();
                record.expires_at = expires_at;
                record.updated_at = now;
                Ok(Some(record.clone()))
            }
            Entry::Vacant(vacant) => {
                if expected.is_some() {
                    return Ok(None);
                }
                let record = Record {
                    key: key.to_string(),
                    value: value.to_vec(),
                    version: 1,
                    expires_at,
                    updated_at: now,
                };
                vacant.insert(record.clone());
                Ok(Some(record))
            }
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .records
            .remove(&Self::record_key(collection, key))
            .is_some_and(|(_, r)| r.is_live(now)))
    }

    async fn compare_and_delete(
        &self,
        collection: &str,
        key: &str,
        expected: u64,
    ) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .records
            .remove_if(&Self::record_key(collection, key), |_, r| {
                r.is_live(now) && r.version == expected
            })
            .is_some())
    }

    async fn scan_prefix(&self, collection: &str, prefix: &str) -> Result<Vec<Record>> {
        let now = Utc::now();
        let mut records: Vec<Record> = self
            .records
            .iter()
            .filter(|entry| {
                let (c, k) = entry.key();
                c == collection && k.starts_with(prefix) && entry.value().is_live(now)
            })
            .map(|entry| entry.value().clone())
            .collect();

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut purged = 0u64;
        self.records.retain(|_, record| {
            let keep = record.is_live(now);
            if !keep {
                purged += 1;
            }
            keep
        });
        Ok(purged)
    }

    async fn reset(&self) -> Result<()> {
        self.records.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = InMemoryStateStore::new();

        let first = store.put("c", "k", b"one", None).await.unwrap();
        let second = store.put("c", "k", b"two", None).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        let fetched = store.get("c", "k").await.unwrap().unwrap();
        assert_eq!(fetched.value, b"two");
    }

    #[tokio::test]
    async fn test_compare_and_swap_requires_matching_version() {
        let store = InMemoryStateStore::new();
        let created = store
            .compare_and_swap("c", "k", None, b"v1", None)
            .await
            .unwrap()
            .unwrap();

        assert!(store
            .compare_and_swap("c", "k", Some(created.version + 7), b"x", None)
            .await
            .unwrap()
            .is_none());

        let updated = store
            .compare_and_swap("c", "k", Some(created.version), b"v2", None)
            .await
            .unwrap()
            .unwrap();
        assert!(updated.version > created.version);
        assert_eq!(store.get("c", "k").await.unwrap().unwrap().value, b"v2");
    }

    #[tokio::test]
    async fn test_compare_and_swap_expected_version_on_missing_record() {
        let store = InMemoryStateStore::new();
        assert!(store
            .compare_and_swap("c", "missing", Some(1), b"x", None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_records_are_absent() {
        let store = InMemoryStateStore::new();
        store
            .put("c", "k", b"short-lived", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.get("c", "k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(store.get("c", "k").await.unwrap().is_none());
        assert!(store.scan_prefix("c", "").await.unwrap().is_empty());

        // Expired slot can be claimed by a create-if-absent.
        let claimed = store
            .compare_and_swap("c", "k", None, b"fresh", None)
            .await
            .unwrap();
        assert!(claimed.is_some());
    }

    #[tokio::test]
    async fn test_scan_prefix_orders_by_key_and_scopes_collection() {
        let store = InMemoryStateStore::new();
        store.put("c", "task/b", b"2", None).await.unwrap();
        store.put("c", "task/a", b"1", None).await.unwrap();
        store.put("c", "other/a", b"3", None).await.unwrap();
        store.put("d", "task/c", b"4", None).await.unwrap();

        let keys: Vec<String> = store
            .scan_prefix("c", "task/")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["task/a", "task/b"]);
    }

    #[tokio::test]
    async fn test_delete_and_compare_and_delete() {
        let store = InMemoryStateStore::new();
        let record = store.put("c", "k", b"v", None).await.unwrap();

        assert!(!store
            .compare_and_delete("c", "k", record.version + 1)
            .await
            .unwrap());
        assert!(store
            .compare_and_delete("c", "k", record.version)
            .await
            .unwrap());
        assert!(!store.delete("c", "k").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_counts_removed() {
        let store = InMemoryStateStore::new();
        store
            .put("c", "a", b"1", Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.put("c", "b", b"2", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_if_absent_has_one_winner() {
        let store = Arc::new(InMemoryStateStore::new());
        let mut handles = Vec::new();

        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .compare_and_swap("c", "singleton", None, format!("{i}").as_bytes(), None)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}

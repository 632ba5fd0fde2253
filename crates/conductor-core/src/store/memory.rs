//! In-process TTL store.

use super::{KeyValueStore, Result, StoreError};
use crate::clock::{Clock, SystemClock, to_time_delta};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// An in-memory [`KeyValueStore`] with lazy expiry.
///
/// Entries past their expiry are treated as absent on read and dropped on
/// the next write that touches them or on [`KeyValueStore::purge_expired`].
/// A TTL too large to represent as a timestamp never expires.
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Creates a store driven by the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a store driven by the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { entries: Arc::new(RwLock::new(HashMap::new())), clock }
    }

    /// Returns the number of live keys.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().await.values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true if no live keys exist.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Returns the number of stored entries, expired ones not yet freed included.
    pub async fn stored_len(&self) -> usize {
        self.entries.read().await.len()
    }

    fn expiry(&self, ttl: Duration) -> Option<DateTime<Utc>> {
        self.clock.now().checked_add_signed(to_time_delta(ttl))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes `key` from `entries` if it has expired.
fn evict_if_expired(entries: &mut HashMap<String, Entry>, key: &str, now: DateTime<Utc>) {
    if entries.get(key).is_some_and(|e| !e.is_live(now)) {
        entries.remove(key);
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| self.expiry(ttl));
        self.entries
            .write()
            .await
            .insert(key.to_string(), Entry { value: Value::Text(value), expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(None),
            Some(Entry { value: Value::Text(text), .. }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = self.clock.now();
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| e.is_live(now)))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        evict_if_expired(&mut entries, key, now);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry { value: Value::Set(BTreeSet::new()), expires_at: None });
        match &mut entry.value {
            Value::Set(members) => Ok(members.insert(member.to_string())),
            Value::Text(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        evict_if_expired(&mut entries, key, now);

        let Some(entry) = entries.get_mut(key) else {
            return Ok(false);
        };
        let (removed, now_empty) = match &mut entry.value {
            Value::Set(members) => (members.remove(member), members.is_empty()),
            Value::Text(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        match entries.get(key).filter(|e| e.is_live(now)) {
            None => Ok(Vec::new()),
            Some(Entry { value: Value::Set(members), .. }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entries = self.entries.write().await;
        evict_if_expired(&mut entries, key, now);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = expires_at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_set_get_with_ttl() {
        let (store, clock) = store();
        store.set("k", "v".to_string(), Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_secs(9));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_without_ttl_never_expires() {
        let (store, clock) = store();
        store.set("k", "v".to_string(), None).await.unwrap();
        clock.advance(Duration::from_secs(1_000_000));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_set_membership() {
        let (store, _) = store();
        assert!(store.set_add("s", "b").await.unwrap());
        assert!(store.set_add("s", "a").await.unwrap());
        assert!(!store.set_add("s", "a").await.unwrap());
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a", "b"]);

        assert!(store.set_remove("s", "a").await.unwrap());
        assert!(!store.set_remove("s", "a").await.unwrap());
        assert!(store.set_remove("s", "b").await.unwrap());
        assert!(store.is_empty().await);
        assert!(store.set_members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_refreshes_set() {
        let (store, clock) = store();
        store.set_add("s", "a").await.unwrap();
        assert!(store.expire("s", Duration::from_secs(5)).await.unwrap());

        clock.advance(Duration::from_secs(4));
        assert!(store.expire("s", Duration::from_secs(5)).await.unwrap());
        clock.advance(Duration::from_secs(4));
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a"]);

        clock.advance(Duration::from_secs(2));
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert!(!store.expire("s", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (store, _) = store();
        store.set("k", "v".to_string(), None).await.unwrap();
        assert!(matches!(store.set_add("k", "a").await, Err(StoreError::WrongType(_))));

        store.set_add("s", "a").await.unwrap();
        assert!(matches!(store.get("s").await, Err(StoreError::WrongType(_))));
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (store, clock) = store();
        store.set("a", "1".to_string(), Some(Duration::from_secs(1))).await.unwrap();
        store.set("b", "2".to_string(), None).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.len().await, 1);
        assert_eq!(store.stored_len().await, 2);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.stored_len().await, 1);
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_never_expires() {
        let (store, clock) = store();
        store.set("k", "v".to_string(), Some(Duration::MAX)).await.unwrap();
        store.set_add("s", "a").await.unwrap();
        assert!(store.expire("s", Duration::MAX).await.unwrap());

        clock.advance(Duration::from_secs(1_000_000));
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.set_members("s").await.unwrap(), vec!["a"]);
    }
}

//! TTL-capable key-value storage backing the agent registry.
//!
//! The registry talks to storage only through [`KeyValueStore`], which offers
//! the small Redis-like surface it needs: string values with expiry, string
//! sets, and key expiry refresh.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The key holds a value of a different type.
    #[error("Wrong value type for key: {0}")]
    WrongType(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A key-value store whose entries may expire.
///
/// Expired entries must be indistinguishable from absent ones.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Sets a string value, replacing any previous value and expiry.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Gets a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Deletes a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Adds a member to a set. Returns whether it was newly added.
    async fn set_add(&self, key: &str, member: &str) -> Result<bool>;

    /// Removes a member from a set. Returns whether it was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool>;

    /// Lists the members of a set, empty if the set does not exist.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Refreshes the expiry of an existing key. Returns whether the key exists.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Frees expired entries eagerly. Returns how many were dropped.
    ///
    /// Stores that evict expired keys on their own keep the default no-op.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

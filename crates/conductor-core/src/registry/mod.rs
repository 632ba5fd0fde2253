//! Agent registry.
//!
//! The registry keeps one JSON record per agent under `agent:registry:{id}`
//! plus an index set `agent:registry:all`, both written with the agent TTL.
//! Store failures never reach callers: every operation degrades to a safe
//! default (`false`, empty, `None`, `0`) and logs a warning.

pub mod client;
pub mod heartbeat;
pub mod service;

pub use client::{HeartbeatStatus, RegistryClient};
pub use heartbeat::{Heartbeater, HeartbeatHandle};
pub use service::{RegistryService, ServiceInfo};

use crate::clock::{Clock, SystemClock, to_time_delta};
use crate::store::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix of per-agent record keys.
pub const RECORD_KEY_PREFIX: &str = "agent:registry:";

/// Key of the index set holding every registered agent id.
pub const INDEX_KEY: &str = "agent:registry:all";

/// Default registration lifetime.
pub const DEFAULT_AGENT_TTL: Duration = Duration::from_secs(600);

/// Agent availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Eligible for discovery.
    #[default]
    Active,
    /// Registered but hidden from discovery.
    Inactive,
}

/// A registered worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique, stable identifier.
    pub agent_id: String,
    /// Display name, matched against routing answers.
    pub name: String,
    /// Capability summary shown to the routing oracle.
    pub description: String,
    /// Base URL of the agent.
    pub endpoint: String,
    /// Health check URL.
    pub health_endpoint: String,
    /// Agent version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Availability.
    #[serde(default)]
    pub status: AgentStatus,
    /// Time of the last registration or heartbeat.
    #[serde(default = "Utc::now")]
    pub last_heartbeat: DateTime<Utc>,
    /// Opaque key/value bag.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl AgentDescriptor {
    /// Creates an active descriptor with `health_endpoint = {endpoint}/health`.
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            description: description.into(),
            health_endpoint: format!("{endpoint}/health"),
            endpoint,
            version: default_version(),
            status: AgentStatus::Active,
            last_heartbeat: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Returns true when the agent may be discovered.
    pub fn is_active(&self) -> bool {
        self.status == AgentStatus::Active
    }
}

/// Registry counters reported by `/stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Active agents currently discoverable.
    pub total_agents: usize,
    /// Whether the backing store answered.
    pub registry_enabled: bool,
}

/// TTL-based agent registry over a [`KeyValueStore`].
#[derive(Clone)]
pub struct AgentRegistry {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

fn record_key(agent_id: &str) -> String {
    format!("{RECORD_KEY_PREFIX}{agent_id}")
}

impl AgentRegistry {
    /// Creates a registry using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), ttl)
    }

    /// Creates a registry with an explicit clock.
    #[must_use]
    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    /// Returns the registration lifetime.
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Registers or refreshes an agent.
    ///
    /// Stamps `last_heartbeat` with the current time (never moving it
    /// backwards) and writes the record and index with the registry TTL.
    ///
    /// # Returns
    /// `true` if the record was written
    pub async fn register(&self, mut descriptor: AgentDescriptor) -> bool {
        let now = self.clock.now();
        descriptor.last_heartbeat = match self.get(&descriptor.agent_id).await {
            Some(existing) if existing.last_heartbeat > now => existing.last_heartbeat,
            _ => now,
        };
        self.write(&descriptor).await
    }

    async fn write(&self, descriptor: &AgentDescriptor) -> bool {
        let payload = match serde_json::to_string(descriptor) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(agent_id = %descriptor.agent_id, error = %e, "Failed to serialize agent");
                return false;
            }
        };

        let key = record_key(&descriptor.agent_id);
        let result = async {
            self.store.set(&key, payload, Some(self.ttl)).await?;
            self.store.set_add(INDEX_KEY, &descriptor.agent_id).await?;
            self.store.expire(INDEX_KEY, self.ttl).await
        }
        .await;

        match result {
            Ok(_) => {
                debug!(agent_id = %descriptor.agent_id, name = %descriptor.name, "Agent registered");
                true
            }
            Err(e) => {
                warn!(agent_id = %descriptor.agent_id, error = %e, "Failed to register agent");
                false
            }
        }
    }

    /// Returns an agent's record if it exists and has not expired.
    pub async fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let raw = match self.store.get(&record_key(agent_id)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to read agent");
                return None;
            }
        };

        serde_json::from_str(&raw)
            .map_err(|e| warn!(agent_id = %agent_id, error = %e, "Discarding unreadable agent record"))
            .ok()
    }

    async fn indexed_ids(&self) -> Vec<String> {
        self.store.set_members(INDEX_KEY).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read agent index");
            Vec::new()
        })
    }

    /// Lists active agents, ordered by `agent_id`.
    ///
    /// Index members whose record is gone are skipped.
    pub async fn discover(&self) -> Vec<AgentDescriptor> {
        let mut agents = Vec::new();
        for agent_id in self.indexed_ids().await {
            match self.get(&agent_id).await {
                Some(agent) if agent.is_active() => agents.push(agent),
                Some(_) => {}
                None => debug!(agent_id = %agent_id, "Skipping index entry without record"),
            }
        }
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    /// Refreshes an agent's heartbeat and TTL.
    ///
    /// # Returns
    /// `false` for unknown agents; no record is created for them
    pub async fn heartbeat(&self, agent_id: &str) -> bool {
        let Some(mut descriptor) = self.get(agent_id).await else {
            debug!(agent_id = %agent_id, "Heartbeat for unknown agent");
            return false;
        };
        descriptor.last_heartbeat = descriptor.last_heartbeat.max(self.clock.now());
        self.write(&descriptor).await
    }

    /// Removes an agent.
    ///
    /// # Returns
    /// `true` if a live record was removed
    pub async fn unregister(&self, agent_id: &str) -> bool {
        let removed = match self.store.delete(&record_key(agent_id)).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Failed to unregister agent");
                return false;
            }
        };
        if let Err(e) = self.store.set_remove(INDEX_KEY, agent_id).await {
            warn!(agent_id = %agent_id, error = %e, "Failed to remove agent from index");
        }
        if removed {
            info!(agent_id = %agent_id, "Agent unregistered");
        }
        removed
    }

    /// Removes agents whose last heartbeat is older than `max_age`, then
    /// frees expired store entries.
    ///
    /// Index members without a record are pruned without being counted.
    /// A stale record is re-read just before deletion so a heartbeat that
    /// landed during the sweep keeps the agent; a heartbeat arriving between
    /// that re-read and the delete is still lost, which only matters when
    /// `max_age` is shorter than the registry TTL.
    ///
    /// # Returns
    /// The number of agents removed
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let threshold = self
            .clock
            .now()
            .checked_sub_signed(to_time_delta(max_age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let is_stale = |agent: &AgentDescriptor| agent.last_heartbeat < threshold;
        let mut removed = 0;

        for agent_id in self.indexed_ids().await {
            match self.get(&agent_id).await {
                Some(agent) if is_stale(&agent) => {
                    if !self.get(&agent_id).await.is_some_and(|latest| is_stale(&latest)) {
                        debug!(agent_id = %agent_id, "Agent refreshed during cleanup, keeping it");
                        continue;
                    }
                    if self.unregister(&agent_id).await {
                        removed += 1;
                    }
                }
                Some(_) => {}
                None => {
                    if let Err(e) = self.store.set_remove(INDEX_KEY, &agent_id).await {
                        warn!(agent_id = %agent_id, error = %e, "Failed to prune index entry");
                    }
                }
            }
        }

        match self.store.purge_expired().await {
            Ok(purged) if purged > 0 => debug!(purged, "Freed expired store entries"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to purge expired store entries"),
        }

        if removed > 0 {
            info!(removed, "Removed stale agents");
        }
        removed
    }

    /// Returns registry counters.
    pub async fn stats(&self) -> RegistryStats {
        let registry_enabled = self.store.ping().await.is_ok();
        let total_agents = if registry_enabled { self.discover().await.len() } else { 0 };
        RegistryStats { total_agents, registry_enabled }
    }

    /// Returns whether the backing store answers.
    pub async fn is_enabled(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, Result as StoreResult, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn registry() -> (AgentRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        (AgentRegistry::with_clock(store, clock.clone(), DEFAULT_AGENT_TTL), clock)
    }

    fn agent(id: &str) -> AgentDescriptor {
        AgentDescriptor::new(id, format!("{id}_agent"), "does things", format!("http://{id}:8000"))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let (registry, clock) = registry();
        assert!(registry.register(agent("jira")).await);

        let stored = registry.get("jira").await.unwrap();
        assert_eq!(stored.name, "jira_agent");
        assert_eq!(stored.health_endpoint, "http://jira:8000/health");
        assert_eq!(stored.last_heartbeat, clock.now());
        assert!(registry.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (registry, clock) = registry();
        registry.register(agent("jira")).await;

        clock.advance(Duration::from_secs(599));
        assert_eq!(registry.discover().await.len(), 1);

        clock.advance(Duration::from_secs(2));
        assert!(registry.discover().await.is_empty());
        assert!(registry.get("jira").await.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_extends_ttl() {
        let (registry, clock) = registry();
        registry.register(agent("jira")).await;

        clock.advance(Duration::from_secs(500));
        assert!(registry.heartbeat("jira").await);
        clock.advance(Duration::from_secs(500));

        let agents = registry.discover().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(clock.now() - agents[0].last_heartbeat, chrono::TimeDelta::seconds(500));
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_agent_creates_nothing() {
        let (registry, _) = registry();
        assert!(!registry.heartbeat("ghost").await);
        assert!(registry.get("ghost").await.is_none());
        assert!(registry.discover().await.is_empty());
    }

    #[tokio::test]
    async fn test_discover_filters_inactive_and_sorts() {
        let (registry, _) = registry();
        let mut sleepy = agent("b");
        sleepy.status = AgentStatus::Inactive;
        registry.register(agent("c")).await;
        registry.register(sleepy).await;
        registry.register(agent("a")).await;

        let ids: Vec<String> = registry.discover().await.into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_unregister() {
        let (registry, _) = registry();
        registry.register(agent("jira")).await;
        assert!(registry.unregister("jira").await);
        assert!(!registry.unregister("jira").await);
        assert!(registry.discover().await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale() {
        let (registry, clock) = registry();
        registry.register(agent("old")).await;
        clock.advance(Duration::from_secs(400));
        registry.register(agent("fresh")).await;
        clock.advance(Duration::from_secs(100));

        assert_eq!(registry.cleanup(Duration::from_secs(300)).await, 1);
        assert_eq!(registry.cleanup(Duration::from_secs(300)).await, 0);
        let ids: Vec<String> = registry.discover().await.into_iter().map(|a| a.agent_id).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_cleanup_frees_expired_records() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let registry = AgentRegistry::with_clock(store.clone(), clock.clone(), DEFAULT_AGENT_TTL);
        for i in 0..100 {
            registry.register(agent(&format!("agent-{i}"))).await;
        }
        assert_eq!(store.stored_len().await, 101);

        clock.advance(Duration::from_secs(1000));
        assert_eq!(registry.cleanup(Duration::from_secs(900)).await, 0);
        assert_eq!(store.stored_len().await, 0);
    }

    /// Applies a pending heartbeat right after the next record read.
    struct RacingStore {
        inner: MemoryStore,
        pending: Mutex<Option<String>>,
    }

    #[async_trait]
    impl KeyValueStore for RacingStore {
        async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
            self.inner.set(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            let current = self.inner.get(key).await;
            let pending = self.pending.lock().unwrap().take();
            if let Some(record) = pending {
                self.inner.set(key, record, Some(DEFAULT_AGENT_TTL)).await?;
            }
            current
        }
        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }
        async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_add(key, member).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.set_members(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.inner.expire(key, ttl).await
        }
        async fn ping(&self) -> StoreResult<()> {
            self.inner.ping().await
        }
    }

    #[tokio::test]
    async fn test_cleanup_keeps_agent_refreshed_mid_sweep() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(RacingStore { inner: MemoryStore::with_clock(clock.clone()), pending: Mutex::new(None) });
        let registry = AgentRegistry::with_clock(store.clone(), clock.clone(), DEFAULT_AGENT_TTL);
        registry.register(agent("jira")).await;

        clock.advance(Duration::from_secs(120));
        let mut refreshed = agent("jira");
        refreshed.last_heartbeat = clock.now();
        *store.pending.lock().unwrap() = Some(serde_json::to_string(&refreshed).unwrap());

        assert_eq!(registry.cleanup(Duration::from_secs(60)).await, 0);
        assert_eq!(registry.get("jira").await.unwrap().last_heartbeat, clock.now());
    }

    #[tokio::test]
    async fn test_cleanup_with_huge_max_age_removes_nothing() {
        let (registry, clock) = registry();
        registry.register(agent("jira")).await;
        clock.advance(Duration::from_secs(10));
        assert_eq!(registry.cleanup(Duration::MAX).await, 0);
        assert!(registry.get("jira").await.is_some());
    }

    #[tokio::test]
    async fn test_stats() {
        let (registry, _) = registry();
        registry.register(agent("a")).await;
        assert_eq!(registry.stats().await, RegistryStats { total_agents: 1, registry_enabled: true });
    }

    struct DownStore;

    #[async_trait]
    impl KeyValueStore for DownStore {
        async fn set(&self, _: &str, _: String, _: Option<Duration>) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn delete(&self, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_add(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_remove(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn set_members(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn expire(&self, _: &str, _: Duration) -> StoreResult<bool> {
            Err(StoreError::Unavailable("down".to_string()))
        }
        async fn ping(&self) -> StoreResult<()> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_degrades_to_defaults() {
        let registry = AgentRegistry::new(Arc::new(DownStore), DEFAULT_AGENT_TTL);

        assert!(!registry.register(agent("a")).await);
        assert!(registry.get("a").await.is_none());
        assert!(registry.discover().await.is_empty());
        assert!(!registry.heartbeat("a").await);
        assert!(!registry.unregister("a").await);
        assert_eq!(registry.cleanup(Duration::from_secs(1)).await, 0);
        assert_eq!(registry.stats().await, RegistryStats { total_agents: 0, registry_enabled: false });
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let json = r#"{
            "agent_id": "g1",
            "name": "google_agent",
            "description": "calendar",
            "endpoint": "http://g:8000",
            "health_endpoint": "http://g:8000/health"
        }"#;
        let descriptor: AgentDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(descriptor.status, AgentStatus::Active);
        assert_eq!(descriptor.version, "1.0.0");
        assert!(descriptor.metadata.is_empty());
    }
}

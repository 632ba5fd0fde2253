//! Consecutive-failure circuit breaker.

use super::ResilienceError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the recovery timeout elapses.
    Open,
    /// Up to `success_threshold` concurrent trial calls pass through; one failure reopens.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        };
        f.write_str(name)
    }
}

/// Thresholds of a single breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in CLOSED that open the circuit.
    pub failure_threshold: u32,
    /// Time spent OPEN before the next call is let through.
    pub recovery_timeout: Duration,
    /// Consecutive successes in HALF_OPEN that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(60), success_threshold: 2 }
    }
}

/// Point-in-time snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    /// Breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Consecutive failures counted in CLOSED.
    pub failure_count: u32,
    /// Consecutive successes counted in HALF_OPEN.
    pub success_count: u32,
    /// Wall-clock time of the failure that last opened or reopened the circuit.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Configured failure threshold.
    pub failure_threshold: u32,
    /// Configured success threshold.
    pub success_threshold: u32,
    /// Configured recovery timeout in seconds.
    pub recovery_timeout_secs: f64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    trials_in_flight: u32,
    // Bumped on every entry into HALF_OPEN so stale slots release nothing.
    trial_generation: u64,
}

impl BreakerState {
    const fn closed(trial_generation: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_time: None,
            trials_in_flight: 0,
            trial_generation,
        }
    }
}

/// A HALF_OPEN admission, released when the call finishes or is dropped.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        let mut inner = self.breaker.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_generation == self.generation {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
    }
}

/// A circuit breaker guarding one named target.
///
/// The state lock is held only to evaluate and transition; the guarded call
/// itself runs unlocked.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(BreakerState::closed(0)) }
    }

    /// Returns the breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the breaker thresholds.
    pub const fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `operation` through the breaker.
    ///
    /// # Errors
    ///
    /// Returns `ResilienceError::CircuitOpen` without running the operation
    /// while the circuit is open, or `ResilienceError::Inner` with the
    /// operation's own error.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _slot = match self.acquire() {
            Ok(slot) => slot,
            Err(retry_after) => {
                debug!(breaker = %self.name, ?retry_after, "Circuit open, rejecting call");
                return Err(ResilienceError::CircuitOpen { name: self.name.clone(), retry_after });
            }
        };

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(ResilienceError::Inner(err))
            }
        }
    }

    /// Decides whether a call may proceed, without reserving a trial slot.
    ///
    /// An open circuit whose recovery timeout has elapsed moves to HALF_OPEN.
    ///
    /// # Errors
    ///
    /// Returns the remaining wait while the circuit stays open, or
    /// `Duration::ZERO` while HALF_OPEN already has `success_threshold`
    /// trial calls in flight.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        self.acquire().map(drop)
    }

    fn acquire(&self) -> Result<Option<TrialSlot<'_>>, Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => return Ok(None),
            CircuitState::Open => {
                let elapsed = inner.last_failure.map_or(self.config.recovery_timeout, |at| at.elapsed());
                if elapsed < self.config.recovery_timeout {
                    return Err(self.config.recovery_timeout - elapsed);
                }
                inner.state = CircuitState::HalfOpen;
                inner.success_count = 0;
                inner.trials_in_flight = 0;
                inner.trial_generation = inner.trial_generation.wrapping_add(1);
                info!(breaker = %self.name, "Circuit breaker: Open -> HalfOpen (recovery timeout elapsed)");
            }
            CircuitState::HalfOpen => {}
        }

        if inner.trials_in_flight >= self.config.success_threshold.max(1) {
            debug!(breaker = %self.name, trials = inner.trials_in_flight, "Half-open trial limit reached");
            return Err(Duration::ZERO);
        }
        inner.trials_in_flight += 1;
        Ok(Some(TrialSlot { breaker: self, generation: inner.trial_generation }))
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.trials_in_flight = 0;
                    info!(breaker = %self.name, "Circuit breaker: HalfOpen -> Closed (recovery successful)");
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Self::open(&mut inner);
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker: Closed -> Open (failure threshold reached)"
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::open(&mut inner);
                warn!(breaker = %self.name, "Circuit breaker: HalfOpen -> Open (recovery failed)");
            }
            CircuitState::Open => {}
        }
    }

    fn open(inner: &mut BreakerState) {
        inner.state = CircuitState::Open;
        inner.success_count = 0;
        inner.trials_in_flight = 0;
        inner.last_failure = Some(Instant::now());
        inner.last_failure_time = Some(Utc::now());
    }

    /// Returns the current state without transitioning.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Returns a snapshot of counters and thresholds.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            failure_threshold: self.config.failure_threshold,
            success_threshold: self.config.success_threshold,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs_f64(),
        }
    }

    /// Forces the breaker back to a fresh CLOSED state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let generation = inner.trial_generation.wrapping_add(1);
        *inner = BreakerState::closed(generation);
        drop(inner);
        info!(breaker = %self.name, "Circuit breaker reset");
    }
}

/// Named breakers, created on first use and kept until reset.
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    default_config: CircuitBreakerConfig,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

impl CircuitBreakerRegistry {
    /// Creates an empty registry whose breakers use `default_config`.
    #[must_use]
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self { breakers: RwLock::new(HashMap::new()), default_config }
    }

    /// Returns the breaker for `name`, creating it with the default config.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.default_config)
    }

    /// Returns the breaker for `name`, creating it with `config`.
    ///
    /// An existing breaker keeps its original config.
    pub fn get_or_create_with(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.get(name) {
            return breaker;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            debug!(breaker = %name, "Creating circuit breaker");
            Arc::new(CircuitBreaker::new(name, config))
        }))
    }

    /// Returns the breaker for `name` if it exists.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().unwrap_or_else(PoisonError::into_inner).get(name).cloned()
    }

    /// Runs `operation` through the breaker named `name`.
    ///
    /// # Errors
    ///
    /// See [`CircuitBreaker::call`].
    pub async fn call<T, E, F, Fut>(&self, name: &str, operation: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_create(name).call(operation).await
    }

    /// Returns snapshots of every breaker, ordered by name.
    pub fn all(&self) -> Vec<CircuitBreakerStats> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        let mut stats: Vec<CircuitBreakerStats> = breakers.iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Resets the breaker named `name`. Returns whether it existed.
    pub fn reset(&self, name: &str) -> bool {
        self.get(name).is_some_and(|breaker| {
            breaker.reset();
            true
        })
    }

    /// Resets every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().unwrap_or_else(PoisonError::into_inner).values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<(), ResilienceError<&'static str>> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicU32) -> Result<u32, ResilienceError<&'static str>> {
        breaker
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &'static str>(7)
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let breaker = CircuitBreaker::new("agent", config());
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            assert_eq!(fail(&breaker, &calls).await, Err(ResilienceError::Inner("boom")));
            assert_eq!(breaker.state(), CircuitState::Closed);
        }
        assert_eq!(fail(&breaker, &calls).await, Err(ResilienceError::Inner("boom")));
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.stats().last_failure_time.is_some());

        let result = succeed(&breaker, &calls).await;
        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_counts_down() {
        let breaker = CircuitBreaker::new("agent", config());
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(10)).await;
        match succeed(&breaker, &calls).await {
            Err(ResilienceError::CircuitOpen { name, retry_after }) => {
                assert_eq!(name, "agent");
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("Expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new("agent", config());
        let calls = AtomicU32::new(0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(succeed(&breaker, &calls).await, Ok(7));
        assert_eq!(breaker.stats().failure_count, 0);

        let _ = fail(&breaker, &calls).await;
        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("agent", config());
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        let _ = fail(&breaker, &calls).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(succeed(&breaker, &calls).await, Err(ResilienceError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_successes_close() {
        let breaker = CircuitBreaker::new("agent", config());
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(succeed(&breaker, &calls).await, Ok(7));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.stats().success_count, 1);

        assert_eq!(succeed(&breaker, &calls).await, Ok(7));
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_caps_concurrent_trial_calls() {
        let breaker = Arc::new(CircuitBreaker::new("agent", config()));
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let release = Arc::new(tokio::sync::Notify::new());
        let mut trials = Vec::new();
        for _ in 0..2 {
            let breaker = Arc::clone(&breaker);
            let release = Arc::clone(&release);
            trials.push(tokio::spawn(async move {
                breaker
                    .call(|| async move {
                        release.notified().await;
                        Ok::<_, &'static str>(1)
                    })
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        match succeed(&breaker, &calls).await {
            Err(ResilienceError::CircuitOpen { retry_after, .. }) => assert_eq!(retry_after, Duration::ZERO),
            other => panic!("Expected CircuitOpen, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        release.notify_waiters();
        for trial in trials {
            assert_eq!(trial.await.unwrap(), Ok(1));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_call_frees_its_slot() {
        let breaker = Arc::new(CircuitBreaker::new("agent", CircuitBreakerConfig { success_threshold: 1, ..config() }));
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&breaker, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(30)).await;

        let pending = {
            let breaker = Arc::clone(&breaker);
            tokio::spawn(async move { breaker.call(std::future::pending::<Result<(), &'static str>>).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(breaker.try_acquire(), Err(Duration::ZERO));

        pending.abort();
        let _ = pending.await;
        assert_eq!(breaker.try_acquire(), Ok(()));
        assert_eq!(succeed(&breaker, &calls).await, Ok(7));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_shares_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(config());
        let a = registry.get_or_create("a");
        let a_again = registry.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &a_again));
        assert!(registry.get("b").is_none());

        for _ in 0..3 {
            let _ = registry.call("a", || async { Err::<(), _>("boom") }).await;
        }
        let ok: Result<u32, ResilienceError<&str>> = registry.call("b", || async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));

        let all = registry.all();
        assert_eq!(all.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(all[0].state, CircuitState::Open);
        assert_eq!(all[1].state, CircuitState::Closed);

        assert!(registry.reset("a"));
        assert!(!registry.reset("missing"));
        assert_eq!(a.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..config()
        });
        for name in ["x", "y"] {
            let _ = registry.call(name, || async { Err::<(), _>("boom") }).await;
        }
        assert!(registry.all().iter().all(|s| s.state == CircuitState::Open));

        registry.reset_all();
        assert!(registry.all().iter().all(|s| s.state == CircuitState::Closed));
    }

    #[test]
    fn test_state_display_and_serialize() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
        assert_eq!(serde_json::to_string(&CircuitState::Open).unwrap(), "\"OPEN\"");
    }
}

//! Configuration module for Conductor.
//!
//! Values are layered with the `config` crate: built-in defaults, then an
//! optional TOML file (`--config` or `CONDUCTOR_CONFIG`), then
//! `CONDUCTOR__SECTION__KEY` environment variables. `MODEL_API_KEY` finally
//! overrides the oracle API key.

use crate::resilience::{BackoffStrategy, CircuitBreakerConfig, RetryPolicy};
use conductor_models::OracleConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CONDUCTOR_CONFIG";

/// Prefix for per-key environment overrides.
pub const ENV_PREFIX: &str = "CONDUCTOR";

/// Environment variable overriding the oracle API key.
pub const MODEL_API_KEY_ENV: &str = "MODEL_API_KEY";

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),

    /// A value is out of range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        Self::Load(err.to_string())
    }
}

/// Registry service bind settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address the registry HTTP service binds to.
    #[serde(default = "default_address")]
    pub address: SocketAddr,
}

fn default_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8003))
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: default_address() }
    }
}

/// Registry TTL and sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Lifetime of a registration without heartbeats.
    #[serde(default = "default_agent_ttl_secs")]
    pub agent_ttl_secs: u64,
    /// Period of the background eviction sweep.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Sweep evicts agents silent for longer than `agent_ttl * cleanup_multiplier`.
    #[serde(default = "default_cleanup_multiplier")]
    pub cleanup_multiplier: f64,
}

/// Longest accepted agent TTL, one year.
pub const MAX_AGENT_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const fn default_agent_ttl_secs() -> u64 {
    600
}

const fn default_cleanup_interval_secs() -> u64 {
    300
}

const fn default_cleanup_multiplier() -> f64 {
    1.5
}

impl RegistrySettings {
    /// Registration lifetime.
    #[must_use]
    pub const fn agent_ttl(&self) -> Duration {
        Duration::from_secs(self.agent_ttl_secs)
    }

    /// Sweep period.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Maximum heartbeat age tolerated by the sweep.
    #[must_use]
    pub fn cleanup_max_age(&self) -> Duration {
        self.agent_ttl().mul_f64(self.cleanup_multiplier)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            agent_ttl_secs: default_agent_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_multiplier: default_cleanup_multiplier(),
        }
    }
}

/// Registry client and agent heartbeat settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the registry service.
    #[serde(default = "default_registry_endpoint")]
    pub registry_endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Period between agent heartbeats.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Registration attempts made by an agent on startup.
    #[serde(default = "default_registration_attempts")]
    pub registration_attempts: u32,
}

fn default_registry_endpoint() -> String {
    "http://localhost:8003".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    10
}

const fn default_heartbeat_interval_secs() -> u64 {
    60
}

const fn default_registration_attempts() -> u32 {
    3
}

impl ClientConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry_endpoint: default_registry_endpoint(),
            request_timeout_secs: default_request_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            registration_attempts: default_registration_attempts(),
        }
    }
}

/// Circuit breaker thresholds for agent calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time an open circuit waits before probing.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Consecutive trial successes that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_recovery_timeout_secs() -> u64 {
    60
}

const fn default_success_threshold() -> u32 {
    2
}

impl BreakerSettings {
    /// Converts to a breaker configuration.
    #[must_use]
    pub const fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            success_threshold: self.success_threshold,
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Retry settings for agent calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff curve between attempts.
    #[serde(default = "default_strategy")]
    pub strategy: BackoffStrategy,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_strategy() -> BackoffStrategy {
    BackoffStrategy::ExponentialJitter
}

const fn default_base_delay_ms() -> u64 {
    2_000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl RetrySettings {
    /// Converts to a retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            strategy: self.strategy,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: default_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Dispatch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Deadline for a single `POST /agent` call.
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Deadline for a single `GET /description` call.
    #[serde(default = "default_description_timeout_secs")]
    pub description_timeout_secs: u64,
    /// Fetch each agent's live description before routing.
    #[serde(default = "default_true")]
    pub fetch_live_descriptions: bool,
    /// Circuit breaker thresholds.
    #[serde(default)]
    pub breaker: BreakerSettings,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetrySettings,
}

const fn default_agent_timeout_secs() -> u64 {
    120
}

const fn default_description_timeout_secs() -> u64 {
    10
}

const fn default_true() -> bool {
    true
}

impl DispatchConfig {
    /// Deadline for a single agent call.
    #[must_use]
    pub const fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Deadline for a single description fetch.
    #[must_use]
    pub const fn description_timeout(&self) -> Duration {
        Duration::from_secs(self.description_timeout_secs)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: default_agent_timeout_secs(),
            description_timeout_secs: default_description_timeout_secs(),
            fetch_live_descriptions: default_true(),
            breaker: BreakerSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Refinement loop bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementSettings {
    /// Hard cap on review rounds.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Number of recent states compared for cycle detection.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

const fn default_max_iterations() -> u32 {
    20
}

const fn default_history_window() -> usize {
    3
}

impl Default for RefinementSettings {
    fn default() -> Self {
        Self { max_iterations: default_max_iterations(), history_window: default_history_window() }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), json: false }
    }
}

/// Root configuration for Conductor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Registry service bind settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Registry TTL and sweep settings.
    #[serde(default)]
    pub registry: RegistrySettings,
    /// Registry client settings.
    #[serde(default)]
    pub client: ClientConfig,
    /// Dispatch settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Refinement loop bounds.
    #[serde(default)]
    pub refinement: RefinementSettings,
    /// Oracle selection.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the process environment and an optional file.
    ///
    /// An explicit `path` wins over `CONDUCTOR_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path: Option<PathBuf> =
            path.map(Path::to_path_buf).or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from));
        Self::load_with(path.as_deref(), None)
    }

    /// Load configuration with an explicit environment map.
    ///
    /// `env` replaces the process environment when given, so layering can be
    /// exercised without touching global state.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load_with(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Toml).required(true),
            );
        }

        let api_key = match &env {
            Some(vars) => vars.get(MODEL_API_KEY_ENV).cloned(),
            None => std::env::var(MODEL_API_KEY_ENV).ok(),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let mut loaded: Self = builder.build()?.try_deserialize()?;
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            loaded.oracle.api_key = Some(key);
        }

        loaded.validate()?;
        Ok(loaded)
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(value: u64, field: &str) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be positive")));
            }
            Ok(())
        }

        positive(u64::from(self.server.address.port()), "server.address port")?;
        positive(self.registry.agent_ttl_secs, "registry.agent_ttl_secs")?;
        if self.registry.agent_ttl_secs > MAX_AGENT_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "registry.agent_ttl_secs must not exceed {MAX_AGENT_TTL_SECS}"
            )));
        }
        positive(self.registry.cleanup_interval_secs, "registry.cleanup_interval_secs")?;
        if !(self.registry.cleanup_multiplier.is_finite() && self.registry.cleanup_multiplier > 0.0)
        {
            return Err(ConfigError::Invalid(
                "registry.cleanup_multiplier must be a positive number".to_string(),
            ));
        }

        if reqwest::Url::parse(&self.client.registry_endpoint).is_err() {
            return Err(ConfigError::Invalid(format!(
                "client.registry_endpoint is not a URL: {}",
                self.client.registry_endpoint
            )));
        }
        positive(self.client.request_timeout_secs, "client.request_timeout_secs")?;
        positive(self.client.heartbeat_interval_secs, "client.heartbeat_interval_secs")?;
        positive(u64::from(self.client.registration_attempts), "client.registration_attempts")?;

        positive(self.dispatch.agent_timeout_secs, "dispatch.agent_timeout_secs")?;
        positive(self.dispatch.description_timeout_secs, "dispatch.description_timeout_secs")?;
        positive(u64::from(self.dispatch.breaker.failure_threshold), "dispatch.breaker.failure_threshold")?;
        positive(self.dispatch.breaker.recovery_timeout_secs, "dispatch.breaker.recovery_timeout_secs")?;
        positive(u64::from(self.dispatch.breaker.success_threshold), "dispatch.breaker.success_threshold")?;
        positive(u64::from(self.dispatch.retry.max_attempts), "dispatch.retry.max_attempts")?;
        if self.dispatch.retry.max_delay_ms < self.dispatch.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "dispatch.retry.max_delay_ms must not be below base_delay_ms".to_string(),
            ));
        }

        positive(u64::from(self.refinement.max_iterations), "refinement.max_iterations")?;
        positive(self.refinement.history_window as u64, "refinement.history_window")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_models::OracleKind;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.address, "127.0.0.1:8003".parse().unwrap());
        assert_eq!(config.registry.agent_ttl(), Duration::from_secs(600));
        assert_eq!(config.registry.cleanup_max_age(), Duration::from_secs(900));
        assert_eq!(config.client.registry_endpoint, "http://localhost:8003");
        assert_eq!(config.dispatch.agent_timeout(), Duration::from_secs(120));
        assert_eq!(config.dispatch.retry.retry_policy().max_delay, Duration::from_secs(30));
        assert_eq!(config.refinement.max_iterations, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_without_sources_is_default() {
        let config = Config::load_with(None, env(&[])).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_then_env_layering() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[registry]
agent_ttl_secs = 120

[dispatch.breaker]
failure_threshold = 2

[oracle]
kind = "openai"
model = "local-llama"
"#
        )
        .unwrap();

        let config = Config::load_with(
            Some(file.path()),
            env(&[
                ("CONDUCTOR__REGISTRY__AGENT_TTL_SECS", "30"),
                ("CONDUCTOR__REFINEMENT__MAX_ITERATIONS", "4"),
                ("MODEL_API_KEY", "sk-test"),
            ]),
        )
        .unwrap();

        assert_eq!(config.registry.agent_ttl_secs, 30);
        assert_eq!(config.registry.cleanup_interval_secs, 300);
        assert_eq!(config.dispatch.breaker.failure_threshold, 2);
        assert_eq!(config.dispatch.breaker.success_threshold, 2);
        assert_eq!(config.refinement.max_iterations, 4);
        assert_eq!(config.oracle.kind, OracleKind::OpenAI);
        assert_eq!(config.oracle.model, "local-llama");
        assert_eq!(config.oracle.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let result = Config::load_with(Some(Path::new("/nonexistent/conductor.toml")), env(&[]));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = Config::load_with(None, env(&[("CONDUCTOR__REGISTRY__AGENT_TTL_SECS", "0")]));
        assert!(matches!(result, Err(ConfigError::Invalid(msg)) if msg.contains("agent_ttl_secs")));

        let mut config = Config::default();
        config.registry.agent_ttl_secs = MAX_AGENT_TTL_SECS;
        assert!(config.validate().is_ok());
        config.registry.agent_ttl_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("must not exceed")));

        let mut config = Config::default();
        config.registry.cleanup_multiplier = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.retry.max_delay_ms = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.registry_endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}

//! Oracle factory for creating oracle instances from configuration.

use crate::{MockOracle, ScriptedOracle, UniversalOracle};
use conductor_abstraction::{Oracle, OracleError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Oracle kind enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleKind {
    /// Echoing mock oracle.
    #[default]
    Mock,
    /// Scripted oracle loaded from a TOML file.
    Scripted,
    /// OpenAI or any OpenAI-compatible server.
    #[serde(alias = "universal", alias = "openai-compatible")]
    OpenAI,
}

impl FromStr for OracleKind {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "scripted" => Ok(Self::Scripted),
            "openai" | "universal" | "openai-compatible" => Ok(Self::OpenAI),
            other => Err(OracleError::Unsupported(format!("Unknown oracle kind: {other}"))),
        }
    }
}

/// Oracle configuration, as found in the `[oracle]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Which oracle to build.
    #[serde(default)]
    pub kind: OracleKind,
    /// Model identifier sent to OpenAI-compatible servers.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API key; absent means no authentication header.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Script file for the scripted oracle.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

const fn default_timeout_secs() -> u64 {
    60
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            kind: OracleKind::default(),
            model: default_model(),
            base_url: default_base_url(),
            api_key: None,
            script_path: None,
            timeout_secs: default_timeout_secs(),
            temperature: None,
        }
    }
}

/// Factory for creating oracle instances.
pub struct OracleFactory;

impl OracleFactory {
    /// Creates an oracle from configuration.
    ///
    /// # Arguments
    /// * `config` - The oracle configuration
    ///
    /// # Errors
    /// Returns `OracleError::Unsupported` if the scripted oracle has no
    /// usable script file.
    pub fn create(config: &OracleConfig) -> Result<Arc<dyn Oracle>, OracleError> {
        debug!(kind = ?config.kind, model = %config.model, "Creating oracle");

        match config.kind {
            OracleKind::Mock => Ok(Arc::new(MockOracle::new(config.model.clone()))),
            OracleKind::Scripted => {
                let path = config.script_path.as_deref().ok_or_else(|| {
                    OracleError::Unsupported("Scripted oracle requires script_path".to_string())
                })?;
                Ok(Arc::new(ScriptedOracle::from_toml_file(config.model.clone(), path)?))
            }
            OracleKind::OpenAI => {
                let oracle = match &config.api_key {
                    Some(key) => UniversalOracle::with_api_key(
                        config.model.clone(),
                        config.base_url.clone(),
                        key.clone(),
                    ),
                    None => {
                        UniversalOracle::without_auth(config.model.clone(), config.base_url.clone())
                    }
                };
                Ok(Arc::new(
                    oracle
                        .with_timeout(Duration::from_secs(config.timeout_secs))
                        .with_temperature(config.temperature),
                ))
            }
        }
    }
}

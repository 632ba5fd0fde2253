//! Error types for Conductor Core.
//!
//! Besides the crate-level [`CoreError`], this module provides
//! [`ErrorContext`]: a structured report built from any typed error, to which
//! call sites append key/value context before logging it or returning it in
//! an API body.

use crate::config::ConfigError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Core error type for Conductor operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors (binding, reading files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backing store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for Conductor operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Stable identifiers for an error, used in structured reports.
pub trait ErrorCode {
    /// Short kind name, e.g. `CircuitOpen`.
    fn error_kind(&self) -> &'static str;

    /// Machine-readable code, e.g. `CIRCUIT_OPEN`.
    fn error_code(&self) -> &'static str;
}

impl ErrorCode for StoreError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "StoreUnavailable",
            Self::WrongType(_) => "StoreWrongType",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "STORE_UNAVAILABLE",
            Self::WrongType(_) => "STORE_WRONG_TYPE",
        }
    }
}

impl ErrorCode for ConfigError {
    fn error_kind(&self) -> &'static str {
        match self {
            Self::Load(_) => "ConfigLoad",
            Self::Invalid(_) => "ConfigInvalid",
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::Load(_) => "CONFIG_LOAD_ERROR",
            Self::Invalid(_) => "CONFIG_INVALID",
        }
    }
}

/// A structured error report with appendable context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Kind of the originating error.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    pub error_code: String,
    /// Key/value context appended by call sites.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl ErrorContext {
    /// Builds a report from a typed error.
    #[must_use]
    pub fn from_error<E: ErrorCode + fmt::Display + ?Sized>(error: &E) -> Self {
        Self {
            error: error.error_kind().to_string(),
            message: error.to_string(),
            error_code: error.error_code().to_string(),
            context: BTreeMap::new(),
        }
    }

    /// Appends a context entry, replacing any previous value for `key`.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.insert(key, value);
        self
    }

    /// Appends a context entry in place.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.context.insert(key.into(), value);
    }

    /// Serialises the report as `{error, message, error_code, context}`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.error_code, self.message)?;
        if !self.context.is_empty() {
            let pairs: Vec<String> =
                self.context.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, " ({})", pairs.join(", "))?;
        }
        Ok(())
    }
}

//! TOML configuration plumbing shared by the GBS binaries.
//!
//! Each binary owns its configuration struct. This module supplies the
//! `[service]` table every binary carries, the [`Validate`] hook, and the
//! loaders that parse and validate in one step.
//!
//! ```rust,no_run
//! use gbs_common::config::{ConfigError, ServiceConfig, Validate, load_toml};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct ProbeConfig {
//!     #[serde(default)]
//!     service: ServiceConfig,
//!     retries: u8,
//! }
//!
//! impl Validate for ProbeConfig {
//!     fn validate(&self) -> Result<(), ConfigError> {
//!         self.service.validate()
//!     }
//! }
//!
//! let config: ProbeConfig = load_toml(Path::new("probe.toml")).unwrap();
//! println!("{} x{}", config.service.service_name, config.retries);
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest accepted `service_name`; it ends up in every log line.
pub const SERVICE_NAME_MAX: usize = 32;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("no configuration file at {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("cannot read {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("malformed TOML: {0}")]
    ParseError(String),

    #[error("configuration rejected: {0}")]
    ValidationError(String),
}

// ─── Service Table ──────────────────────────────────────────────────

/// Verbosity applied to the `tracing` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[serde(alias = "warning")]
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// The next noisier level, saturating at `Trace`.
    pub const fn louder(self) -> Self {
        match self {
            Self::Error => Self::Warn,
            Self::Warn => Self::Info,
            Self::Info => Self::Debug,
            Self::Debug | Self::Trace => Self::Trace,
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

fn default_service_name() -> String {
    "gbs-sync".to_string()
}

/// The `[service]` table.
///
/// ```toml
/// [service]
/// service_name = "gbs-sync-bench"
/// log_level = "debug"
/// log_format = "json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

impl Validate for ServiceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let name = &self.service_name;
        if name.is_empty() || name.len() > SERVICE_NAME_MAX {
            return Err(ConfigError::ValidationError(format!(
                "service.service_name must be 1..={SERVICE_NAME_MAX} characters"
            )));
        }
        if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
            return Err(ConfigError::ValidationError(format!(
                "service.service_name {name:?} may only hold ASCII letters, digits, '-' and '_'"
            )));
        }
        Ok(())
    }
}

// ─── Loading ────────────────────────────────────────────────────────

/// Semantic checks run after a document parsed.
pub trait Validate {
    fn validate(&self) -> Result<(), ConfigError>;
}

/// Parse a TOML document and validate it.
pub fn parse_toml<T: DeserializeOwned + Validate>(text: &str) -> Result<T, ConfigError> {
    let value: T = toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    value.validate()?;
    Ok(value)
}

/// Read, parse and validate a TOML file.
///
/// A missing file is reported as [`ConfigError::FileNotFound`] so callers can
/// fall back to defaults.
pub fn load_toml<T: DeserializeOwned + Validate>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_path_buf()),
        _ => ConfigError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;
    parse_toml(&text)
}

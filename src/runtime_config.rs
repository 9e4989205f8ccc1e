//! # Runtime Configuration Module
//!
//! Explicit configuration for the dispatcher and its worker pool, loaded from
//! environment variables or a YAML file and handed to
//! [`crate::dispatcher::DispatcherBuilder::with_runtime_config`]. Nothing in
//! the crate reads these settings behind the caller's back.
//!
//! ## Environment Variables
//!
//! | Variable                        | Meaning                                     | Default      |
//! |---------------------------------|---------------------------------------------|--------------|
//! | `ROUTECORE_EXECUTION_MODE`      | `event_loop`, `worker` or `default`         | `default`    |
//! | `ROUTECORE_REQUEST_ID_HEADER`   | header a client-supplied request id is read from | `x-request-id` |
//! | `ROUTECORE_HANDLER_WORKERS`     | worker threads                              | `4`          |
//! | `ROUTECORE_HANDLER_QUEUE_BOUND` | jobs allowed to wait for a worker           | `1024`       |
//! | `ROUTECORE_STACK_SIZE`          | worker stack size, decimal or `0x` hex      | `0x40000`    |
//!
//! ## YAML
//!
//! ```yaml
//! default_execution_mode: worker
//! request_id_header: x-correlation-id
//! worker:
//!   num_workers: 8
//!   queue_bound: 256
//!   stack_size: "0x80000"
//! ```
//!
//! Omitted keys keep their defaults.

use std::env;
use std::path::Path;

use anyhow::Context as _;
use serde::{Deserialize, Deserializer};

use crate::route::ExecutionMode;
use crate::worker_pool::WorkerPoolConfig;

/// Header request ids are read from unless configured otherwise
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-request-id";

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Mode for routes that do not override it; `Default` infers from the handler
    pub default_execution_mode: ExecutionMode,
    /// Header carrying a client-supplied request id
    pub request_id_header: String,
    /// Worker pool sizing
    pub worker: WorkerPoolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_execution_mode: ExecutionMode::Default,
            request_id_header: DEFAULT_REQUEST_ID_HEADER.to_string(),
            worker: WorkerPoolConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparseable variables fall back to their defaults; an invalid
    /// execution mode is logged.
    pub fn from_env() -> Self {
        let default_execution_mode = match env::var("ROUTECORE_EXECUTION_MODE") {
            Ok(raw) => raw.parse().unwrap_or_else(|e: String| {
                tracing::warn!(value = %raw, error = %e, "Ignoring ROUTECORE_EXECUTION_MODE");
                ExecutionMode::Default
            }),
            Err(_) => ExecutionMode::Default,
        };
        let request_id_header = env::var("ROUTECORE_REQUEST_ID_HEADER")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REQUEST_ID_HEADER.to_string());

        Self {
            default_execution_mode,
            request_id_header,
            worker: WorkerPoolConfig::from_env(),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or is not valid configuration YAML.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read runtime config {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("Invalid runtime config {}", path.display()))
    }

    /// Parse configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Fails when the text is not valid configuration YAML.
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        Ok(config)
    }
}

/// Parse a byte size written in decimal or as `0x` hex
pub(crate) fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Accept a size as a YAML integer or as a decimal / hex string
pub(crate) fn deserialize_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(usize),
        Text(String),
    }

    match Size::deserialize(deserializer)? {
        Size::Number(n) => Ok(n),
        Size::Text(s) => parse_size(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid size `{s}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x4000"), Some(0x4000));
        assert_eq!(parse_size("0X10"), Some(16));
        assert_eq!(parse_size(" 32768 "), Some(32768));
        assert_eq!(parse_size("lots"), None);
    }

    #[test]
    fn test_yaml_partial_keeps_defaults() {
        let config = RuntimeConfig::from_yaml_str("default_execution_mode: worker\n").unwrap();
        assert_eq!(config.default_execution_mode, ExecutionMode::Worker);
        assert_eq!(config.request_id_header, DEFAULT_REQUEST_ID_HEADER);
        assert_eq!(config.worker, WorkerPoolConfig::default());
    }

    #[test]
    fn test_yaml_hex_stack_size() {
        let config = RuntimeConfig::from_yaml_str(
            "worker:\n  num_workers: 2\n  stack_size: \"0x8000\"\n",
        )
        .unwrap();
        assert_eq!(config.worker.num_workers, 2);
        assert_eq!(config.worker.queue_bound, 1024);
        assert_eq!(config.worker.stack_size, 0x8000);
    }

    #[test]
    fn test_yaml_rejects_unknown_mode() {
        assert!(RuntimeConfig::from_yaml_str("default_execution_mode: turbo\n").is_err());
    }
}

//! Configuration file structures for wasm-embed.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`WasiConfig`]: WASI pass-through settings
//! - [`NativesConfig`]: Which standard native functions to register

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::RuntimeConfig;

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// [runtime.engine]
/// max_threads = 4
/// log_level = "debug"
/// allocator = { type = "pool", size_bytes = 134217728 }
///
/// [runtime.instance]
/// stack_size = 65536
/// heap_size = 16384
///
/// [wasi]
/// dirs = ["."]
/// map_dirs = ["/data::./data"]
/// env = ["RUST_BACKTRACE=1"]
/// addr_pool = ["127.0.0.1/32"]
///
/// [natives]
/// logging = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (engine + instance defaults).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// WASI configuration applied to every loaded module.
    #[serde(default)]
    pub wasi: WasiConfig,

    /// Standard native function selection.
    #[serde(default)]
    pub natives: NativesConfig,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigFileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// WASI settings, in the same textual forms the command line accepts.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Host directories pre-opened under the same guest path.
    #[serde(default)]
    pub dirs: Vec<String>,

    /// `GUEST::HOST` directory mappings.
    #[serde(default)]
    pub map_dirs: Vec<String>,

    /// `KEY=VALUE` environment variables.
    #[serde(default)]
    pub env: Vec<String>,

    /// IP addresses or CIDR blocks guest sockets may use.
    #[serde(default)]
    pub addr_pool: Vec<String>,

    /// Host name suffixes guest name lookups may resolve.
    #[serde(default)]
    pub ns_lookup_pool: Vec<String>,
}

/// Standard native function selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NativesConfig {
    /// Register `env.log`.
    #[serde(default = "defaults::logging")]
    pub logging: bool,
}

impl Default for NativesConfig {
    fn default() -> Self {
        Self {
            logging: defaults::logging(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub const fn logging() -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocationStrategy, LogLevel};

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();

        assert_eq!(config.runtime.engine.max_threads, 4);
        assert!(config.wasi.dirs.is_empty());
        assert!(config.wasi.env.is_empty());
        assert!(config.natives.logging);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            [runtime.instance]
            stack_size = 65536
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.instance.stack_size, 65536);
        // Defaults applied
        assert_eq!(config.runtime.instance.heap_size, 16 * 1024);
        assert!(config.natives.logging);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [runtime.engine]
            max_threads = 2
            log_level = "debug"
            instance_memory_mb = 16
            allocator = { type = "pool", size_bytes = 33554432 }

            [runtime.instance]
            stack_size = 32768
            heap_size = 4096

            [wasi]
            dirs = ["."]
            map_dirs = ["/data::./data"]
            env = ["KEY=value"]
            addr_pool = ["127.0.0.1/32", "::1"]
            ns_lookup_pool = ["example.com"]

            [natives]
            logging = false
        "#;

        let config = ConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.max_threads, 2);
        assert_eq!(config.runtime.engine.log_level, LogLevel::Debug);
        assert_eq!(config.runtime.engine.instance_memory_mb, 16);
        assert!(matches!(
            config.runtime.engine.allocator,
            AllocationStrategy::Pool {
                size_bytes: 33_554_432
            }
        ));
        assert_eq!(config.runtime.instance.stack_size, 32768);
        assert_eq!(config.runtime.instance.heap_size, 4096);
        assert_eq!(config.wasi.dirs, vec!["."]);
        assert_eq!(config.wasi.map_dirs, vec!["/data::./data"]);
        assert_eq!(config.wasi.env, vec!["KEY=value"]);
        assert_eq!(config.wasi.addr_pool.len(), 2);
        assert_eq!(config.wasi.ns_lookup_pool, vec!["example.com"]);
        assert!(!config.natives.logging);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let invalid = "this is not valid toml [";
        let result = ConfigFile::from_toml(invalid);
        assert!(matches!(result, Err(ConfigFileError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigFile::from_file("/nonexistent/wasm-embed.toml");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }
}

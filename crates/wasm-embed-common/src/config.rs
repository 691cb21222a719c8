//! Configuration structures for wasm-embed.
//!
//! This module defines configuration options for the embedding layers:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Engine-wide settings (allocator, threads, logging)
//! - [`InstanceConfig`]: Default per-instance stack and heap sizes

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Bytes in one WebAssembly page.
pub const WASM_PAGE_SIZE: usize = 64 * 1024;

/// Top-level runtime configuration.
///
/// It can be loaded from files (TOML, JSON) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Default instance configuration.
    #[serde(default)]
    pub instance: InstanceConfig,
}

/// Engine-wide configuration, consumed once by `Runtime::init`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Where the engine allocates its own memory from.
    #[serde(default)]
    pub allocator: AllocationStrategy,

    /// Maximum number of threads the engine may run guest code on.
    #[serde(default = "defaults::max_threads")]
    pub max_threads: u32,

    /// Engine log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Upper bound for one instance's linear memory in megabytes.
    ///
    /// With [`AllocationStrategy::Pool`] this is also the size of one pool slot.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allocator: AllocationStrategy::default(),
            max_threads: defaults::max_threads(),
            log_level: LogLevel::default(),
            instance_memory_mb: defaults::instance_memory_mb(),
        }
    }
}

impl EngineConfig {
    /// Check values that can be rejected without asking the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_threads` or `instance_memory_mb` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::invalid_value(
                "max_threads",
                "must be at least 1",
            ));
        }
        if self.instance_memory_mb == 0 {
            return Err(ConfigError::invalid_value(
                "instance_memory_mb",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Linear memory limit for one instance in bytes.
    pub fn instance_memory_bytes(&self) -> usize {
        (self.instance_memory_mb as usize) * 1024 * 1024
    }
}

/// Memory allocation strategy for the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AllocationStrategy {
    /// Allocate from the system allocator on demand.
    #[default]
    System,

    /// Pre-allocate a fixed pool of `size_bytes` and carve instances out of it.
    Pool {
        /// Total pool size in bytes.
        size_bytes: usize,
    },

    /// Route engine allocations through host-provided functions.
    ///
    /// Only available when configuring in code.
    #[serde(skip)]
    Custom(HostAllocator),
}

/// Host allocation callbacks for [`AllocationStrategy::Custom`].
#[derive(Clone, Copy)]
pub struct HostAllocator {
    /// Allocate `size` bytes.
    pub malloc: fn(usize) -> *mut u8,
    /// Resize an allocation.
    pub realloc: fn(*mut u8, usize) -> *mut u8,
    /// Release an allocation.
    pub free: fn(*mut u8),
}

impl fmt::Debug for HostAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAllocator").finish_non_exhaustive()
    }
}

/// Engine log verbosity, from least to most verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only fatal conditions.
    Fatal,
    /// Errors.
    Error,
    /// Warnings and errors.
    #[default]
    Warning,
    /// Debug output.
    Debug,
    /// Everything.
    Verbose,
}

impl LogLevel {
    /// Map a numeric verbosity (`0..=4`, larger is noisier) to a level.
    ///
    /// Values above 4 saturate to [`LogLevel::Verbose`].
    pub const fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::Fatal,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Debug,
            _ => Self::Verbose,
        }
    }

    /// Numeric verbosity of this level.
    pub const fn verbosity(self) -> u8 {
        self as u8
    }

    /// `tracing` filter directive matching this level.
    pub const fn as_filter_directive(self) -> &'static str {
        match self {
            Self::Fatal | Self::Error => "error",
            Self::Warning => "warn",
            Self::Debug => "debug",
            Self::Verbose => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Fatal => write!(f, "FATAL"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Verbose => write!(f, "VERBOSE"),
        }
    }
}

/// Default sizes used when instantiating without explicit values.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Operand/call stack size in bytes.
    #[serde(default = "defaults::stack_size")]
    pub stack_size: u32,

    /// Application heap size in bytes.
    #[serde(default = "defaults::heap_size")]
    pub heap_size: u32,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            stack_size: defaults::stack_size(),
            heap_size: defaults::heap_size(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_threads() -> u32 {
        4
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn stack_size() -> u32 {
        16 * 1024
    }

    pub const fn heap_size() -> u32 {
        16 * 1024
    }
}

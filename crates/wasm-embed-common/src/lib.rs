//! Common types, errors, and configuration for wasm-embed.
//!
//! This crate provides shared functionality used across the wasm-embed workspace:
//! - Error types using `thiserror`, one enum per lifecycle stage
//! - Configuration structures for the engine and instances
//! - Value type and function signature definitions

pub mod config;
pub mod config_file;
pub mod error;
pub mod types;

pub use config::{
    AllocationStrategy, EngineConfig, HostAllocator, InstanceConfig, LogLevel, RuntimeConfig,
    WASM_PAGE_SIZE,
};
pub use config_file::{ConfigFile, ConfigFileError, NativesConfig, WasiConfig};
pub use error::{
    CallError, ConfigError, EngineError, Error, HostFunctionError, InstantiateError, LoadError,
    MemoryError,
};
pub use types::{FuncSignature, ValueType};

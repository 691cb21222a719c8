//! Error types for wasm-embed.
//!
//! Every engine-reported failure is translated into one of these enums at the
//! engine boundary:
//! - [`ConfigError`]: bad initialization parameters
//! - [`EngineError`]: runtime (engine handle) lifecycle failures
//! - [`LoadError`]: module bytes rejected
//! - [`InstantiateError`]: instance creation failures
//! - [`CallError`]: export resolution, marshalling and traps
//! - [`MemoryError`]: linear memory access failures
//! - [`HostFunctionError`]: failures raised by native (host) functions

use std::io;

use thiserror::Error;

use crate::types::ValueType;

/// Invalid configuration, detected before the engine is involved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration value for `{field}`: {reason}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// A native symbol signature string could not be parsed.
    #[error("Invalid native signature '{signature}': {reason}")]
    InvalidSignature {
        /// The signature as written.
        signature: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A native symbol was registered twice in the same namespace.
    #[error("Duplicate native symbol {namespace}.{name}")]
    DuplicateSymbol {
        /// Namespace (import module name).
        namespace: String,
        /// Symbol name.
        name: String,
    },

    /// A WASI address pool entry is not an IP address or CIDR block.
    #[error("Invalid address pool entry '{entry}'")]
    InvalidAddrPool {
        /// The entry as written.
        entry: String,
    },
}

/// Errors from the engine handle lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// An operation was attempted before the runtime was initialized, or
    /// after it was destroyed.
    #[error("Runtime is not initialized")]
    NotInitialized,

    /// `init` was called on a runtime that is already initialized, or the
    /// engine only supports one live runtime per process.
    #[error("Runtime is already initialized")]
    AlreadyInitialized,

    /// The engine rejected the configuration.
    #[error("Runtime initialization failed: {reason}")]
    InitFailed {
        /// Engine diagnostic.
        reason: String,
    },

    /// The object was created under a runtime generation that has since been
    /// destroyed.
    #[error("Object belongs to a destroyed runtime")]
    Invalidated,

    /// Initialization parameters were rejected before reaching the engine.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading a module.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The input was rejected before reaching the engine.
    #[error("Invalid module input: {reason}")]
    InvalidInput {
        /// Why the input was rejected.
        reason: String,
    },

    /// The engine rejected the module bytes.
    #[error("Module load failed: {message}")]
    EngineRejected {
        /// Engine diagnostic (bounded, possibly truncated).
        message: String,
    },

    /// Reading the module file failed.
    #[error("Failed to read module file '{path}': {source}")]
    Io {
        /// The path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The runtime is not usable.
    #[error("Module load failed: {0}")]
    Engine(#[from] EngineError),
}

/// Errors from creating an instance.
#[derive(Error, Debug)]
pub enum InstantiateError {
    /// The module was destroyed or never finished loading.
    #[error("Instantiate failed: invalid module")]
    InvalidModule,

    /// The instance was created but its execution environment was not.
    #[error("Instantiate failed: create exec_env failed")]
    ExecEnvFailed,

    /// The engine refused to instantiate the module.
    #[error("Instantiate failed: {message}")]
    EngineRejected {
        /// Engine diagnostic (bounded, possibly truncated).
        message: String,
    },

    /// The runtime is not usable.
    #[error("Instantiate failed: {0}")]
    Engine(#[from] EngineError),
}

/// Errors from calling an exported function.
#[derive(Error, Debug)]
pub enum CallError {
    /// No exported function has this name.
    #[error("Call failed: export '{name}' not found")]
    NoSuchExport {
        /// Requested export name.
        name: String,
    },

    /// A supplied argument does not match the declared parameter type.
    #[error("Call failed: argument {position} expects {expected}, got {actual}")]
    TypeMismatch {
        /// Zero-based argument position.
        position: usize,
        /// Declared parameter type.
        expected: ValueType,
        /// Type of the supplied value.
        actual: ValueType,
    },

    /// The number of supplied arguments differs from the declared count.
    #[error("Call failed: expected {expected} arguments, got {actual}")]
    ArgumentCountMismatch {
        /// Declared parameter count.
        expected: usize,
        /// Supplied argument count.
        actual: usize,
    },

    /// The caller asked for fewer results than the function declares.
    #[error("Call failed: invalid result count {expected}, must be no smaller than {declared}")]
    ResultArityMismatch {
        /// Result count requested by the caller.
        expected: usize,
        /// Declared result count.
        declared: usize,
    },

    /// A value of this type cannot travel through 32-bit argument slots.
    #[error("Call failed: unsupported value type {ty} at position {position}")]
    UnsupportedType {
        /// Zero-based position in the parameter or result list.
        position: usize,
        /// The unsupported type.
        ty: ValueType,
    },

    /// `argc` exceeds the number of slots actually provided.
    #[error("Call failed: argc {argc} exceeds the {available} provided slots")]
    ArgumentSlots {
        /// Requested slot count.
        argc: u32,
        /// Length of the slot array.
        available: usize,
    },

    /// The result slots are too short to decode the declared results.
    #[error("Call failed: {needed} result slots needed, {available} available")]
    ResultSlots {
        /// Slots needed.
        needed: usize,
        /// Slots available.
        available: usize,
    },

    /// The engine reported a trap or failure during the call.
    #[error("Call to '{function}' trapped: {message}")]
    Trapped {
        /// The function that was called.
        function: String,
        /// Exception text read from the instance right after the call.
        message: String,
    },

    /// The guest asked to exit the process (WASI `proc_exit`).
    #[error("Call to '{function}' exited with status {code}")]
    Exited {
        /// The function that was called.
        function: String,
        /// Exit status passed by the guest.
        code: i32,
    },

    /// The calling thread could not be registered with the engine.
    #[error("Call failed: thread environment initialization failed")]
    ThreadEnvFailed,

    /// The instance has been destroyed.
    #[error("Call failed: instance destroyed")]
    InstanceDestroyed,

    /// The runtime is not usable.
    #[error("Call failed: {0}")]
    Engine(#[from] EngineError),
}

/// Errors from linear memory access.
#[derive(Error, Debug)]
pub enum MemoryError {
    /// `offset + length` exceeds the current memory size.
    #[error("Memory access out of bounds: offset {offset} + length {length} > size {size}")]
    OutOfBounds {
        /// Requested offset.
        offset: usize,
        /// Requested length.
        length: usize,
        /// Current memory size in bytes.
        size: usize,
    },

    /// The instance has no memory at this index.
    #[error("Memory {index} not found")]
    NoSuchMemory {
        /// Requested memory index.
        index: u32,
    },

    /// No NUL terminator was found before the end of memory.
    #[error("Unterminated string at offset {offset}")]
    Unterminated {
        /// Start offset of the string.
        offset: usize,
    },

    /// The instance has been destroyed.
    #[error("Memory access failed: instance destroyed")]
    InstanceDestroyed,

    /// The runtime is not usable.
    #[error("Memory access failed: {0}")]
    Engine(#[from] EngineError),
}

/// Errors raised by native functions called from guest code.
///
/// The engine turns these into traps, so they surface to the host as
/// [`CallError::Trapped`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostFunctionError {
    /// An argument had an unexpected value.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// Guest memory could not be accessed as requested.
    #[error("Memory access failed: {reason}")]
    MemoryAccess {
        /// Description of the access failure.
        reason: String,
    },

    /// The host function failed for another reason.
    #[error("Host function failed: {reason}")]
    Failed {
        /// Description of the failure.
        reason: String,
    },
}

/// Umbrella error for callers that drive the whole lifecycle.
#[derive(Error, Debug)]
pub enum Error {
    /// Runtime lifecycle failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Module load failure.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Instantiation failure.
    #[error(transparent)]
    Instantiate(#[from] InstantiateError),

    /// Call failure.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Memory access failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl ConfigError {
    /// Create a new `InvalidValue` error.
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidSignature` error.
    pub fn invalid_signature(signature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSignature {
            signature: signature.into(),
            reason: reason.into(),
        }
    }
}

impl EngineError {
    /// Create a new `InitFailed` error.
    pub fn init_failed(reason: impl Into<String>) -> Self {
        Self::InitFailed {
            reason: reason.into(),
        }
    }
}

impl LoadError {
    /// Create a new `InvalidInput` error.
    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            reason: reason.into(),
        }
    }

    /// Create a new `EngineRejected` error.
    pub fn engine_rejected(message: impl Into<String>) -> Self {
        Self::EngineRejected {
            message: message.into(),
        }
    }
}

impl InstantiateError {
    /// Create a new `EngineRejected` error.
    pub fn engine_rejected(message: impl Into<String>) -> Self {
        Self::EngineRejected {
            message: message.into(),
        }
    }
}

impl CallError {
    /// Create a new `NoSuchExport` error.
    pub fn no_such_export(name: impl Into<String>) -> Self {
        Self::NoSuchExport { name: name.into() }
    }

    /// Create a new `Trapped` error.
    pub fn trapped(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Trapped {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error was raised before any engine call was
    /// issued (resolution and marshalling failures).
    pub fn is_rejected_before_call(&self) -> bool {
        matches!(
            self,
            Self::NoSuchExport { .. }
                | Self::TypeMismatch { .. }
                | Self::ArgumentCountMismatch { .. }
                | Self::ResultArityMismatch { .. }
                | Self::UnsupportedType { .. }
                | Self::ArgumentSlots { .. }
                | Self::InstanceDestroyed
                | Self::Engine(_)
        )
    }

    /// Returns `true` if the engine trapped during the call.
    pub fn is_trap(&self) -> bool {
        matches!(self, Self::Trapped { .. })
    }
}

impl HostFunctionError {
    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `MemoryAccess` error.
    pub fn memory_access(reason: impl Into<String>) -> Self {
        Self::MemoryAccess {
            reason: reason.into(),
        }
    }

    /// Create a new `Failed` error.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CallError::no_such_export("sum");
        assert_eq!(err.to_string(), "Call failed: export 'sum' not found");

        let err = CallError::TypeMismatch {
            position: 1,
            expected: ValueType::I64,
            actual: ValueType::F64,
        };
        assert_eq!(
            err.to_string(),
            "Call failed: argument 1 expects i64, got f64"
        );

        let err = LoadError::engine_rejected("magic header not detected");
        assert_eq!(
            err.to_string(),
            "Module load failed: magic header not detected"
        );
    }

    #[test]
    fn test_host_function_error_helpers() {
        let err = HostFunctionError::failed("quota exceeded");
        assert_eq!(err.to_string(), "Host function failed: quota exceeded");

        let err = CallError::Exited {
            function: "_start".into(),
            code: 3,
        };
        assert!(!err.is_trap());
        assert!(!err.is_rejected_before_call());
        assert_eq!(err.to_string(), "Call to '_start' exited with status 3");
    }

    #[test]
    fn test_error_from_engine_error() {
        let err: CallError = EngineError::NotInitialized.into();
        assert!(matches!(err, CallError::Engine(EngineError::NotInitialized)));

        let err: MemoryError = EngineError::Invalidated.into();
        assert!(matches!(err, MemoryError::Engine(EngineError::Invalidated)));

        let err: EngineError = ConfigError::invalid_value("max_threads", "must be > 0").into();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_umbrella_error() {
        let err: Error = CallError::InstanceDestroyed.into();
        assert_eq!(err.to_string(), "Call failed: instance destroyed");

        let err: Error = LoadError::invalid_input("empty").into();
        assert!(matches!(err, Error::Load(LoadError::InvalidInput { .. })));
    }

    #[test]
    fn test_is_rejected_before_call() {
        assert!(CallError::no_such_export("f").is_rejected_before_call());
        assert!(
            CallError::ResultArityMismatch {
                expected: 0,
                declared: 1
            }
            .is_rejected_before_call()
        );
        assert!(!CallError::trapped("f", "unreachable").is_rejected_before_call());
        assert!(CallError::trapped("f", "unreachable").is_trap());
    }
}

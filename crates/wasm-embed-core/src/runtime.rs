//! The engine handle.
//!
//! A [`Runtime`] owns one [`EngineBackend`] and tracks whether it is
//! initialized. It is cheap to clone; every [`Module`](crate::Module) keeps a
//! clone so the backend outlives the objects created from it.
//!
//! Each successful [`init`](Runtime::init) starts a new generation. Modules
//! and instances remember the generation they were created under and refuse
//! to touch the engine once that generation has been destroyed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use wasm_embed_common::{
    AllocationStrategy, ConfigError, EngineConfig, EngineError, HostAllocator, HostFunctionError,
    LogLevel,
};

use crate::backend::{EngineBackend, InitArgs};
use crate::native::{HostCall, NativeRegistry};
use crate::wasmtime_backend::WasmtimeBackend;

/// Held by the runtime of a process-singleton engine while it is initialized.
static PROCESS_GATE: AtomicBool = AtomicBool::new(false);

/// Handle to an embedded WebAssembly engine.
///
/// # Example
///
/// ```ignore
/// use wasm_embed_core::Runtime;
///
/// let runtime = Runtime::builder().max_threads(2).build()?;
/// let module = wasm_embed_core::Module::from_file(&runtime, "app.wasm")?;
/// ```
pub struct Runtime<B: EngineBackend = WasmtimeBackend> {
    shared: Arc<Shared<B>>,
}

struct Shared<B: EngineBackend> {
    backend: B,
    initialized: AtomicBool,
    generation: AtomicU64,
    log_level: Mutex<LogLevel>,
    /// Serializes init and destroy.
    gate: Mutex<()>,
    holds_process_gate: AtomicBool,
}

impl<B: EngineBackend> Shared<B> {
    fn shutdown(&self) -> bool {
        if !self.initialized.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.backend.destroy();
        if self.holds_process_gate.swap(false, Ordering::AcqRel) {
            PROCESS_GATE.store(false, Ordering::Release);
        }
        true
    }
}

impl<B: EngineBackend> Drop for Shared<B> {
    fn drop(&mut self) {
        if self.shutdown() {
            debug!(engine = self.backend.name(), "Runtime destroyed on drop");
        }
    }
}

impl<B: EngineBackend> Runtime<B> {
    /// Wrap a backend. The runtime starts uninitialized.
    pub fn new(backend: B) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                initialized: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                log_level: Mutex::new(LogLevel::default()),
                gate: Mutex::new(()),
                holds_process_gate: AtomicBool::new(false),
            }),
        }
    }

    /// Initialize the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The runtime is already initialized, or the engine allows one
    ///   runtime per process and another one holds it
    /// - The configuration is invalid
    /// - The engine rejects the configuration
    #[instrument(skip(self, args), fields(engine = self.shared.backend.name()))]
    pub fn init(&self, args: &InitArgs) -> Result<(), EngineError> {
        let _gate = self.shared.gate.lock();

        if self.shared.initialized.load(Ordering::Acquire) {
            warn!("Runtime already initialized");
            return Err(EngineError::AlreadyInitialized);
        }

        args.config.validate()?;

        let singleton = self.shared.backend.is_process_singleton();
        if singleton
            && PROCESS_GATE
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            warn!("Another runtime of this engine is live in this process");
            return Err(EngineError::AlreadyInitialized);
        }

        if let Err(diagnostic) = self.shared.backend.init(args) {
            if singleton {
                PROCESS_GATE.store(false, Ordering::Release);
            }
            warn!(reason = %diagnostic, "Engine rejected initialization");
            return Err(EngineError::init_failed(diagnostic));
        }

        self.shared
            .holds_process_gate
            .store(singleton, Ordering::Release);
        *self.shared.log_level.lock() = args.config.log_level;
        let generation = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.initialized.store(true, Ordering::Release);

        info!(
            generation,
            max_threads = args.config.max_threads,
            log_level = %args.config.log_level,
            natives = args.natives.len(),
            "Runtime initialized"
        );
        Ok(())
    }

    /// Change the engine log verbosity.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if the runtime is not
    /// initialized.
    pub fn set_log_level(&self, level: LogLevel) -> Result<(), EngineError> {
        let _gate = self.shared.gate.lock();
        if !self.is_initialized() {
            return Err(EngineError::NotInitialized);
        }
        self.shared.backend.set_log_level(level);
        *self.shared.log_level.lock() = level;
        debug!(%level, "Log level changed");
        Ok(())
    }

    /// Tear down the engine. Calling this more than once is a no-op.
    ///
    /// Modules and instances created before this call stop working; they can
    /// still be destroyed or dropped.
    pub fn destroy(&self) {
        let _gate = self.shared.gate.lock();
        if self.shared.shutdown() {
            info!(engine = self.shared.backend.name(), "Runtime destroyed");
        }
    }

    /// Returns `true` between a successful `init` and `destroy`.
    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::Acquire)
    }

    /// Current log verbosity.
    pub fn log_level(&self) -> LogLevel {
        *self.shared.log_level.lock()
    }

    /// The backend this runtime drives.
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    /// Generation of the current initialization.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotInitialized`] if the runtime is not
    /// initialized.
    pub(crate) fn current_generation(&self) -> Result<u64, EngineError> {
        if !self.is_initialized() {
            return Err(EngineError::NotInitialized);
        }
        Ok(self.shared.generation.load(Ordering::Acquire))
    }

    /// Check that objects created under `generation` may still use the engine.
    pub(crate) fn ensure_live(&self, generation: u64) -> Result<(), EngineError> {
        if self.current_generation()? != generation {
            return Err(EngineError::Invalidated);
        }
        Ok(())
    }
}

impl Runtime {
    /// Start configuring a wasmtime-backed runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }
}

impl<B: EngineBackend> Clone for Runtime<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: EngineBackend> fmt::Debug for Runtime<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.shared.backend.name())
            .field("initialized", &self.is_initialized())
            .field("generation", &self.shared.generation.load(Ordering::Relaxed))
            .field("log_level", &self.log_level())
            .finish_non_exhaustive()
    }
}

/// Builder for an initialized [`Runtime`].
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    args: InitArgs,
}

impl RuntimeBuilder {
    /// Replace the whole engine configuration.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.args.config = config;
        self
    }

    /// Allocate engine memory from the system allocator.
    #[must_use]
    pub fn use_system_allocator(mut self) -> Self {
        self.args.config.allocator = AllocationStrategy::System;
        self
    }

    /// Pre-allocate a pool of `size_bytes` for instances.
    #[must_use]
    pub fn use_memory_pool(mut self, size_bytes: usize) -> Self {
        self.args.config.allocator = AllocationStrategy::Pool { size_bytes };
        self
    }

    /// Route engine allocations through host callbacks.
    #[must_use]
    pub fn use_custom_allocator(mut self, allocator: HostAllocator) -> Self {
        self.args.config.allocator = AllocationStrategy::Custom(allocator);
        self
    }

    /// Maximum number of threads the engine may run guest code on.
    #[must_use]
    pub fn max_threads(mut self, max_threads: u32) -> Self {
        self.args.config.max_threads = max_threads;
        self
    }

    /// Initial log verbosity.
    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.args.config.log_level = level;
        self
    }

    /// Linear memory limit of one instance in megabytes.
    #[must_use]
    pub fn instance_memory_mb(mut self, megabytes: u32) -> Self {
        self.args.config.instance_memory_mb = megabytes;
        self
    }

    /// Replace the native symbol table.
    #[must_use]
    pub fn native_symbols(mut self, natives: NativeRegistry) -> Self {
        self.args.natives = natives;
        self
    }

    /// Register one host function.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature is malformed or the symbol is
    /// already registered.
    pub fn register_host_function<F>(
        mut self,
        namespace: &str,
        name: &str,
        signature: &str,
        func: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&mut HostCall<'_>) -> Result<(), HostFunctionError> + Send + Sync + 'static,
    {
        self.args.natives.register(namespace, name, signature, func)?;
        Ok(self)
    }

    /// Initialize a wasmtime-backed runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn build(self) -> Result<Runtime, EngineError> {
        self.build_with(WasmtimeBackend::new())
    }

    /// Initialize a runtime over `backend`.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn build_with<B: EngineBackend>(self, backend: B) -> Result<Runtime<B>, EngineError> {
        let runtime = Runtime::new(backend);
        runtime.init(&self.args)?;
        Ok(runtime)
    }
}

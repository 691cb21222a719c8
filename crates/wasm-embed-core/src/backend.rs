//! The boundary between the embedding API and a WebAssembly engine.
//!
//! [`EngineBackend`] is the only seam through which [`Runtime`](crate::Runtime),
//! [`Module`](crate::Module) and [`Instance`](crate::Instance) reach an engine.
//! Handles are associated types owned by the caller; destructors take them by
//! value so the same handle can never be released twice.
//!
//! Engine failures are reported as [`Diagnostic`]s, bounded to
//! [`DIAGNOSTIC_CAPACITY`] bytes.

use std::fmt;

use wasm_embed_common::{EngineConfig, FuncSignature, LogLevel};

use crate::native::NativeRegistry;
use crate::wasi::WasiArgs;

/// Maximum length in bytes of an engine diagnostic.
pub const DIAGNOSTIC_CAPACITY: usize = 128;

/// A bounded engine diagnostic message.
///
/// Messages longer than [`DIAGNOSTIC_CAPACITY`] bytes are truncated on a
/// character boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic(String);

impl Diagnostic {
    /// Create a diagnostic from any displayable message.
    pub fn new(message: impl fmt::Display) -> Self {
        let mut text = message.to_string();
        if text.len() > DIAGNOSTIC_CAPACITY {
            let mut end = DIAGNOSTIC_CAPACITY;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        Self(text)
    }

    /// The message text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Diagnostic> for String {
    fn from(diagnostic: Diagnostic) -> Self {
        diagnostic.0
    }
}

/// Parameters for [`EngineBackend::init`].
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
    /// Engine-wide configuration.
    pub config: EngineConfig,

    /// Host functions made available to every module.
    pub natives: NativeRegistry,
}

/// Parameters for [`EngineBackend::instantiate`].
#[derive(Debug, Clone, Copy)]
pub struct InstantiateArgs<'a> {
    /// Operand/call stack size in bytes.
    pub stack_size: u32,

    /// Application heap size in bytes.
    pub heap_size: u32,

    /// WASI configuration of the module being instantiated.
    pub wasi: &'a WasiArgs,
}

/// A WebAssembly engine.
///
/// Implementations must be safe to share between threads. Handle types
/// follow the engine's own rules: modules are shareable, instances and
/// execution environments may move between threads but are used by one
/// thread at a time (every method touching them takes `&mut`).
pub trait EngineBackend: Send + Sync + 'static {
    /// A loaded, validated module.
    type Module: Send + Sync;

    /// An instantiated module with its own linear memory.
    type Instance: Send;

    /// Execution environment (call stack) bound to one instance.
    type ExecEnv: Send;

    /// A resolved exported function of one instance.
    type Func: Clone + Send + fmt::Debug;

    /// Short engine name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the engine supports only one initialized runtime per process.
    fn is_process_singleton(&self) -> bool {
        false
    }

    /// Bring up the engine.
    fn init(&self, args: &InitArgs) -> Result<(), Diagnostic>;

    /// Tear down the engine. Called at most once per successful `init`.
    fn destroy(&self);

    /// Change engine log verbosity.
    fn set_log_level(&self, level: LogLevel);

    /// Validate and load module bytes.
    fn load(&self, bytes: &[u8]) -> Result<Self::Module, Diagnostic>;

    /// Release a loaded module.
    fn unload(&self, module: Self::Module);

    /// Name and signature of every exported function.
    fn export_functions(&self, module: &Self::Module) -> Vec<(String, FuncSignature)>;

    /// Produce a precompiled artifact that [`load`](Self::load) accepts.
    fn serialize(&self, module: &Self::Module) -> Result<Vec<u8>, Diagnostic> {
        let _ = module;
        Err(Diagnostic::new(format!(
            "{} does not support precompiled artifacts",
            self.name()
        )))
    }

    /// Create an instance of `module`.
    fn instantiate(
        &self,
        module: &Self::Module,
        args: &InstantiateArgs<'_>,
    ) -> Result<Self::Instance, Diagnostic>;

    /// Release an instance.
    fn deinstantiate(&self, instance: Self::Instance);

    /// Create the execution environment for `instance`.
    fn create_exec_env(
        &self,
        instance: &mut Self::Instance,
        stack_size: u32,
    ) -> Option<Self::ExecEnv>;

    /// Release an execution environment.
    fn destroy_exec_env(&self, exec_env: Self::ExecEnv);

    /// Resolve an exported function by name.
    fn lookup_function(&self, instance: &mut Self::Instance, name: &str) -> Option<Self::Func>;

    /// Declared signature of a resolved function.
    fn func_signature(&self, instance: &Self::Instance, func: &Self::Func) -> FuncSignature;

    /// Call `func` with `argc` argument slots from `argv`.
    ///
    /// Results overwrite the prefix of `argv`. Returns `false` if the call
    /// trapped; the reason is then available from
    /// [`get_exception`](Self::get_exception).
    fn call_wasm(
        &self,
        exec_env: &mut Self::ExecEnv,
        instance: &mut Self::Instance,
        func: &Self::Func,
        argc: u32,
        argv: &mut [u32],
    ) -> bool;

    /// Pending exception of `instance`, if any.
    fn get_exception(&self, instance: &Self::Instance) -> Option<String>;

    /// Exit status requested by the guest during the last call, if it
    /// stopped by exiting rather than trapping.
    fn get_exit_code(&self, instance: &Self::Instance) -> Option<i32> {
        let _ = instance;
        None
    }

    /// Contents of linear memory `index`.
    fn memory_data<'a>(&self, instance: &'a Self::Instance, index: u32) -> Option<&'a [u8]>;

    /// Mutable contents of linear memory `index`.
    fn memory_data_mut<'a>(
        &self,
        instance: &'a mut Self::Instance,
        index: u32,
    ) -> Option<&'a mut [u8]>;

    /// Whether the calling thread is registered with the engine.
    fn thread_env_inited(&self) -> bool {
        true
    }

    /// Register the calling thread.
    fn init_thread_env(&self) -> bool {
        true
    }

    /// Unregister the calling thread.
    fn destroy_thread_env(&self) {}
}

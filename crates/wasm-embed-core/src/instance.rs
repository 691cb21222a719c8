//! WebAssembly instance lifecycle management.
//!
//! An [`Instance`] pairs an engine instance with its execution environment
//! and caches resolved exports. It borrows its [`Module`], so it can never
//! outlive it.
//!
//! A call goes through these steps:
//!
//! 1. Resolve the export (cache first, engine lookup on a miss)
//! 2. Validate and encode arguments into 32-bit slots
//! 3. Register the calling thread with the engine if needed
//! 4. Call, and on failure read the exception text immediately
//! 5. Decode results from the slots

use std::collections::HashMap;
use std::fmt;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use wasm_embed_common::{
    CallError, FuncSignature, InstanceConfig, InstantiateError, MemoryError, ValueType,
};

use crate::backend::{EngineBackend, InstantiateArgs};
use crate::memory::{MemoryView, checked_range};
use crate::module::Module;
use crate::thread_env::ThreadEnvGuard;
use crate::value::{self, Value};
use crate::wasmtime_backend::WasmtimeBackend;

/// A live instance of a [`Module`].
///
/// Every operation that may run guest code takes `&mut self`, so at most
/// one call per instance is in flight.
pub struct Instance<'m, B: EngineBackend = WasmtimeBackend> {
    module: &'m Module<B>,
    handle: Option<B::Instance>,
    exec_env: Option<B::ExecEnv>,
    export_cache: HashMap<String, B::Func>,
    stack_size: u32,
    heap_size: u32,
    id: Uuid,
}

impl<'m, B: EngineBackend> Instance<'m, B> {
    /// Instantiate `module` with the given stack and heap sizes in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The module was destroyed
    /// - The runtime is no longer live
    /// - The engine rejects the instantiation
    /// - The execution environment cannot be created (the instance is
    ///   released before returning)
    #[instrument(skip(module), fields(content_hash = %module.content_hash()))]
    pub fn new(
        module: &'m Module<B>,
        stack_size: u32,
        heap_size: u32,
    ) -> Result<Self, InstantiateError> {
        let start = Instant::now();

        let module_handle = module.handle().ok_or(InstantiateError::InvalidModule)?;
        let runtime = module.runtime();
        runtime.ensure_live(module.generation())?;
        let backend = runtime.backend();

        let args = InstantiateArgs {
            stack_size,
            heap_size,
            wasi: module.wasi_args(),
        };
        let mut handle = backend.instantiate(module_handle, &args).map_err(|diagnostic| {
            warn!(reason = %diagnostic, "Engine rejected instantiation");
            InstantiateError::engine_rejected(diagnostic)
        })?;

        let Some(exec_env) = backend.create_exec_env(&mut handle, stack_size) else {
            backend.deinstantiate(handle);
            warn!(stack_size, "Failed to create execution environment");
            return Err(InstantiateError::ExecEnvFailed);
        };

        let id = Uuid::new_v4();
        info!(
            instance_id = %id,
            duration_us = start.elapsed().as_micros(),
            "Instance created"
        );

        Ok(Self {
            module,
            handle: Some(handle),
            exec_env: Some(exec_env),
            export_cache: HashMap::new(),
            stack_size,
            heap_size,
            id,
        })
    }

    /// Instantiate `module` with sizes from `config`.
    ///
    /// # Errors
    ///
    /// See [`Instance::new`].
    pub fn with_config(
        module: &'m Module<B>,
        config: &InstanceConfig,
    ) -> Result<Self, InstantiateError> {
        Self::new(module, config.stack_size, config.heap_size)
    }

    /// Call `name` with `argc` raw argument slots from `argv`.
    ///
    /// Results overwrite the prefix of `argv`; the caller sizes `argv` for
    /// the larger of the argument and result slot counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the export does not exist, `argc` exceeds
    /// `argv.len()`, or the call traps.
    #[instrument(skip(self, argv), fields(instance_id = %self.id))]
    pub fn call_func(&mut self, name: &str, argc: u32, argv: &mut [u32]) -> Result<(), CallError> {
        let func = self.resolve(name)?;

        if argc as usize > argv.len() {
            return Err(CallError::ArgumentSlots {
                argc,
                available: argv.len(),
            });
        }

        self.invoke(name, &func, argc, argv)
    }

    /// Call `name` with typed arguments.
    ///
    /// `expected_result_count` must be at least the declared number of
    /// results. Arguments are checked against the declared parameter types
    /// before the engine is called.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, validation or the call fails.
    #[instrument(skip(self, args), fields(instance_id = %self.id, argc = args.len()))]
    pub fn call_func_typed(
        &mut self,
        name: &str,
        args: &[Value],
        expected_result_count: usize,
    ) -> Result<Vec<Value>, CallError> {
        self.call_typed(name, args, Some(expected_result_count))
    }

    /// Call `name` with typed arguments, accepting its declared results.
    ///
    /// # Errors
    ///
    /// Returns an error if resolution, validation or the call fails.
    pub fn call(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, CallError> {
        self.call_typed(name, args, None)
    }

    /// Resolve an exported function.
    ///
    /// # Errors
    ///
    /// Returns an error if no exported function has this name.
    pub fn lookup_function(&mut self, name: &str) -> Result<B::Func, CallError> {
        self.resolve(name)
    }

    /// Declared signature of an exported function.
    ///
    /// # Errors
    ///
    /// Returns an error if no exported function has this name.
    pub fn function_signature(&mut self, name: &str) -> Result<FuncSignature, CallError> {
        let func = self.resolve(name)?;
        self.signature_of(&func)
    }

    /// Pending exception text, if the last call trapped.
    pub fn exception(&self) -> Option<String> {
        let handle = self.handle.as_ref()?;
        self.module
            .runtime()
            .ensure_live(self.module.generation())
            .ok()?;
        self.backend().get_exception(handle)
    }

    /// Borrowed view of linear memory `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance was destroyed or has no such memory.
    pub fn memory(&self, index: u32) -> Result<MemoryView<'_>, MemoryError> {
        let handle = self.handle.as_ref().ok_or(MemoryError::InstanceDestroyed)?;
        self.module
            .runtime()
            .ensure_live(self.module.generation())?;
        self.backend()
            .memory_data(handle, index)
            .map(MemoryView::new)
            .ok_or(MemoryError::NoSuchMemory { index })
    }

    /// Current size of linear memory `index` in bytes.
    ///
    /// # Errors
    ///
    /// See [`Instance::memory`].
    pub fn memory_size(&self, index: u32) -> Result<usize, MemoryError> {
        Ok(self.memory(index)?.len())
    }

    /// Copy `len` bytes out of linear memory.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range does not fit; no
    /// bytes are read in that case.
    pub fn read_memory(&self, index: u32, offset: usize, len: usize) -> Result<Vec<u8>, MemoryError> {
        Ok(self.memory(index)?.read(offset, len)?.to_vec())
    }

    /// Read a NUL-terminated string from linear memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is out of bounds or no terminator
    /// follows it.
    pub fn read_c_str(&self, index: u32, offset: usize) -> Result<String, MemoryError> {
        self.memory(index)?.read_c_str(offset)
    }

    /// Copy `bytes` into linear memory at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if the range does not fit; memory
    /// is left untouched in that case.
    pub fn write_memory(&mut self, index: u32, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        let data = self.memory_mut(index)?;
        let range = checked_range(offset, bytes.len(), data.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    /// Write `s` followed by a NUL terminator at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::OutOfBounds`] if `s.len() + 1` bytes do not
    /// fit; memory is left untouched in that case.
    pub fn write_c_str(&mut self, index: u32, offset: usize, s: &str) -> Result<(), MemoryError> {
        let data = self.memory_mut(index)?;
        let range = checked_range(offset, s.len() + 1, data.len())?;
        let (text, terminator) = data[range].split_at_mut(s.len());
        text.copy_from_slice(s.as_bytes());
        terminator[0] = 0;
        Ok(())
    }

    /// Release the execution environment, then the instance. Calling this
    /// more than once is a no-op.
    pub fn destroy(&mut self) {
        if self.handle.is_none() && self.exec_env.is_none() {
            return;
        }

        let backend = self.backend();
        let live = self
            .module
            .runtime()
            .ensure_live(self.module.generation())
            .is_ok();

        self.export_cache.clear();
        if let Some(exec_env) = self.exec_env.take() {
            if live {
                backend.destroy_exec_env(exec_env);
            }
        }
        if let Some(handle) = self.handle.take() {
            if live {
                backend.deinstantiate(handle);
            }
        }

        debug!(instance_id = %self.id, live, "Instance destroyed");
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    /// Identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stack size requested at creation.
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    /// Heap size requested at creation.
    pub fn heap_size(&self) -> u32 {
        self.heap_size
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &'m Module<B> {
        self.module
    }

    fn backend(&self) -> &'m B {
        let module: &'m Module<B> = self.module;
        module.runtime().backend()
    }

    /// Check that the instance and its runtime generation are live.
    fn ensure_live(&self) -> Result<(), CallError> {
        if self.handle.is_none() || self.exec_env.is_none() {
            return Err(CallError::InstanceDestroyed);
        }
        self.module
            .runtime()
            .ensure_live(self.module.generation())?;
        Ok(())
    }

    fn resolve(&mut self, name: &str) -> Result<B::Func, CallError> {
        self.ensure_live()?;

        if let Some(func) = self.export_cache.get(name) {
            return Ok(func.clone());
        }

        let backend = self.backend();
        let handle = self.handle.as_mut().ok_or(CallError::InstanceDestroyed)?;
        let func = backend.lookup_function(handle, name).ok_or_else(|| {
            debug!(function = name, "Export not found");
            CallError::no_such_export(name)
        })?;

        debug!(function = name, "Export resolved");
        self.export_cache.insert(name.to_string(), func.clone());
        Ok(func)
    }

    fn signature_of(&self, func: &B::Func) -> Result<FuncSignature, CallError> {
        let handle = self.handle.as_ref().ok_or(CallError::InstanceDestroyed)?;
        Ok(self.backend().func_signature(handle, func))
    }

    fn call_typed(
        &mut self,
        name: &str,
        args: &[Value],
        expected_result_count: Option<usize>,
    ) -> Result<Vec<Value>, CallError> {
        let func = self.resolve(name)?;
        let signature = self.signature_of(&func)?;

        let declared = signature.results.len();
        let expected = expected_result_count.unwrap_or(declared);
        if expected < declared {
            return Err(CallError::ResultArityMismatch { expected, declared });
        }

        let mut argv = value::encode_args(&signature.params, args)?;
        let result_slots = signature
            .result_slots()
            .ok_or_else(|| unsupported_result(&signature.results))?;

        let argc = u32::try_from(argv.len()).map_err(|_| CallError::ArgumentSlots {
            argc: u32::MAX,
            available: argv.len(),
        })?;
        if argv.len() < result_slots {
            argv.resize(result_slots, 0);
        }

        self.invoke(name, &func, argc, &mut argv)?;
        value::decode_results(&signature.results, &argv)
    }

    fn invoke(
        &mut self,
        name: &str,
        func: &B::Func,
        argc: u32,
        argv: &mut [u32],
    ) -> Result<(), CallError> {
        let backend = self.backend();
        let (Some(handle), Some(exec_env)) = (self.handle.as_mut(), self.exec_env.as_mut()) else {
            return Err(CallError::InstanceDestroyed);
        };

        let _thread_env = ThreadEnvGuard::enter(backend)?;
        let start = Instant::now();

        if backend.call_wasm(exec_env, handle, func, argc, argv) {
            debug!(
                function = name,
                duration_us = start.elapsed().as_micros(),
                "Call completed"
            );
            return Ok(());
        }

        if let Some(code) = backend.get_exit_code(handle) {
            info!(function = name, code, "Guest exited");
            return Err(CallError::Exited {
                function: name.to_string(),
                code,
            });
        }

        let message = backend
            .get_exception(handle)
            .unwrap_or_else(|| "unknown exception".to_string());
        warn!(
            function = name,
            duration_us = start.elapsed().as_micros(),
            trap_message = %message,
            "Call trapped"
        );
        Err(CallError::trapped(name, message))
    }

    fn memory_mut(&mut self, index: u32) -> Result<&mut [u8], MemoryError> {
        self.module
            .runtime()
            .ensure_live(self.module.generation())?;
        let backend = self.backend();
        let handle = self.handle.as_mut().ok_or(MemoryError::InstanceDestroyed)?;
        backend
            .memory_data_mut(handle, index)
            .ok_or(MemoryError::NoSuchMemory { index })
    }
}

fn unsupported_result(results: &[ValueType]) -> CallError {
    let position = results
        .iter()
        .position(|ty| ty.slot_count().is_none())
        .unwrap_or_default();
    CallError::UnsupportedType {
        position,
        ty: results.get(position).copied().unwrap_or(ValueType::V128),
    }
}

impl<B: EngineBackend> Drop for Instance<'_, B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<B: EngineBackend> fmt::Debug for Instance<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("stack_size", &self.stack_size)
            .field("heap_size", &self.heap_size)
            .field("cached_exports", &self.export_cache.len())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

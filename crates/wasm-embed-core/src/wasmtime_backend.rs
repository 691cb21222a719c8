//! Wasmtime implementation of [`EngineBackend`].
//!
//! This is the only module that names wasmtime types. Each instance gets its
//! own [`Store`], so instances share nothing but the engine and the linker.
//!
//! # Configuration
//!
//! - [`AllocationStrategy::System`] uses wasmtime's on-demand allocator
//! - [`AllocationStrategy::Pool`] enables the pooling allocator, sized so
//!   that `size_bytes / instance_memory_mb` instances fit
//! - [`AllocationStrategy::Custom`] is rejected: wasmtime does not route its
//!   allocations through host callbacks

use std::future::Future;
use std::pin::Pin;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use wasmtime::{
    AsContextMut, Caller, Config, Engine, Export, Extern, ExternType, Func, FuncType, Instance,
    InstanceAllocationStrategy, Linker, Memory, Module, OptLevel, PoolingAllocationConfig,
    Precompiled, Store, StoreLimits, StoreLimitsBuilder, Trap, Val, ValType,
};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{DirPerms, FilePerms, I32Exit, WasiCtxBuilder};

use wasm_embed_common::{
    AllocationStrategy, EngineConfig, FuncSignature, LogLevel, ValueType, WASM_PAGE_SIZE,
};

use crate::backend::{Diagnostic, EngineBackend, InitArgs, InstantiateArgs};
use crate::native::{HostCall, NativeRegistry, NativeSymbol};
use crate::value::{self, Value};
use crate::wasi::{NsLookupPool, StdioMode, WasiArgs};

/// Wasmtime-backed engine.
#[derive(Default)]
pub struct WasmtimeBackend {
    state: RwLock<Option<Loaded>>,
}

/// Engine state between `init` and `destroy`.
struct Loaded {
    engine: Engine,
    linker: Linker<InstanceState>,
    instance_memory_bytes: usize,
    log_level: LogLevel,
}

/// Per-instance store data.
pub struct InstanceState {
    wasi: WasiP1Ctx,
    limits: StoreLimits,
    exception: Option<String>,
    /// Status passed to `proc_exit` during the last call.
    exit_code: Option<i32>,
    /// Function references handed out as slot handles; handle `n` is index
    /// `n - 1`, handle 0 is null.
    func_refs: Vec<FuncRef>,
}

impl InstanceState {
    fn new(wasi: WasiP1Ctx, limits: StoreLimits) -> Self {
        Self {
            wasi,
            limits,
            exception: None,
            exit_code: None,
            func_refs: Vec::new(),
        }
    }
}

/// A function handed to the host, keyed by its address in the store so the
/// same function always maps to the same handle.
struct FuncRef {
    addr: usize,
    func: Func,
}

/// An instantiated module and its store.
pub struct WasmtimeInstance {
    store: Store<InstanceState>,
    instance: Instance,
    memories: Vec<Memory>,
}

/// Execution environment of a [`WasmtimeInstance`].
///
/// Wasmtime sizes the wasm stack per engine, so the requested size is only
/// recorded.
#[derive(Debug)]
pub struct WasmtimeExecEnv {
    stack_size: u32,
}

impl WasmtimeExecEnv {
    /// Stack size the environment was created with.
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }
}

impl WasmtimeBackend {
    /// Create an uninitialized backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// The wasmtime engine, if initialized.
    pub fn engine(&self) -> Option<Engine> {
        self.state.read().as_ref().map(|loaded| loaded.engine.clone())
    }

    /// Current log level, if initialized.
    pub fn log_level(&self) -> Option<LogLevel> {
        self.state.read().as_ref().map(|loaded| loaded.log_level)
    }

    fn loaded<R>(&self, f: impl FnOnce(&Loaded) -> R) -> Result<R, Diagnostic> {
        self.state
            .read()
            .as_ref()
            .map(f)
            .ok_or_else(|| Diagnostic::new("engine is not initialized"))
    }

    /// Translate the engine configuration into a wasmtime [`Config`].
    fn create_config(config: &EngineConfig) -> Result<Config, Diagnostic> {
        let mut wasmtime_config = Config::new();

        // Enable Cranelift optimizations
        wasmtime_config.cranelift_opt_level(OptLevel::Speed);

        match config.allocator {
            AllocationStrategy::System => {}
            AllocationStrategy::Pool { size_bytes } => {
                let slot = config.instance_memory_bytes();
                let max_instances = size_bytes / slot;
                if max_instances == 0 {
                    return Err(Diagnostic::new(format!(
                        "memory pool of {size_bytes} bytes cannot hold one instance of {slot} bytes"
                    )));
                }
                let max_instances = u32::try_from(max_instances).unwrap_or(u32::MAX);

                wasmtime_config.allocation_strategy(InstanceAllocationStrategy::Pooling(
                    Self::create_pooling_config(max_instances, slot),
                ));

                info!(
                    max_instances,
                    instance_memory_mb = config.instance_memory_mb,
                    "Pooling allocator enabled"
                );
            }
            AllocationStrategy::Custom(_) => {
                return Err(Diagnostic::new(
                    "wasmtime does not support host allocator callbacks",
                ));
            }
        }

        Ok(wasmtime_config)
    }

    /// Create pooling allocation configuration.
    fn create_pooling_config(max_instances: u32, max_memory_bytes: usize) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        // Total number of component instances that can be allocated
        pooling.total_component_instances(max_instances);

        // Total number of core module instances
        pooling.total_core_instances(max_instances);

        // Total number of memories across all instances
        pooling.total_memories(max_instances);

        // Total number of tables across all instances
        pooling.total_tables(max_instances);

        // Maximum size of a single memory in bytes
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Link WASI preview1 and every native symbol.
    fn create_linker(
        engine: &Engine,
        natives: &NativeRegistry,
    ) -> Result<Linker<InstanceState>, Diagnostic> {
        let mut linker = Linker::new(engine);

        preview1::add_to_linker_sync(&mut linker, |state: &mut InstanceState| &mut state.wasi)
            .map_err(|e| Diagnostic::new(format!("failed to link WASI: {e}")))?;

        for (namespace, symbol) in natives.iter() {
            let ty = FuncType::new(
                engine,
                symbol.signature.params.iter().map(|ty| val_type(*ty)),
                symbol.signature.results.iter().map(|ty| val_type(*ty)),
            );
            let name = symbol.name.clone();
            let symbol = symbol.clone();

            linker
                .func_new(namespace, &name, ty, move |caller, params, results| {
                    call_native(&symbol, caller, params, results)
                })
                .map_err(|e| Diagnostic::new(format!("failed to link {namespace}.{name}: {e}")))?;

            debug!(namespace, name = %name, "Native symbol linked");
        }

        Ok(linker)
    }
}

impl EngineBackend for WasmtimeBackend {
    type Module = Module;
    type Instance = WasmtimeInstance;
    type ExecEnv = WasmtimeExecEnv;
    type Func = Func;

    fn name(&self) -> &'static str {
        "wasmtime"
    }

    fn init(&self, args: &InitArgs) -> Result<(), Diagnostic> {
        let wasmtime_config = Self::create_config(&args.config)?;
        let engine = Engine::new(&wasmtime_config)
            .map_err(|e| Diagnostic::new(format!("failed to create wasmtime engine: {e}")))?;
        let linker = Self::create_linker(&engine, &args.natives)?;

        *self.state.write() = Some(Loaded {
            engine,
            linker,
            instance_memory_bytes: args.config.instance_memory_bytes(),
            log_level: args.config.log_level,
        });

        info!(
            max_threads = args.config.max_threads,
            natives = args.natives.len(),
            "Wasmtime engine initialized"
        );
        Ok(())
    }

    fn destroy(&self) {
        if self.state.write().take().is_some() {
            info!("Wasmtime engine released");
        }
    }

    fn set_log_level(&self, level: LogLevel) {
        if let Some(loaded) = self.state.write().as_mut() {
            loaded.log_level = level;
        }
    }

    #[allow(unsafe_code)]
    fn load(&self, bytes: &[u8]) -> Result<Module, Diagnostic> {
        let engine = self.loaded(|loaded| loaded.engine.clone())?;

        match engine.detect_precompiled(bytes) {
            Some(Precompiled::Module) => {
                // SAFETY: `detect_precompiled` checked that the artifact was
                // produced by a compatible wasmtime with the same settings
                let module = unsafe { Module::deserialize(&engine, bytes) }
                    .map_err(|e| Diagnostic::new(format!("{e:#}")))?;
                debug!("Precompiled module loaded");
                Ok(module)
            }
            Some(Precompiled::Component) => Err(Diagnostic::new("components are not supported")),
            None => Module::new(&engine, bytes).map_err(|e| Diagnostic::new(format!("{e:#}"))),
        }
    }

    fn unload(&self, module: Module) {
        drop(module);
    }

    fn export_functions(&self, module: &Module) -> Vec<(String, FuncSignature)> {
        module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(ty) => Some((export.name().to_string(), signature_of(&ty))),
                _ => None,
            })
            .collect()
    }

    fn serialize(&self, module: &Module) -> Result<Vec<u8>, Diagnostic> {
        module.serialize().map_err(Diagnostic::new)
    }

    fn instantiate(
        &self,
        module: &Module,
        args: &InstantiateArgs<'_>,
    ) -> Result<WasmtimeInstance, Diagnostic> {
        let (engine, mut linker, memory_limit) = self.loaded(|loaded| {
            (
                loaded.engine.clone(),
                loaded.linker.clone(),
                loaded.instance_memory_bytes,
            )
        })?;

        let state = InstanceState::new(
            build_wasi(args.wasi)?,
            StoreLimitsBuilder::new().memory_size(memory_limit).build(),
        );
        let mut store = Store::new(&engine, state);
        store.limiter(|state| &mut state.limits);

        // Unresolved imports trap when called instead of failing instantiation
        linker
            .define_unknown_imports_as_traps(module)
            .map_err(|e| Diagnostic::new(format!("{e:#}")))?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| Diagnostic::new(format!("{e:#}")))?;

        let memories: Vec<Memory> = instance
            .exports(&mut store)
            .filter_map(Export::into_memory)
            .collect();

        if args.heap_size > 0 {
            if let Some(memory) = memories.first() {
                reserve_app_heap(&mut store, module, *memory, args.heap_size, memory_limit)?;
            }
        }

        Ok(WasmtimeInstance {
            store,
            instance,
            memories,
        })
    }

    fn deinstantiate(&self, instance: WasmtimeInstance) {
        drop(instance);
    }

    fn create_exec_env(
        &self,
        _instance: &mut WasmtimeInstance,
        stack_size: u32,
    ) -> Option<WasmtimeExecEnv> {
        (stack_size > 0).then_some(WasmtimeExecEnv { stack_size })
    }

    fn destroy_exec_env(&self, exec_env: WasmtimeExecEnv) {
        drop(exec_env);
    }

    fn lookup_function(&self, instance: &mut WasmtimeInstance, name: &str) -> Option<Func> {
        instance.instance.get_func(&mut instance.store, name)
    }

    fn func_signature(&self, instance: &WasmtimeInstance, func: &Func) -> FuncSignature {
        signature_of(&func.ty(&instance.store))
    }

    fn call_wasm(
        &self,
        _exec_env: &mut WasmtimeExecEnv,
        instance: &mut WasmtimeInstance,
        func: &Func,
        argc: u32,
        argv: &mut [u32],
    ) -> bool {
        let state = instance.store.data_mut();
        state.exception = None;
        state.exit_code = None;

        match call_func(&mut instance.store, func, argc, argv) {
            Ok(()) => true,
            Err(message) => {
                instance.store.data_mut().exception = Some(Diagnostic::new(message).into());
                false
            }
        }
    }

    fn get_exception(&self, instance: &WasmtimeInstance) -> Option<String> {
        instance.store.data().exception.clone()
    }

    fn get_exit_code(&self, instance: &WasmtimeInstance) -> Option<i32> {
        instance.store.data().exit_code
    }

    fn memory_data<'a>(&self, instance: &'a WasmtimeInstance, index: u32) -> Option<&'a [u8]> {
        let memory = instance.memories.get(index as usize)?;
        Some(memory.data(&instance.store))
    }

    fn memory_data_mut<'a>(
        &self,
        instance: &'a mut WasmtimeInstance,
        index: u32,
    ) -> Option<&'a mut [u8]> {
        let memory = instance.memories.get(index as usize)?;
        Some(memory.data_mut(&mut instance.store))
    }
}

impl std::fmt::Debug for WasmtimeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmtimeBackend")
            .field("initialized", &self.state.read().is_some())
            .finish_non_exhaustive()
    }
}

/// Run `func` with slot-encoded arguments, writing slot-encoded results.
///
/// Returns the exception text on failure.
fn call_func(
    store: &mut Store<InstanceState>,
    func: &Func,
    argc: u32,
    argv: &mut [u32],
) -> Result<(), String> {
    let ty = func.ty(&*store);
    let params: Vec<ValType> = ty.params().collect();
    let signature = signature_of(&ty);

    let (Some(param_slots), Some(result_slots)) =
        (signature.param_slots(), signature.result_slots())
    else {
        return Err(format!("Exception: unsupported signature {signature}"));
    };
    if argc as usize != param_slots {
        return Err(format!(
            "Exception: invalid argument count {argc}, must be {param_slots}"
        ));
    }
    if argv.len() < result_slots {
        return Err(format!(
            "Exception: invalid result count {}, must be no smaller than {result_slots}",
            argv.len()
        ));
    }

    let values = value::decode_results(&signature.params, &argv[..param_slots])
        .map_err(|e| format!("Exception: {e}"))?;
    let args = values
        .into_iter()
        .zip(&params)
        .map(|(value, ty)| to_val(value, ty, &store.data().func_refs))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rets = vec![Val::I32(0); signature.results.len()];
    if let Err(e) = func.call(&mut *store, &args, &mut rets) {
        if let Some(exit) = e.downcast_ref::<I32Exit>() {
            store.data_mut().exit_code = Some(exit.0);
        }
        return Err(exception_text(&e));
    }

    let mut values = Vec::with_capacity(rets.len());
    for val in &rets {
        values.push(from_val(val, &mut *store)?);
    }
    value::encode_into(&values, argv).map_err(|e| format!("Exception: {e}"))
}

/// Grow `memory` by `heap_size` bytes for the app heap.
///
/// The growth is clamped to the memory's declared maximum and the store
/// limit. Modules exporting `malloc` and `free` manage their own heap.
fn reserve_app_heap(
    store: &mut Store<InstanceState>,
    module: &Module,
    memory: Memory,
    heap_size: u32,
    memory_limit: usize,
) -> Result<(), Diagnostic> {
    let own_allocator = ["malloc", "free"]
        .iter()
        .all(|name| matches!(module.get_export(name), Some(ExternType::Func(_))));
    if own_allocator {
        debug!("Module exports malloc and free, app heap skipped");
        return Ok(());
    }

    let wanted = (heap_size as usize).div_ceil(WASM_PAGE_SIZE) as u64;
    let current = memory.size(&*store);
    let maximum = memory
        .ty(&*store)
        .maximum()
        .unwrap_or(u64::MAX)
        .min((memory_limit / WASM_PAGE_SIZE) as u64);
    let pages = wanted.min(maximum.saturating_sub(current));

    if pages < wanted {
        debug!(wanted, pages, "App heap clamped to memory maximum");
    }
    if pages == 0 {
        return Ok(());
    }

    memory.grow(store, pages).map_err(|e| {
        Diagnostic::new(format!(
            "failed to allocate app heap of {heap_size} bytes: {e}"
        ))
    })?;
    Ok(())
}

/// Invoke a native symbol from guest code.
fn call_native(
    symbol: &NativeSymbol,
    mut caller: Caller<'_, InstanceState>,
    params: &[Val],
    results: &mut [Val],
) -> wasmtime::Result<()> {
    let values = params
        .iter()
        .map(|val| from_val(val, &mut caller))
        .collect::<Result<Vec<_>, _>>()
        .map_err(wasmtime::Error::msg)?;
    let args = value::encode_args(&symbol.signature.params, &values)?;

    let memory = caller.get_export("memory").and_then(Extern::into_memory);
    let output = {
        let data = match memory {
            Some(memory) => Some(memory.data_mut(&mut caller)),
            None => None,
        };
        let mut call = HostCall::new(&symbol.signature, args, data);
        (symbol.func)(&mut call)?;
        call.into_results()
    };

    for ((slot, value), ty) in results.iter_mut().zip(output).zip(&symbol.signature.results) {
        *slot = to_val(value, &val_type(*ty), &caller.data().func_refs)
            .map_err(wasmtime::Error::msg)?;
    }
    Ok(())
}

/// Exception text for a failed call, prefixed like engine exceptions.
fn exception_text(error: &wasmtime::Error) -> String {
    match error.downcast_ref::<Trap>() {
        Some(trap) => format!("Exception: {trap}"),
        None => format!("Exception: {}", error.root_cause()),
    }
}

fn signature_of(ty: &FuncType) -> FuncSignature {
    FuncSignature::new(
        ty.params().map(|ty| value_type(&ty)),
        ty.results().map(|ty| value_type(&ty)),
    )
}

fn value_type(ty: &ValType) -> ValueType {
    match ty {
        ValType::I32 => ValueType::I32,
        ValType::I64 => ValueType::I64,
        ValType::F32 => ValueType::F32,
        ValType::F64 => ValueType::F64,
        ValType::V128 => ValueType::V128,
        ValType::Ref(_) if ty.matches(&ValType::FUNCREF) => ValueType::FuncRef,
        ValType::Ref(_) => ValueType::AnyRef,
    }
}

fn val_type(ty: ValueType) -> ValType {
    match ty {
        ValueType::I32 => ValType::I32,
        ValueType::I64 => ValType::I64,
        ValueType::F32 => ValType::F32,
        ValueType::F64 => ValType::F64,
        ValueType::V128 => ValType::V128,
        ValueType::FuncRef => ValType::FUNCREF,
        ValueType::AnyRef => ValType::EXTERNREF,
    }
}

fn to_val(value: Value, ty: &ValType, func_refs: &[FuncRef]) -> Result<Val, String> {
    Ok(match value {
        Value::I32(v) => Val::I32(v),
        Value::I64(v) => Val::I64(v),
        Value::F32(v) => Val::F32(v.to_bits()),
        Value::F64(v) => Val::F64(v.to_bits()),
        Value::V128(v) => Val::V128(v.into()),
        Value::FuncRef(0) => Val::FuncRef(None),
        Value::FuncRef(handle) => {
            let func = func_refs
                .get(handle as usize - 1)
                .map(|entry| entry.func)
                .ok_or_else(|| format!("Exception: unknown function reference {handle}"))?;
            Val::FuncRef(Some(func))
        }
        Value::AnyRef(0) if ty.matches(&ValType::EXTERNREF) => Val::ExternRef(None),
        Value::AnyRef(0) => Val::AnyRef(None),
        Value::AnyRef(_) => {
            return Err("Exception: host reference values are not supported".to_string());
        }
    })
}

fn from_val(
    val: &Val,
    store: impl AsContextMut<Data = InstanceState>,
) -> Result<Value, String> {
    Ok(match val {
        Val::I32(v) => Value::I32(*v),
        Val::I64(v) => Value::I64(*v),
        Val::F32(bits) => Value::F32(f32::from_bits(*bits)),
        Val::F64(bits) => Value::F64(f64::from_bits(*bits)),
        Val::V128(v) => Value::V128(v.as_u128()),
        Val::FuncRef(None) => Value::FuncRef(0),
        Val::FuncRef(Some(func)) => Value::FuncRef(func_handle(store, *func)?),
        Val::ExternRef(None) | Val::AnyRef(None) => Value::AnyRef(0),
        #[allow(unreachable_patterns)]
        _ => return Err("Exception: host reference values are not supported".to_string()),
    })
}

/// Slot handle of `func`, reusing the handle it got the first time.
#[allow(unsafe_code)]
fn func_handle(
    mut store: impl AsContextMut<Data = InstanceState>,
    func: Func,
) -> Result<u32, String> {
    // SAFETY: the pointer is only compared, never dereferenced
    let addr = unsafe { func.to_raw(&mut store) }.addr();

    let mut ctx = store.as_context_mut();
    let func_refs = &mut ctx.data_mut().func_refs;
    let index = match func_refs.iter().position(|entry| entry.addr == addr) {
        Some(index) => index,
        None => {
            func_refs.push(FuncRef { addr, func });
            func_refs.len() - 1
        }
    };
    u32::try_from(index + 1).map_err(|_| "Exception: too many function references".to_string())
}

/// Whether guest name lookups may be enabled for `pool`.
///
/// WASI preview1 only offers an all-or-nothing switch, so lookups are enabled
/// for a `*` pattern alone. Narrower pools keep them disabled.
fn name_lookup_enabled(pool: &NsLookupPool) -> bool {
    if pool.allows_any() {
        return true;
    }
    if !pool.is_empty() {
        warn!(
            patterns = ?pool.patterns(),
            "Per-name lookup filtering is unavailable, name lookups stay disabled"
        );
    }
    false
}

/// Build the WASI context of one instance.
fn build_wasi(args: &WasiArgs) -> Result<WasiP1Ctx, Diagnostic> {
    let mut builder = WasiCtxBuilder::new();

    builder.args(args.argv.as_slice());
    builder.envs(args.env.as_slice());

    if args.stdio.stdin == StdioMode::Inherit {
        builder.inherit_stdin();
    }
    if args.stdio.stdout == StdioMode::Inherit {
        builder.inherit_stdout();
    }
    if args.stdio.stderr == StdioMode::Inherit {
        builder.inherit_stderr();
    }

    for dir in &args.dirs {
        builder
            .preopened_dir(dir, dir, DirPerms::all(), FilePerms::all())
            .map_err(|e| Diagnostic::new(format!("failed to pre-open '{dir}': {e}")))?;
    }
    for mapping in &args.map_dirs {
        builder
            .preopened_dir(&mapping.host, &mapping.guest, DirPerms::all(), FilePerms::all())
            .map_err(|e| Diagnostic::new(format!("failed to pre-open '{}': {e}", mapping.host)))?;
    }

    let pool = args.addr_pool.clone();
    builder.socket_addr_check(move |addr, _use| {
        let allowed = pool.contains(addr.ip());
        let check: Pin<Box<dyn Future<Output = bool> + Send + Sync>> =
            Box::pin(async move { allowed });
        check
    });
    builder.allow_ip_name_lookup(name_lookup_enabled(&args.ns_lookup_pool));

    Ok(builder.build_p1())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_embed_common::HostAllocator;

    fn init(config: EngineConfig) -> Result<WasmtimeBackend, Diagnostic> {
        let backend = WasmtimeBackend::new();
        backend.init(&InitArgs {
            config,
            ..Default::default()
        })?;
        Ok(backend)
    }

    #[test]
    fn test_init_default() {
        let backend = init(EngineConfig::default()).unwrap();
        assert!(backend.engine().is_some());
        assert_eq!(backend.log_level(), Some(LogLevel::Warning));

        backend.destroy();
        assert!(backend.engine().is_none());
    }

    #[test]
    fn test_init_pool() {
        let config = EngineConfig {
            allocator: AllocationStrategy::Pool {
                size_bytes: 4 * 1024 * 1024,
            },
            instance_memory_mb: 1,
            ..Default::default()
        };
        assert!(init(config).is_ok());
    }

    #[test]
    fn test_pool_too_small() {
        let config = EngineConfig {
            allocator: AllocationStrategy::Pool { size_bytes: 1024 },
            ..Default::default()
        };
        let err = init(config).unwrap_err();
        assert!(err.as_str().contains("cannot hold one instance"));
    }

    #[test]
    fn test_custom_allocator_rejected() {
        fn malloc(_: usize) -> *mut u8 {
            std::ptr::null_mut()
        }
        fn realloc(_: *mut u8, _: usize) -> *mut u8 {
            std::ptr::null_mut()
        }
        fn free(_: *mut u8) {}

        let config = EngineConfig {
            allocator: AllocationStrategy::Custom(HostAllocator {
                malloc,
                realloc,
                free,
            }),
            ..Default::default()
        };
        assert!(init(config).is_err());
    }

    #[test]
    fn test_load_requires_init() {
        let backend = WasmtimeBackend::new();
        let err = backend.load(b"(module)").unwrap_err();
        assert_eq!(err.as_str(), "engine is not initialized");
    }

    #[test]
    fn test_export_functions_and_serialize() {
        let backend = init(EngineConfig::default()).unwrap();
        let module = backend
            .load(
                br#"(module
                    (func (export "add") (param i64 f32) (result f64)
                        f64.const 0)
                    (memory (export "memory") 1))"#,
            )
            .unwrap();

        let exports = backend.export_functions(&module);
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].0, "add");
        assert_eq!(exports[0].1.to_string(), "(i64, f32) -> (f64)");

        let artifact = backend.serialize(&module).unwrap();
        let reloaded = backend.load(&artifact).unwrap();
        assert_eq!(backend.export_functions(&reloaded), exports);
    }

    #[test]
    fn test_value_type_mapping() {
        for ty in [
            ValueType::I32,
            ValueType::I64,
            ValueType::F32,
            ValueType::F64,
            ValueType::V128,
            ValueType::FuncRef,
            ValueType::AnyRef,
        ] {
            assert_eq!(value_type(&val_type(ty)), ty);
        }
    }

    fn store() -> Store<InstanceState> {
        let state = InstanceState::new(
            build_wasi(&WasiArgs::default()).unwrap(),
            StoreLimits::default(),
        );
        Store::new(&Engine::default(), state)
    }

    #[test]
    fn test_val_conversions() {
        let mut store = store();

        assert_eq!(from_val(&Val::I32(-1), &mut store).unwrap(), Value::I32(-1));
        assert_eq!(
            from_val(&Val::F32(1.5f32.to_bits()), &mut store).unwrap(),
            Value::F32(1.5)
        );
        assert_eq!(
            from_val(&Val::FuncRef(None), &mut store).unwrap(),
            Value::FuncRef(0)
        );

        let func_refs = &store.data().func_refs;
        assert!(matches!(
            to_val(Value::FuncRef(0), &ValType::FUNCREF, &func_refs).unwrap(),
            Val::FuncRef(None)
        ));
        assert!(to_val(Value::FuncRef(3), &ValType::FUNCREF, &func_refs).is_err());
        assert!(matches!(
            to_val(Value::AnyRef(0), &ValType::EXTERNREF, &func_refs).unwrap(),
            Val::ExternRef(None)
        ));
        assert!(to_val(Value::AnyRef(7), &ValType::EXTERNREF, &func_refs).is_err());
    }

    #[test]
    fn test_func_handles_are_stable() {
        let mut store = store();
        let first = Func::wrap(&mut store, || {});
        let second = Func::wrap(&mut store, |x: i32| x);

        for _ in 0..3 {
            assert_eq!(
                from_val(&Val::FuncRef(Some(first)), &mut store).unwrap(),
                Value::FuncRef(1)
            );
        }
        assert_eq!(
            from_val(&Val::FuncRef(Some(second)), &mut store).unwrap(),
            Value::FuncRef(2)
        );
        assert_eq!(store.data().func_refs.len(), 2);

        let val = to_val(Value::FuncRef(2), &ValType::FUNCREF, &store.data().func_refs).unwrap();
        assert!(matches!(val, Val::FuncRef(Some(_))));
    }

    #[test]
    fn test_name_lookup_needs_wildcard() {
        assert!(!name_lookup_enabled(&NsLookupPool::default()));
        assert!(!name_lookup_enabled(&NsLookupPool::new(["example.com"])));
        assert!(!name_lookup_enabled(&NsLookupPool::new(["*.example.com"])));
        assert!(name_lookup_enabled(&NsLookupPool::new(["example.com", "*"])));
    }
}

//! Scripted engine used by unit tests.
//!
//! Exports are Rust closures over typed values; every engine entry point
//! bumps a counter so tests can check how often the engine was reached and
//! that every handle was released.

use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use wasm_embed_common::{FuncSignature, LogLevel, WASM_PAGE_SIZE};

use crate::backend::{Diagnostic, EngineBackend, InitArgs, InstantiateArgs};
use crate::value::{self, Value};

/// Empty module: magic number and version.
pub(crate) const MINIMAL_WASM: &[u8] = &[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

type Behavior = Arc<dyn Fn(&[Value]) -> Result<Vec<Value>, String> + Send + Sync>;

thread_local! {
    static THREAD_REGISTERED: Cell<bool> = const { Cell::new(false) };
}

#[derive(Clone)]
struct MockExport {
    name: String,
    signature: FuncSignature,
    behavior: Behavior,
}

/// How often each engine entry point was reached.
#[derive(Default)]
pub(crate) struct MockCounters {
    inits: AtomicUsize,
    destroys: AtomicUsize,
    loads: AtomicUsize,
    unloads: AtomicUsize,
    instantiations: AtomicUsize,
    deinstantiations: AtomicUsize,
    exec_envs_created: AtomicUsize,
    exec_envs_destroyed: AtomicUsize,
    lookups: AtomicUsize,
    calls: AtomicUsize,
    thread_inits: AtomicUsize,
    thread_destroys: AtomicUsize,
    teardown_events: Mutex<Vec<&'static str>>,
}

impl MockCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub(crate) fn inits(&self) -> usize {
        Self::get(&self.inits)
    }

    pub(crate) fn destroys(&self) -> usize {
        Self::get(&self.destroys)
    }

    pub(crate) fn loads(&self) -> usize {
        Self::get(&self.loads)
    }

    pub(crate) fn unloads(&self) -> usize {
        Self::get(&self.unloads)
    }

    pub(crate) fn instantiations(&self) -> usize {
        Self::get(&self.instantiations)
    }

    pub(crate) fn deinstantiations(&self) -> usize {
        Self::get(&self.deinstantiations)
    }

    pub(crate) fn exec_envs_destroyed(&self) -> usize {
        Self::get(&self.exec_envs_destroyed)
    }

    pub(crate) fn lookups(&self) -> usize {
        Self::get(&self.lookups)
    }

    pub(crate) fn calls(&self) -> usize {
        Self::get(&self.calls)
    }

    pub(crate) fn thread_inits(&self) -> usize {
        Self::get(&self.thread_inits)
    }

    pub(crate) fn thread_destroys(&self) -> usize {
        Self::get(&self.thread_destroys)
    }

    pub(crate) fn live_modules(&self) -> usize {
        self.loads() - self.unloads()
    }

    pub(crate) fn live_instances(&self) -> usize {
        self.instantiations() - self.deinstantiations()
    }

    pub(crate) fn live_exec_envs(&self) -> usize {
        Self::get(&self.exec_envs_created) - self.exec_envs_destroyed()
    }

    pub(crate) fn teardown_events(&self) -> Vec<&'static str> {
        self.teardown_events.lock().clone()
    }
}

/// Scripted [`EngineBackend`].
pub(crate) struct MockBackend {
    exports: Vec<MockExport>,
    counters: Arc<MockCounters>,
    singleton: bool,
    init_failure: Option<String>,
    instantiate_failure: Option<String>,
    fail_exec_env: AtomicBool,
    fail_thread_env: AtomicBool,
    last_log_level: Mutex<Option<LogLevel>>,
    last_init_natives: Mutex<Option<usize>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self {
            exports: Vec::new(),
            counters: Arc::default(),
            singleton: false,
            init_failure: None,
            instantiate_failure: None,
            fail_exec_env: AtomicBool::new(false),
            fail_thread_env: AtomicBool::new(false),
            last_log_level: Mutex::new(None),
            last_init_natives: Mutex::new(None),
        }
    }

    pub(crate) fn with_export<F>(mut self, name: &str, signature: FuncSignature, behavior: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, String> + Send + Sync + 'static,
    {
        self.exports.push(MockExport {
            name: name.to_string(),
            signature,
            behavior: Arc::new(behavior),
        });
        self
    }

    pub(crate) fn process_singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    pub(crate) fn failing_init(mut self, reason: &str) -> Self {
        self.init_failure = Some(reason.to_string());
        self
    }

    pub(crate) fn failing_instantiate(mut self, reason: &str) -> Self {
        self.instantiate_failure = Some(reason.to_string());
        self
    }

    pub(crate) fn set_fail_exec_env(&self, fail: bool) {
        self.fail_exec_env.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_thread_env(&self, fail: bool) {
        self.fail_thread_env.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn counters(&self) -> Arc<MockCounters> {
        Arc::clone(&self.counters)
    }

    pub(crate) fn last_log_level(&self) -> Option<LogLevel> {
        *self.last_log_level.lock()
    }

    pub(crate) fn last_init_natives(&self) -> Option<usize> {
        *self.last_init_natives.lock()
    }
}

pub(crate) struct MockModule {
    exports: Vec<MockExport>,
}

pub(crate) struct MockInstance {
    exports: Vec<MockExport>,
    memory: Vec<u8>,
    exception: Option<String>,
}

pub(crate) struct MockExecEnv;

#[derive(Debug, Clone, Copy)]
pub(crate) struct MockFunc(usize);

impl EngineBackend for MockBackend {
    type Module = MockModule;
    type Instance = MockInstance;
    type ExecEnv = MockExecEnv;
    type Func = MockFunc;

    fn name(&self) -> &'static str {
        "mock"
    }

    fn is_process_singleton(&self) -> bool {
        self.singleton
    }

    fn init(&self, args: &InitArgs) -> Result<(), Diagnostic> {
        if let Some(reason) = &self.init_failure {
            return Err(Diagnostic::new(reason));
        }
        MockCounters::bump(&self.counters.inits);
        *self.last_init_natives.lock() = Some(args.natives.len());
        Ok(())
    }

    fn destroy(&self) {
        MockCounters::bump(&self.counters.destroys);
    }

    fn set_log_level(&self, level: LogLevel) {
        *self.last_log_level.lock() = Some(level);
    }

    fn load(&self, bytes: &[u8]) -> Result<MockModule, Diagnostic> {
        if !bytes.starts_with(b"\0asm") {
            return Err(Diagnostic::new("magic header not detected"));
        }
        MockCounters::bump(&self.counters.loads);
        Ok(MockModule {
            exports: self.exports.clone(),
        })
    }

    fn unload(&self, _module: MockModule) {
        MockCounters::bump(&self.counters.unloads);
    }

    fn export_functions(&self, module: &MockModule) -> Vec<(String, FuncSignature)> {
        module
            .exports
            .iter()
            .map(|export| (export.name.clone(), export.signature.clone()))
            .collect()
    }

    fn instantiate(
        &self,
        module: &MockModule,
        _args: &InstantiateArgs<'_>,
    ) -> Result<MockInstance, Diagnostic> {
        if let Some(reason) = &self.instantiate_failure {
            return Err(Diagnostic::new(reason));
        }
        MockCounters::bump(&self.counters.instantiations);
        Ok(MockInstance {
            exports: module.exports.clone(),
            memory: vec![0; WASM_PAGE_SIZE],
            exception: None,
        })
    }

    fn deinstantiate(&self, _instance: MockInstance) {
        MockCounters::bump(&self.counters.deinstantiations);
        self.counters.teardown_events.lock().push("deinstantiate");
    }

    fn create_exec_env(&self, _instance: &mut MockInstance, _stack_size: u32) -> Option<MockExecEnv> {
        if self.fail_exec_env.load(Ordering::SeqCst) {
            return None;
        }
        MockCounters::bump(&self.counters.exec_envs_created);
        Some(MockExecEnv)
    }

    fn destroy_exec_env(&self, _exec_env: MockExecEnv) {
        MockCounters::bump(&self.counters.exec_envs_destroyed);
        self.counters.teardown_events.lock().push("destroy_exec_env");
    }

    fn lookup_function(&self, instance: &mut MockInstance, name: &str) -> Option<MockFunc> {
        MockCounters::bump(&self.counters.lookups);
        instance
            .exports
            .iter()
            .position(|export| export.name == name)
            .map(MockFunc)
    }

    fn func_signature(&self, instance: &MockInstance, func: &MockFunc) -> FuncSignature {
        instance
            .exports
            .get(func.0)
            .map(|export| export.signature.clone())
            .unwrap_or_default()
    }

    fn call_wasm(
        &self,
        _exec_env: &mut MockExecEnv,
        instance: &mut MockInstance,
        func: &MockFunc,
        argc: u32,
        argv: &mut [u32],
    ) -> bool {
        MockCounters::bump(&self.counters.calls);
        instance.exception = None;

        let Some(export) = instance.exports.get(func.0).cloned() else {
            instance.exception = Some("Exception: invalid function".into());
            return false;
        };

        let outcome = value::decode_results(&export.signature.params, &argv[..argc as usize])
            .map_err(|e| e.to_string())
            .and_then(|args| (export.behavior)(&args))
            .and_then(|results| value::encode_into(&results, argv).map_err(|e| e.to_string()));

        match outcome {
            Ok(()) => true,
            Err(message) => {
                instance.exception = Some(format!("Exception: {message}"));
                false
            }
        }
    }

    fn get_exception(&self, instance: &MockInstance) -> Option<String> {
        instance.exception.clone()
    }

    fn memory_data<'a>(&self, instance: &'a MockInstance, index: u32) -> Option<&'a [u8]> {
        (index == 0).then_some(instance.memory.as_slice())
    }

    fn memory_data_mut<'a>(
        &self,
        instance: &'a mut MockInstance,
        index: u32,
    ) -> Option<&'a mut [u8]> {
        (index == 0).then_some(instance.memory.as_mut_slice())
    }

    fn thread_env_inited(&self) -> bool {
        THREAD_REGISTERED.with(Cell::get)
    }

    fn init_thread_env(&self) -> bool {
        if self.fail_thread_env.load(Ordering::SeqCst) {
            return false;
        }
        MockCounters::bump(&self.counters.thread_inits);
        THREAD_REGISTERED.with(|registered| registered.set(true));
        true
    }

    fn destroy_thread_env(&self) {
        MockCounters::bump(&self.counters.thread_destroys);
        THREAD_REGISTERED.with(|registered| registered.set(false));
    }
}

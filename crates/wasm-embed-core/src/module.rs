//! Loaded WebAssembly modules.
//!
//! A [`Module`] is the validated, immutable form of a `.wasm` binary (or of
//! a precompiled artifact produced by [`Module::serialize`]). Its export
//! table is captured at load time and never changes.
//!
//! WASI arguments are owned by the module and must be set before the first
//! instance is created; the borrow checker enforces this, since setters take
//! `&mut self` and instances borrow the module.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use wasm_embed_common::{ConfigError, FuncSignature, LoadError};

use crate::backend::EngineBackend;
use crate::runtime::Runtime;
use crate::wasi::{self, AddrPool, DirMapping, NsLookupPool, Stdio, StdioMode, WasiArgs};
use crate::wasmtime_backend::WasmtimeBackend;

/// A loaded module.
pub struct Module<B: EngineBackend = WasmtimeBackend> {
    runtime: Runtime<B>,
    generation: u64,
    handle: Option<B::Module>,
    size_bytes: usize,
    content_hash: String,
    exports: BTreeMap<String, FuncSignature>,
    wasi: WasiArgs,
}

impl<B: EngineBackend> Module<B> {
    /// Load a module from bytes.
    ///
    /// Accepts WebAssembly binaries and precompiled artifacts of the same
    /// engine.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `bytes` is empty
    /// - The runtime is not initialized
    /// - The engine rejects the bytes
    #[instrument(skip(runtime, bytes), fields(bytes_len = bytes.len()))]
    pub fn load(runtime: &Runtime<B>, bytes: &[u8]) -> Result<Self, LoadError> {
        let start = Instant::now();

        if bytes.is_empty() {
            return Err(LoadError::invalid_input("module bytes are empty"));
        }

        let generation = runtime.current_generation()?;
        let backend = runtime.backend();

        let handle = backend.load(bytes).map_err(|diagnostic| {
            warn!(reason = %diagnostic, "Engine rejected module");
            LoadError::engine_rejected(diagnostic)
        })?;
        let exports: BTreeMap<_, _> = backend.export_functions(&handle).into_iter().collect();

        let content_hash = compute_hash(bytes);
        let duration = start.elapsed();

        info!(
            content_hash = %content_hash,
            exports = exports.len(),
            duration_ms = duration.as_millis(),
            "Module loaded"
        );

        Ok(Self {
            runtime: runtime.clone(),
            generation,
            handle: Some(handle),
            size_bytes: bytes.len(),
            content_hash,
            exports,
            wasi: WasiArgs::default(),
        })
    }

    /// Read and load a module file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the module cannot be
    /// loaded.
    pub fn from_file(runtime: &Runtime<B>, path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Module file read");
        Self::load(runtime, &bytes)
    }

    /// Load a module from WebAssembly text.
    ///
    /// Only engines that accept the text format can load it.
    ///
    /// # Errors
    ///
    /// Returns an error if the module cannot be loaded.
    pub fn from_wat(runtime: &Runtime<B>, wat: &str) -> Result<Self, LoadError> {
        Self::load(runtime, wat.as_bytes())
    }

    /// Size of the bytes the module was loaded from.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    /// Hash of the bytes the module was loaded from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Exported functions and their signatures, sorted by name.
    pub fn exports(&self) -> impl Iterator<Item = (&str, &FuncSignature)> {
        self.exports.iter().map(|(name, sig)| (name.as_str(), sig))
    }

    /// Signature of an exported function.
    pub fn function_signature(&self, name: &str) -> Option<&FuncSignature> {
        self.exports.get(name)
    }

    /// The runtime this module was loaded into.
    pub fn runtime(&self) -> &Runtime<B> {
        &self.runtime
    }

    /// Returns `true` once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    /// WASI arguments handed to new instances.
    pub fn wasi_args(&self) -> &WasiArgs {
        &self.wasi
    }

    /// Produce a precompiled artifact for fast loading later.
    ///
    /// # Errors
    ///
    /// Returns an error if the module was destroyed, the runtime is no longer
    /// live, or the engine cannot serialize modules.
    pub fn serialize(&self) -> Result<Vec<u8>, LoadError> {
        let handle = self.live_handle()?;
        let artifact = self
            .runtime
            .backend()
            .serialize(handle)
            .map_err(LoadError::engine_rejected)?;

        debug!(
            content_hash = %self.content_hash,
            artifact_len = artifact.len(),
            "Module serialized"
        );
        Ok(artifact)
    }

    /// Set pre-opened directories, directory mappings (`GUEST::HOST`),
    /// environment (`KEY=VALUE`) and program arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory mapping is malformed.
    pub fn set_wasi_args<S: AsRef<str>>(
        &mut self,
        dirs: &[S],
        map_dirs: &[S],
        env: &[S],
        argv: &[S],
    ) -> Result<(), ConfigError> {
        let map_dirs = map_dirs
            .iter()
            .map(|entry| DirMapping::parse(entry.as_ref()))
            .collect::<Result<_, _>>()?;

        self.wasi.dirs = to_strings(dirs);
        self.wasi.map_dirs = map_dirs;
        self.wasi.env = env.iter().map(|e| wasi::parse_env(e.as_ref())).collect();
        self.wasi.argv = to_strings(argv);
        Ok(())
    }

    /// [`set_wasi_args`](Self::set_wasi_args) plus standard stream wiring.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory mapping is malformed.
    #[allow(clippy::too_many_arguments)]
    pub fn set_wasi_args_ex<S: AsRef<str>>(
        &mut self,
        dirs: &[S],
        map_dirs: &[S],
        env: &[S],
        argv: &[S],
        stdin: StdioMode,
        stdout: StdioMode,
        stderr: StdioMode,
    ) -> Result<(), ConfigError> {
        self.set_wasi_args(dirs, map_dirs, env, argv)?;
        self.wasi.stdio = Stdio {
            stdin,
            stdout,
            stderr,
        };
        Ok(())
    }

    /// Restrict guest sockets to these addresses or CIDR blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is malformed.
    pub fn set_wasi_addr_pool<S: AsRef<str>>(&mut self, addrs: &[S]) -> Result<(), ConfigError> {
        self.wasi.addr_pool = AddrPool::parse(addrs)?;
        Ok(())
    }

    /// Restrict guest name lookups to these host name patterns.
    ///
    /// The wasmtime backend can only switch lookups on or off, so they are
    /// enabled only when the pool contains `*`.
    pub fn set_wasi_ns_lookup_pool<S: AsRef<str>>(&mut self, names: &[S]) {
        self.wasi.ns_lookup_pool = NsLookupPool::new(names.iter().map(|n| n.as_ref().to_string()));
    }

    /// Replace all WASI arguments at once.
    pub fn set_wasi(&mut self, args: WasiArgs) {
        self.wasi = args;
    }

    /// Release the module. Calling this more than once is a no-op.
    ///
    /// If the runtime was destroyed in the meantime the handle is dropped
    /// without calling into the engine.
    pub fn destroy(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        if self.runtime.ensure_live(self.generation).is_ok() {
            self.runtime.backend().unload(handle);
            debug!(content_hash = %self.content_hash, "Module unloaded");
        } else {
            drop(handle);
            debug!(
                content_hash = %self.content_hash,
                "Module released after runtime destroy"
            );
        }
    }

    /// The engine handle, if the module and its runtime generation are live.
    pub(crate) fn live_handle(&self) -> Result<&B::Module, LoadError> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| LoadError::invalid_input("module destroyed"))?;
        self.runtime.ensure_live(self.generation)?;
        Ok(handle)
    }

    pub(crate) fn handle(&self) -> Option<&B::Module> {
        self.handle.as_ref()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

impl<B: EngineBackend> Drop for Module<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<B: EngineBackend> fmt::Debug for Module<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("content_hash", &self.content_hash)
            .field("size_bytes", &self.size_bytes)
            .field("exports", &self.exports.len())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

fn to_strings<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InitArgs;
    use crate::mock::{MINIMAL_WASM, MockBackend};
    use wasm_embed_common::{EngineError, ValueType};

    fn runtime_with(backend: MockBackend) -> Runtime<MockBackend> {
        let runtime = Runtime::new(backend);
        runtime.init(&InitArgs::default()).unwrap();
        runtime
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn test_load_and_exports() {
        let backend = MockBackend::new().with_export(
            "sum",
            FuncSignature::new([ValueType::I32, ValueType::I32], [ValueType::I32]),
            |_| Ok(vec![]),
        );
        let runtime = runtime_with(backend);

        let module = Module::load(&runtime, MINIMAL_WASM).unwrap();
        assert_eq!(module.size_bytes(), MINIMAL_WASM.len());
        assert_eq!(module.content_hash().len(), 16);
        assert!(!module.is_destroyed());

        let exports: Vec<_> = module.exports().map(|(name, _)| name).collect();
        assert_eq!(exports, vec!["sum"]);
        assert_eq!(
            module.function_signature("sum").unwrap().to_string(),
            "(i32, i32) -> (i32)"
        );
        assert!(module.function_signature("missing").is_none());
    }

    #[test]
    fn test_empty_input_never_reaches_engine() {
        let backend = MockBackend::new();
        let counters = backend.counters();
        let runtime = runtime_with(backend);

        let err = Module::load(&runtime, &[]).unwrap_err();
        assert!(matches!(err, LoadError::InvalidInput { .. }));
        assert_eq!(counters.loads(), 0);
    }

    #[test]
    fn test_engine_rejection_carries_diagnostic() {
        let runtime = runtime_with(MockBackend::new());

        let err = Module::load(&runtime, b"not wasm at all").unwrap_err();
        match err {
            LoadError::EngineRejected { message } => {
                assert_eq!(message, "magic header not detected");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_load_requires_initialized_runtime() {
        let runtime = Runtime::new(MockBackend::new());

        let err = Module::load(&runtime, MINIMAL_WASM).unwrap_err();
        assert!(matches!(err, LoadError::Engine(EngineError::NotInitialized)));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let backend = MockBackend::new();
        let counters = backend.counters();
        let runtime = runtime_with(backend);

        let mut module = Module::load(&runtime, MINIMAL_WASM).unwrap();
        module.destroy();
        module.destroy();
        assert!(module.is_destroyed());
        drop(module);

        assert_eq!(counters.loads(), 1);
        assert_eq!(counters.unloads(), 1);
    }

    #[test]
    fn test_drop_unloads() {
        let backend = MockBackend::new();
        let counters = backend.counters();
        let runtime = runtime_with(backend);

        for _ in 0..10 {
            let _module = Module::load(&runtime, MINIMAL_WASM).unwrap();
        }
        assert_eq!(counters.loads(), 10);
        assert_eq!(counters.unloads(), 10);
        assert_eq!(counters.live_modules(), 0);
    }

    #[test]
    fn test_destroy_after_runtime_destroy_skips_engine() {
        let backend = MockBackend::new();
        let counters = backend.counters();
        let runtime = runtime_with(backend);

        let mut module = Module::load(&runtime, MINIMAL_WASM).unwrap();
        runtime.destroy();
        module.destroy();

        assert_eq!(counters.unloads(), 0);
        assert!(module.is_destroyed());
    }

    #[test]
    fn test_module_invalidated_by_reinit() {
        let runtime = runtime_with(MockBackend::new());
        let module = Module::load(&runtime, MINIMAL_WASM).unwrap();

        runtime.destroy();
        runtime.init(&InitArgs::default()).unwrap();

        assert!(matches!(
            module.serialize(),
            Err(LoadError::Engine(EngineError::Invalidated))
        ));
    }

    #[test]
    fn test_serialize_unsupported_by_mock() {
        let runtime = runtime_with(MockBackend::new());
        let module = Module::load(&runtime, MINIMAL_WASM).unwrap();

        assert!(matches!(
            module.serialize(),
            Err(LoadError::EngineRejected { .. })
        ));
    }

    #[test]
    fn test_from_file_missing() {
        let runtime = runtime_with(MockBackend::new());

        let err = Module::from_file(&runtime, "/nonexistent/app.wasm").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_wasi_setters() {
        let runtime = runtime_with(MockBackend::new());
        let mut module = Module::load(&runtime, MINIMAL_WASM).unwrap();

        module
            .set_wasi_args_ex(
                &["."],
                &["/data::./data"],
                &["A=1", "B"],
                &["app", "--flag"],
                StdioMode::Null,
                StdioMode::Inherit,
                StdioMode::Inherit,
            )
            .unwrap();
        module.set_wasi_addr_pool(&["127.0.0.1/32"]).unwrap();
        module.set_wasi_ns_lookup_pool(&["*.example.com"]);

        let wasi = module.wasi_args();
        assert_eq!(wasi.dirs, vec!["."]);
        assert_eq!(wasi.map_dirs[0].host, "./data");
        assert_eq!(
            wasi.env,
            vec![("A".into(), "1".into()), ("B".into(), String::new())]
        );
        assert_eq!(wasi.argv, vec!["app", "--flag"]);
        assert_eq!(wasi.stdio.stdin, StdioMode::Null);
        assert!(wasi.addr_pool.contains("127.0.0.1".parse().unwrap()));
        assert!(wasi.ns_lookup_pool.allows("api.example.com"));

        assert!(module.set_wasi_args(&[], &["bad"], &[], &[]).is_err());
        assert!(module.set_wasi_addr_pool(&["bad"]).is_err());
    }
}

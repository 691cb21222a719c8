//! Host (native) functions importable by guest modules.
//!
//! Symbols are grouped by namespace (the import module name) and described
//! with compact signature strings:
//!
//! | Char | Type |
//! |---|---|
//! | `i` | i32 |
//! | `I` | i64 |
//! | `f` | f32 |
//! | `F` | f64 |
//! | `r` | anyref |
//! | `*`, `~`, `$` | i32 (pointer, length, string offset) |
//!
//! `"(ii)i"` takes two i32 and returns one i32; `"(*~)"` takes a pointer and
//! a length and returns nothing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use wasm_embed_common::{ConfigError, FuncSignature, HostFunctionError, ValueType};

use crate::memory::checked_range;
use crate::value::{self, Value};

/// Host callback invoked when guest code calls an imported native symbol.
pub type HostFn = Arc<dyn Fn(&mut HostCall<'_>) -> Result<(), HostFunctionError> + Send + Sync>;

/// One native symbol: name, signature and callback.
#[derive(Clone)]
pub struct NativeSymbol {
    /// Import field name.
    pub name: String,

    /// Declared signature.
    pub signature: FuncSignature,

    /// Callback run on each call.
    pub func: HostFn,
}

impl fmt::Debug for NativeSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSymbol")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Native symbols by namespace, in registration order within a namespace.
#[derive(Debug, Clone, Default)]
pub struct NativeRegistry {
    namespaces: BTreeMap<String, Vec<NativeSymbol>>,
}

impl NativeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host function under `namespace.name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature string is malformed or the symbol is
    /// already registered in this namespace.
    pub fn register<F>(
        &mut self,
        namespace: &str,
        name: &str,
        signature: &str,
        func: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&mut HostCall<'_>) -> Result<(), HostFunctionError> + Send + Sync + 'static,
    {
        let signature = parse_signature(signature)?;
        self.register_symbol(
            namespace,
            NativeSymbol {
                name: name.to_string(),
                signature,
                func: Arc::new(func),
            },
        )
    }

    /// Register an already-built symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is already registered in this namespace.
    pub fn register_symbol(
        &mut self,
        namespace: &str,
        symbol: NativeSymbol,
    ) -> Result<(), ConfigError> {
        let symbols = self.namespaces.entry(namespace.to_string()).or_default();
        if symbols.iter().any(|existing| existing.name == symbol.name) {
            return Err(ConfigError::DuplicateSymbol {
                namespace: namespace.to_string(),
                name: symbol.name,
            });
        }
        symbols.push(symbol);
        Ok(())
    }

    /// Look up a symbol.
    pub fn get(&self, namespace: &str, name: &str) -> Option<&NativeSymbol> {
        self.namespaces
            .get(namespace)?
            .iter()
            .find(|symbol| symbol.name == name)
    }

    /// Iterate over `(namespace, symbol)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &NativeSymbol)> {
        self.namespaces.iter().flat_map(|(namespace, symbols)| {
            symbols
                .iter()
                .map(move |symbol| (namespace.as_str(), symbol))
        })
    }

    /// Total number of registered symbols.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(Vec::len).sum()
    }

    /// Returns `true` if no symbol is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parse a native signature string such as `"(ii)i"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSignature`] if the string is malformed.
pub fn parse_signature(signature: &str) -> Result<FuncSignature, ConfigError> {
    let invalid = |reason: &str| ConfigError::invalid_signature(signature, reason);

    let rest = signature
        .strip_prefix('(')
        .ok_or_else(|| invalid("must start with '('"))?;
    let (params, results) = rest
        .split_once(')')
        .ok_or_else(|| invalid("missing ')'"))?;

    let params = params
        .chars()
        .map(|c| type_from_char(c).ok_or_else(|| invalid(&format!("unknown parameter type '{c}'"))))
        .collect::<Result<Vec<_>, _>>()?;
    let results = results
        .chars()
        .map(|c| type_from_char(c).ok_or_else(|| invalid(&format!("unknown result type '{c}'"))))
        .collect::<Result<Vec<_>, _>>()?;

    if results.len() > 1 {
        return Err(invalid("at most one result is allowed"));
    }

    Ok(FuncSignature::new(params, results))
}

fn type_from_char(c: char) -> Option<ValueType> {
    match c {
        'i' | '*' | '~' | '$' => Some(ValueType::I32),
        'I' => Some(ValueType::I64),
        'f' => Some(ValueType::F32),
        'F' => Some(ValueType::F64),
        'r' => Some(ValueType::AnyRef),
        _ => None,
    }
}

/// One invocation of a native symbol.
///
/// Gives the callback its arguments, a place for its results, and the
/// calling instance's exported `memory`, if any.
pub struct HostCall<'a> {
    signature: &'a FuncSignature,
    args: Vec<u32>,
    results: Vec<Value>,
    memory: Option<&'a mut [u8]>,
}

impl<'a> HostCall<'a> {
    /// Create a call with already-encoded argument slots.
    pub fn new(signature: &'a FuncSignature, args: Vec<u32>, memory: Option<&'a mut [u8]>) -> Self {
        Self {
            signature,
            args,
            results: Vec::new(),
            memory,
        }
    }

    /// Declared signature of the symbol.
    pub fn signature(&self) -> &FuncSignature {
        self.signature
    }

    /// Raw argument slots.
    pub fn arg_slots(&self) -> &[u32] {
        &self.args
    }

    /// Arguments decoded per the declared parameter types.
    pub fn params(&self) -> Result<Vec<Value>, HostFunctionError> {
        value::decode_results(&self.signature.params, &self.args)
            .map_err(|e| HostFunctionError::invalid_argument(e.to_string()))
    }

    /// Argument at `index` as an `i32`.
    pub fn param_i32(&self, index: usize) -> Result<i32, HostFunctionError> {
        match self.params()?.get(index) {
            Some(Value::I32(v)) => Ok(*v),
            Some(other) => Err(HostFunctionError::invalid_argument(format!(
                "argument {index} is {}, not i32",
                other.ty()
            ))),
            None => Err(HostFunctionError::invalid_argument(format!(
                "argument {index} does not exist"
            ))),
        }
    }

    /// Set the values returned to the guest.
    ///
    /// # Errors
    ///
    /// Returns an error if the values do not match the declared result types.
    pub fn set_results(&mut self, values: &[Value]) -> Result<(), HostFunctionError> {
        value::encode_args(&self.signature.results, values)
            .map_err(|e| HostFunctionError::invalid_argument(e.to_string()))?;
        self.results = values.to_vec();
        Ok(())
    }

    /// Values set by [`set_results`](Self::set_results).
    pub fn results(&self) -> &[Value] {
        &self.results
    }

    /// Consume the call and return its results.
    pub fn into_results(self) -> Vec<Value> {
        self.results
    }

    /// The caller's linear memory, if it exports one.
    pub fn memory(&self) -> Option<&[u8]> {
        self.memory.as_deref()
    }

    /// Mutable access to the caller's linear memory.
    pub fn memory_mut(&mut self) -> Option<&mut [u8]> {
        self.memory.as_deref_mut()
    }

    /// Bounds-checked read of `len` bytes at `offset` in the caller's memory.
    pub fn read_memory(&self, offset: usize, len: usize) -> Result<&[u8], HostFunctionError> {
        let memory = self
            .memory()
            .ok_or_else(|| HostFunctionError::memory_access("caller exports no memory"))?;
        let range = checked_range(offset, len, memory.len())
            .map_err(|e| HostFunctionError::memory_access(e.to_string()))?;
        Ok(&memory[range])
    }
}

impl fmt::Debug for HostCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCall")
            .field("signature", &self.signature)
            .field("args", &self.args)
            .field("has_memory", &self.memory.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut HostCall<'_>) -> Result<(), HostFunctionError> {
        Ok(())
    }

    #[test]
    fn test_parse_signature() {
        let sig = parse_signature("(ii)i").unwrap();
        assert_eq!(sig.params, vec![ValueType::I32, ValueType::I32]);
        assert_eq!(sig.results, vec![ValueType::I32]);

        let sig = parse_signature("(*~$IfFr)").unwrap();
        assert_eq!(
            sig.params,
            vec![
                ValueType::I32,
                ValueType::I32,
                ValueType::I32,
                ValueType::I64,
                ValueType::F32,
                ValueType::F64,
                ValueType::AnyRef,
            ]
        );
        assert!(sig.results.is_empty());

        assert_eq!(parse_signature("()").unwrap(), FuncSignature::default());
    }

    #[test]
    fn test_parse_signature_rejects_malformed() {
        for bad in ["ii)i", "(ii", "(x)", "(i)q", "(i)ii"] {
            assert!(
                matches!(
                    parse_signature(bad),
                    Err(ConfigError::InvalidSignature { .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = NativeRegistry::new();
        registry.register("env", "log", "(iii)", noop).unwrap();
        registry.register("env", "now", "()I", noop).unwrap();
        registry.register("host", "add", "(ii)i", noop).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
        assert_eq!(
            registry.get("env", "now").unwrap().signature.results,
            vec![ValueType::I64]
        );
        assert!(registry.get("env", "add").is_none());

        let names: Vec<_> = registry
            .iter()
            .map(|(ns, symbol)| format!("{ns}.{}", symbol.name))
            .collect();
        assert_eq!(names, vec!["env.log", "env.now", "host.add"]);
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = NativeRegistry::new();
        registry.register("env", "log", "(iii)", noop).unwrap();

        let err = registry.register("env", "log", "(i)", noop).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateSymbol { .. }));

        // Same name in another namespace is fine
        assert!(registry.register("wasi", "log", "(i)", noop).is_ok());
    }

    #[test]
    fn test_host_call_params_and_results() {
        let sig = parse_signature("(iI)i").unwrap();
        let mut call = HostCall::new(&sig, vec![7, 0xffff_ffff, 0xffff_ffff], None);

        assert_eq!(call.params().unwrap(), vec![Value::I32(7), Value::I64(-1)]);
        assert_eq!(call.param_i32(0).unwrap(), 7);
        assert!(call.param_i32(1).is_err());
        assert!(call.param_i32(5).is_err());

        assert!(call.set_results(&[Value::I64(1)]).is_err());
        call.set_results(&[Value::I32(8)]).unwrap();
        assert_eq!(call.into_results(), vec![Value::I32(8)]);
    }

    #[test]
    fn test_host_call_memory_bounds() {
        let sig = parse_signature("(*~)").unwrap();
        let mut memory = b"hello world".to_vec();
        let call = HostCall::new(&sig, vec![0, 5], Some(&mut memory));

        assert_eq!(call.read_memory(6, 5).unwrap(), b"world");
        let err = call.read_memory(6, 6).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Memory access failed: Memory access out of bounds: offset 6 + length 6 > size 11"
        );
        assert!(call.read_memory(usize::MAX, 2).is_err());

        let no_memory = HostCall::new(&sig, vec![0, 0], None);
        assert!(matches!(
            no_memory.read_memory(0, 0),
            Err(HostFunctionError::MemoryAccess { .. })
        ));
    }
}

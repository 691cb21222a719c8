//! Embedding API for running WebAssembly modules from a host program.
//!
//! This crate provides the lifecycle of an embedded engine:
//! - [`Runtime`]: Engine handle, initialized once and shared by reference
//! - [`Module`]: Validated module bytes and their export table
//! - [`Instance`]: Instantiated module with an execution environment
//! - [`Value`]: Typed values and the 32-bit slot marshaller
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Runtime                           │
//! │  (One per engine, cloned by reference)                  │
//! │  - Allocator strategy                                   │
//! │  - Native symbols                                       │
//! │  - Generation counter                                   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Module                            │
//! │  (Immutable, shared by its instances)                   │
//! │  - Export signatures                                    │
//! │  - WASI arguments                                       │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │               Instance + execution env                  │
//! │  (Single-threaded, borrows its module)                  │
//! │  - Export cache                                         │
//! │  - Linear memory                                        │
//! │  - Last exception                                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every engine call goes through the [`EngineBackend`] trait;
//! [`WasmtimeBackend`] is the default implementation.

pub mod backend;
pub mod instance;
pub mod memory;
pub mod module;
pub mod native;
pub mod runtime;
pub mod value;
pub mod wasi;
pub mod wasmtime_backend;

mod thread_env;

#[cfg(test)]
mod mock;

pub use backend::{DIAGNOSTIC_CAPACITY, Diagnostic, EngineBackend, InitArgs, InstantiateArgs};
pub use instance::Instance;
pub use memory::MemoryView;
pub use module::Module;
pub use native::{HostCall, HostFn, NativeRegistry, NativeSymbol, parse_signature};
pub use runtime::{Runtime, RuntimeBuilder};
pub use value::{ParseValueError, Value};
pub use wasi::{AddrPool, DirMapping, NsLookupPool, Stdio, StdioMode, WasiArgs};
pub use wasmtime_backend::WasmtimeBackend;

//! Standard native functions for wasm-embed guests.
//!
//! Guest modules import these from the `env` namespace. Register them on a
//! [`NativeRegistry`](wasm_embed_core::NativeRegistry) before the runtime is
//! initialized.
//!
//! # Functions
//!
//! - [`logging`]: `env.log(level, ptr, len)`, structured logging from guest code
//!
//! Every pointer a guest passes in is bounds-checked against its linear
//! memory; a bad range fails the call with an exception instead of reading
//! host memory.

pub mod logging;
pub mod registry;

pub use logging::{GuestLogs, LogEntry, LogLevel, LoggingHost};
pub use registry::{register_all, register_logging};

//! Native symbol registration.

use tracing::debug;
use wasm_embed_common::{ConfigError, HostFunctionError, NativesConfig};
use wasm_embed_core::{HostCall, NativeRegistry};

use crate::logging::{LoggingHost, level_from_i32};

/// Register the native functions enabled in `config`.
///
/// This registers the following native functions:
/// - `env.log` - Logging function for guest code
///
/// # Errors
///
/// Returns an error if a symbol is already registered.
pub fn register_all(
    registry: &mut NativeRegistry,
    config: &NativesConfig,
    logging: &LoggingHost,
) -> Result<(), ConfigError> {
    if config.logging {
        register_logging(registry, logging.clone())?;
    }
    Ok(())
}

/// Register `env.log(level: i32, ptr: i32, len: i32)`.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Offset of the message in its exported `memory`
/// - `len`: Length of the message in bytes (UTF-8)
///
/// A negative or out-of-bounds range fails the call, which surfaces to the
/// guest's caller as an exception.
pub fn register_logging(
    registry: &mut NativeRegistry,
    host: LoggingHost,
) -> Result<(), ConfigError> {
    registry.register("env", "log", "(iii)", move |call| log(&host, call))?;
    debug!("Registered env.log");
    Ok(())
}

fn log(host: &LoggingHost, call: &mut HostCall<'_>) -> Result<(), HostFunctionError> {
    let level = call.param_i32(0)?;
    let ptr = call.param_i32(1)?;
    let len = call.param_i32(2)?;

    let (Ok(offset), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return Err(HostFunctionError::invalid_argument(format!(
            "negative pointer or length ({ptr}, {len})"
        )));
    };

    let message = String::from_utf8_lossy(call.read_memory(offset, len)?).into_owned();
    host.log(level_from_i32(level), &message);
    Ok(())
}

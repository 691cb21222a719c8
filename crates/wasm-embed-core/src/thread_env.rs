//! Per-call registration of the calling thread with the engine.

use tracing::debug;

use wasm_embed_common::CallError;

use crate::backend::EngineBackend;

/// Registers the current thread for the duration of one call.
///
/// If the thread was already registered nothing happens on either side;
/// otherwise it is registered on entry and unregistered on drop.
pub(crate) struct ThreadEnvGuard<'a, B: EngineBackend> {
    backend: &'a B,
    registered: bool,
}

impl<'a, B: EngineBackend> ThreadEnvGuard<'a, B> {
    pub(crate) fn enter(backend: &'a B) -> Result<Self, CallError> {
        if backend.thread_env_inited() {
            return Ok(Self {
                backend,
                registered: false,
            });
        }

        if !backend.init_thread_env() {
            return Err(CallError::ThreadEnvFailed);
        }
        debug!(engine = backend.name(), "Thread registered for call");

        Ok(Self {
            backend,
            registered: true,
        })
    }
}

impl<B: EngineBackend> Drop for ThreadEnvGuard<'_, B> {
    fn drop(&mut self) {
        if self.registered {
            self.backend.destroy_thread_env();
        }
    }
}

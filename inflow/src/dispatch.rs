//! Task dispatchers.
//!
//! Every inflow spawns its long-lived work (cache pump, refresh scheduler)
//! and its loader calls onto a dispatcher. By default that is the ambient
//! tokio runtime; callers who want cache reads and loads on dedicated
//! runtimes (e.g. a blocking I/O pool) pass explicit handles through the
//! builder.

use std::future::Future;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A spawn target: an explicit runtime handle, or the ambient runtime.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    handle: Option<Handle>,
}

impl Dispatcher {
    /// Dispatcher bound to an explicit runtime handle.
    pub fn runtime(handle: Handle) -> Self {
        Dispatcher { handle: Some(handle) }
    }

    /// Spawns `future` on this dispatcher.
    ///
    /// Returns `None` when no explicit handle was configured and no
    /// ambient runtime is available; callers with synchronous fallbacks
    /// (stream teardown) handle that case themselves.
    pub(crate) fn spawn<F>(&self, future: F) -> Option<JoinHandle<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        match &self.handle {
            Some(handle) => Some(handle.spawn(future)),
            None => Handle::try_current().ok().map(|handle| handle.spawn(future)),
        }
    }
}

//! Task spawning abstraction.
//!
//! This module provides a [`TaskSpawner`] trait that allows the core library
//! to spawn its background loops (broker, watcher, per-client sessions)
//! without hard-wiring `tokio::spawn` calls throughout the services.

use std::future::Future;

use tokio::task::JoinHandle;

/// Abstraction for spawning background tasks.
///
/// Unlike a fire-and-forget spawner, the returned [`JoinHandle`] lets the
/// composition root await its loops during shutdown.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     spawner: TokioSpawner,
/// }
///
/// impl MyService {
///     fn start_background_work(&self) -> JoinHandle<()> {
///         self.spawner.spawn(async {
///             // Background work here
///         })
///     }
/// }
/// ```
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a background task.
    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static;
}

/// Tokio-based spawner.
///
/// Uses a Tokio runtime handle to spawn tasks.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }
}

//! Application lifecycle abstraction.
//!
//! This module provides:
//! - [`LoopState`], the two states every background loop moves through
//! - [`Lifecycle`], the trait background tasks use to escalate conditions that
//!   should end the process (e.g. the change watcher losing its daemon)
//!
//! Different implementations handle escalation appropriately for their
//! environment (standalone server vs tests or embedding).

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// State of a long-running background loop.
///
/// Loops start `Running` and move to `Stopped` exactly once, either because
/// their cancellation token fired or because they hit a fatal error. There is
/// no way back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum LoopState {
    #[default]
    Running,
    Stopped,
}

impl LoopState {
    /// Returns `true` while the loop is still processing work.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, LoopState::Running)
    }
}

/// Trait for application lifecycle operations.
///
/// Services that detect a condition the process cannot recover from use this
/// trait rather than calling `std::process::exit` directly.
///
/// # Example
///
/// ```ignore
/// struct Watcher {
///     lifecycle: Arc<dyn Lifecycle>,
/// }
///
/// impl Watcher {
///     fn on_connection_lost(&self, err: &DaemonError) {
///         self.lifecycle.request_shutdown(&err.to_string());
///     }
/// }
/// ```
pub trait Lifecycle: Send + Sync {
    /// Requests a process shutdown because of a fatal condition.
    ///
    /// The implementation decides how the shutdown is carried out. Calling
    /// this more than once must be harmless.
    fn request_shutdown(&self, reason: &str);
}

/// Server lifecycle implementation for standalone deployment.
///
/// A shutdown request cancels the root token the server's `main` waits on,
/// so the regular graceful-shutdown path runs. The first reason is retained
/// so `main` can exit with a failure status.
pub struct ServerLifecycle {
    root: CancellationToken,
    fatal: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl ServerLifecycle {
    /// Creates a lifecycle that cancels `root` on shutdown requests.
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            fatal: AtomicBool::new(false),
            reason: Mutex::new(None),
        }
    }

    /// Returns the reason of the first fatal shutdown request, if any.
    pub fn fatal_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Returns `true` if a fatal shutdown was requested.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }
}

impl Lifecycle for ServerLifecycle {
    fn request_shutdown(&self, reason: &str) {
        if !self.fatal.swap(true, Ordering::SeqCst) {
            tracing::error!(reason, "Fatal condition, shutting down");
            *self.reason.lock() = Some(reason.to_string());
        }
        self.root.cancel();
    }
}

/// No-op lifecycle for testing or embedded use.
///
/// Does nothing on shutdown requests. Useful in tests or when embedding the
/// core library in an application that manages its own lifecycle.
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
    fn request_shutdown(&self, reason: &str) {
        tracing::debug!(reason, "Shutdown requested (no-op)");
    }
}

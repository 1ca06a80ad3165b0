//! Stream session tracking and management.
//!
//! This module provides tracking of live stream sessions with force-close capability:
//!
//! - `SessionRegistry`: Tracks all active sessions
//! - `SessionGuard`: RAII guard for automatic cleanup on disconnect

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Per-session bookkeeping.
struct SessionState {
    opened_at: Instant,
}

/// Manages all active stream sessions.
///
/// Thread-safe and designed for concurrent access from multiple
/// session tasks. Uses hierarchical cancellation tokens for
/// efficient force-close of all sessions.
pub struct SessionRegistry {
    /// Active sessions: session_id -> SessionState
    sessions: DashMap<String, SessionState>,
    /// Counter for generating unique session IDs.
    next_id: AtomicU64,
    /// Global cancellation token - when cancelled, all sessions close.
    /// Wrapped in RwLock so it can be replaced after close_all().
    global_cancel: RwLock<CancellationToken>,
    /// Signalled whenever the last session unregisters.
    drained: Notify,
}

impl SessionRegistry {
    /// Creates a new registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
            global_cancel: RwLock::new(CancellationToken::new()),
            drained: Notify::new(),
        }
    }

    /// Registers a new session and returns a guard for RAII cleanup.
    ///
    /// The returned `SessionGuard` will automatically unregister the
    /// session when dropped.
    pub fn register(self: &Arc<Self>) -> SessionGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session_id = format!("sse-{}", id);
        let cancel_token = self.global_cancel.read().child_token();

        self.sessions.insert(
            session_id.clone(),
            SessionState {
                opened_at: Instant::now(),
            },
        );
        log::info!(
            "[SSE] Session registered: {} (total: {})",
            session_id,
            self.sessions.len()
        );

        SessionGuard {
            id: session_id,
            registry: Arc::clone(self),
            cancel_token,
        }
    }

    /// Unregisters a session by ID.
    fn unregister(&self, id: &str) {
        if let Some((_, state)) = self.sessions.remove(id) {
            log::info!(
                "[SSE] Session unregistered: {} after {:?} (remaining: {})",
                id,
                state.opened_at.elapsed(),
                self.sessions.len()
            );
        }
        if self.sessions.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Returns the number of active sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Force-closes all sessions.
    ///
    /// This cancels the global token, which signals all session tasks
    /// to terminate. After cancellation, a fresh token is created
    /// so new sessions can still be accepted.
    ///
    /// Returns the number of sessions that were signaled to close.
    pub fn close_all(&self) -> usize {
        let count = self.sessions.len();
        if count > 0 {
            log::info!("[SSE] Force-closing {} session(s)", count);
            let mut guard = self.global_cancel.write();
            guard.cancel();
            *guard = CancellationToken::new();
        }
        count
    }

    /// Waits until no session is registered.
    pub async fn wait_until_empty(&self) {
        loop {
            let drained = self.drained.notified();
            if self.sessions.is_empty() {
                return;
            }
            drained.await;
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a session when dropped.
///
/// This ensures sessions are always cleaned up, even if the task
/// panics or exits early.
pub struct SessionGuard {
    id: String,
    registry: Arc<SessionRegistry>,
    /// Token for this specific session - cancelled on force-close.
    cancel_token: CancellationToken,
}

impl SessionGuard {
    /// Returns the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the cancellation token for this session.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.unregister(&self.id);
    }
}

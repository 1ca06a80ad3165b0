//! Fixed protocol constants and defaults.
//!
//! Values in the MPD section are defined by the MPD protocol and must not be
//! changed. The remaining values are defaults that [`Config`](crate::Config)
//! can override.

// ─────────────────────────────────────────────────────────────────────────────
// MPD Protocol
// ─────────────────────────────────────────────────────────────────────────────

/// Greeting prefix sent by MPD when a connection is accepted.
pub const MPD_GREETING_PREFIX: &str = "OK MPD ";

/// Line terminating a successful command response.
pub const MPD_OK: &str = "OK";

/// Prefix of an error response line.
pub const MPD_ACK_PREFIX: &str = "ACK ";

/// Subsystem reported by `idle` when playback state or the current song changes.
pub const MPD_SUBSYSTEM_PLAYER: &str = "player";

/// Default MPD address (host:port).
pub const DEFAULT_MPD_ADDR: &str = "localhost:6600";

/// Timeout for establishing a TCP connection to MPD (seconds).
pub const MPD_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Largest cover image accepted from MPD (bytes).
pub const MAX_COVER_BYTES: usize = 32 * 1024 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Event Distribution
// ─────────────────────────────────────────────────────────────────────────────

/// Default per-subscriber mailbox capacity (pending events).
pub const DEFAULT_MAILBOX_CAPACITY: usize = 5;

/// Default number of consecutive recoverable long-poll failures tolerated
/// before the change watcher gives up.
pub const DEFAULT_MAX_IDLE_FAILURES: u32 = 10;

/// Broker command backlog at which a warning is logged.
pub const COMMAND_BACKLOG_WARN: usize = 1024;

/// Reason marker carried by change events emitted by the watcher.
pub const PLAYER_UPDATE_REASON: &str = "player update";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP / SSE
// ─────────────────────────────────────────────────────────────────────────────

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// SSE event name used for change notifications.
///
/// Browsers deliver `message` events to `EventSource.onmessage`.
pub const SSE_EVENT_NAME: &str = "message";

/// Default interval between SSE keep-alive comments (seconds).
pub const DEFAULT_SSE_KEEP_ALIVE_SECS: u64 = 15;

/// Default grace period for in-flight requests on shutdown (seconds).
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "mpdweb";

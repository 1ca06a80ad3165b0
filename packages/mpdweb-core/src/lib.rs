//! mpdweb core - event distribution for an MPD web client.
//!
//! A single background watcher long-polls the music daemon, refreshes the
//! cover of the current song and publishes one change notification per
//! change. The broker fans each notification out to every connected SSE
//! client through a bounded per-client mailbox, so a slow client only ever
//! loses its own events.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`runtime`]: Task spawning abstraction for async runtime independence
//! - [`lifecycle`]: Loop states and fatal-condition escalation
//! - [`daemon`]: Daemon client trait and the MPD implementation
//! - [`artwork`]: Atomic storage of the current cover image
//! - [`events`]: Player events and the event broker
//! - [`services`]: The change watcher
//! - [`session`]: Stream sessions and their registry
//! - [`api`]: HTTP routes (SSE, command proxy, cover, health)
//! - [`bootstrap`]: Composition root and graceful shutdown
//! - [`state`]: Core configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from concrete
//! implementations:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): Spawning background tasks
//! - [`DaemonClient`](daemon::DaemonClient): Talking to the music daemon
//! - [`EventEmitter`](events::EventEmitter): Emitting player events
//! - [`EventSink`](session::EventSink): Writing events to one client
//! - [`Lifecycle`](lifecycle::Lifecycle): Escalating fatal conditions
//!
//! Each trait has default implementations suitable for the standalone server.

#![warn(clippy::all)]

pub mod api;
pub mod artwork;
pub mod bootstrap;
pub mod daemon;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod session;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use artwork::{CoverError, CoverStore};
pub use daemon::{DaemonClient, DaemonError, DaemonReply, DaemonResult, MpdClient};
pub use error::{ErrorCode, MpdWebError, MpdWebResult};
pub use events::{
    BrokerStats, EventBroker, EventEmitter, MailboxStats, PlayerEvent, SubscriberId, Subscription,
};
pub use lifecycle::{Lifecycle, LoopState, NoopLifecycle, ServerLifecycle};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use services::{ChangeWatcher, RefreshError};
pub use session::{EventSink, SessionEnd, SessionGuard, SessionRegistry, SinkClosed, StreamSession};
pub use state::Config;
pub use utils::now_millis;

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices, ShutdownOutcome};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};

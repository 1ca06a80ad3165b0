//! Event system for real-time client communication.
//!
//! This module provides:
//! - [`PlayerEvent`], the change notification delivered to clients
//! - [`EventEmitter`] trait for producers to emit events without knowing the transport
//! - [`EventBroker`], the actor that fans events out to per-client mailboxes
//!
//! Delivery is at-most-once: a client that falls behind misses events rather
//! than slowing anyone else down. Clients treat each event as "re-fetch the
//! current state", not as a complete change log.

mod broker;
mod emitter;

pub use broker::{BrokerStats, EventBroker, MailboxStats, SubscriberId, Subscription};
pub use emitter::EventEmitter;

use serde::Serialize;

use crate::protocol_constants::PLAYER_UPDATE_REASON;
use crate::utils::now_millis;

/// Notification that the daemon's player state changed.
///
/// Events are immutable and carry no identity beyond their content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEvent {
    /// Why the event was emitted (`"player update"` for daemon changes).
    pub reason: String,
    /// Daemon subsystems reported as changed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changed: Vec<String>,
    /// URI of the song current at the time of the change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub song: Option<String>,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
}

impl PlayerEvent {
    /// Creates a bare marker event with the given reason.
    pub fn marker(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            changed: Vec::new(),
            song: None,
            timestamp: now_millis(),
        }
    }

    /// Creates the event the change watcher emits after a refresh.
    pub fn player_update(changed: Vec<String>, song: Option<String>) -> Self {
        Self {
            reason: PLAYER_UPDATE_REASON.to_string(),
            changed,
            song,
            timestamp: now_millis(),
        }
    }
}

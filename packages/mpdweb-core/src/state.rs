//! Core configuration types.
//!
//! This module provides [`Config`], the tunables shared by the broker, the
//! change watcher and the HTTP layer. The server binary builds one from its
//! YAML file and command line and hands it to the bootstrap.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_MAILBOX_CAPACITY, DEFAULT_MAX_IDLE_FAILURES, DEFAULT_SHUTDOWN_GRACE_SECS,
    DEFAULT_SSE_KEEP_ALIVE_SECS,
};

/// Configuration for the event distribution core.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    // Broker
    /// Events a subscriber may have queued before new ones are dropped for it.
    pub mailbox_capacity: usize,

    // Watcher
    /// Consecutive recoverable long-poll failures before the daemon is
    /// considered lost.
    pub max_idle_failures: u32,

    // HTTP
    /// Interval between SSE keep-alive comments (seconds).
    pub sse_keep_alive_secs: u64,

    /// How long shutdown waits for open sessions to finish (seconds).
    pub shutdown_grace_secs: u64,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.mailbox_capacity == 0 {
            return Err("mailbox_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.max_idle_failures == 0 {
            return Err("max_idle_failures must be >= 1".to_string());
        }
        if self.sse_keep_alive_secs == 0 {
            return Err("sse_keep_alive_secs must be >= 1".to_string());
        }
        Ok(())
    }

    /// SSE keep-alive interval.
    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs)
    }

    /// Shutdown grace window.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_idle_failures: DEFAULT_MAX_IDLE_FAILURES,
            sse_keep_alive_secs: DEFAULT_SSE_KEEP_ALIVE_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

//! Application services layer.
//!
//! This module contains the background services that sit between the daemon
//! client and the event broker.

pub mod change_watcher;

pub use change_watcher::{ChangeWatcher, RefreshError};

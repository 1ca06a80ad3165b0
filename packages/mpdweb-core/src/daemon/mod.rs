//! Playback daemon access.
//!
//! The rest of the crate talks to MPD only through the [`DaemonClient`] trait:
//! "send a command, get a reply", "block until something changes" and
//! "download the cover for a song". [`MpdClient`] is the TCP implementation
//! used by the server; tests substitute their own stubs.
//!
//! # Module Structure
//!
//! - `reply` - Key/value reply type returned by commands
//! - `mpd` - `MpdClient`, a minimal MPD line-protocol client

mod mpd;
mod reply;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use mpd::MpdClient;
pub use reply::DaemonReply;

/// Errors that can occur while talking to the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Socket-level failure (connect, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connecting did not complete within the configured timeout.
    #[error("Timed out connecting to {0}")]
    ConnectTimeout(String),

    /// The daemon closed the connection.
    #[error("Connection closed by daemon")]
    ConnectionClosed,

    /// The daemon sent something that does not follow the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The daemon rejected a command (`ACK [code@index] {command} message`).
    #[error("Command '{command}' failed ({code}): {message}")]
    Ack {
        /// MPD error code.
        code: u32,
        /// Command the daemon reported as failing.
        command: String,
        /// Human-readable error text.
        message: String,
    },

    /// A reply did not contain a field the caller requires.
    #[error("Missing field in reply: {0}")]
    MissingField(&'static str),

    /// The caller passed a command that cannot be sent as-is.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

/// Convenient Result alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

/// MPD error code for "no such object".
pub const ACK_ERROR_NO_EXIST: u32 = 50;

impl DaemonError {
    /// Returns true if the connection to the daemon can no longer be used.
    ///
    /// A fatal error from the long-poll means there is nothing left to watch.
    /// Command rejections and missing fields only affect the one request.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            DaemonError::Io(_)
            | DaemonError::ConnectTimeout(_)
            | DaemonError::ConnectionClosed
            | DaemonError::Protocol(_) => true,
            DaemonError::Ack { .. }
            | DaemonError::MissingField(_)
            | DaemonError::InvalidCommand(_) => false,
        }
    }

    /// Returns true if the daemon has nothing for the requested object,
    /// e.g. a song without any artwork.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DaemonError::Ack {
                code: ACK_ERROR_NO_EXIST,
                ..
            } | DaemonError::MissingField(_)
        )
    }
}

/// Synchronous request/reply access to the playback daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Sends a raw command line and returns the daemon's key/value reply.
    ///
    /// # Arguments
    /// * `command` - The command, e.g. `"currentsong"` or `"pause 1"`
    async fn request(&self, command: &str) -> DaemonResult<DaemonReply>;

    /// Blocks until one of `subsystems` changes, returning the changed ones.
    ///
    /// This is the long-poll primitive. It only returns early on error.
    async fn idle(&self, subsystems: &[&str]) -> DaemonResult<Vec<String>>;

    /// Downloads the complete cover image for the song at `uri`.
    async fn download_cover(&self, uri: &str) -> DaemonResult<Bytes>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_fatal() {
        assert!(DaemonError::ConnectionClosed.is_fatal());
        assert!(DaemonError::Protocol("garbage".into()).is_fatal());
        assert!(DaemonError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_fatal());
    }

    #[test]
    fn command_errors_are_recoverable() {
        let ack = DaemonError::Ack {
            code: ACK_ERROR_NO_EXIST,
            command: "albumart".into(),
            message: "No file exists".into(),
        };
        assert!(!ack.is_fatal());
        assert!(!DaemonError::MissingField("file").is_fatal());
        assert!(!DaemonError::InvalidCommand("a\nb".into()).is_fatal());
    }

    #[test]
    fn missing_artwork_is_not_found() {
        let ack = DaemonError::Ack {
            code: ACK_ERROR_NO_EXIST,
            command: "readpicture".into(),
            message: "No file exists".into(),
        };
        assert!(ack.is_not_found());
        assert!(DaemonError::MissingField("binary").is_not_found());
        assert!(!DaemonError::ConnectionClosed.is_not_found());
    }
}

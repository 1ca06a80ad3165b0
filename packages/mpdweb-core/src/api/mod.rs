//! HTTP/SSE API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::artwork::CoverStore;
use crate::daemon::DaemonClient;
use crate::error::{MpdWebError, MpdWebResult};
use crate::events::EventBroker;
use crate::runtime::TokioSpawner;
use crate::session::SessionRegistry;
use crate::state::Config;

pub mod http;
pub mod response;
pub mod sse;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Daemon connection used by the command proxy.
    pub daemon: Arc<dyn DaemonClient>,
    /// Fans player updates out to stream sessions.
    pub broker: EventBroker,
    /// Tracks live SSE sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Current cover image.
    pub covers: Arc<CoverStore>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Spawns one task per stream session.
    pub spawner: TokioSpawner,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    daemon: Option<Arc<dyn DaemonClient>>,
    broker: Option<EventBroker>,
    sessions: Option<Arc<SessionRegistry>>,
    covers: Option<Arc<CoverStore>>,
    config: Option<Arc<Config>>,
    spawner: Option<TokioSpawner>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the daemon client.
    pub fn daemon(mut self, daemon: Arc<dyn DaemonClient>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Sets the event broker.
    pub fn broker(mut self, broker: EventBroker) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Sets the session registry.
    pub fn sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the cover store.
    pub fn covers(mut self, covers: Arc<CoverStore>) -> Self {
        self.covers = Some(covers);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the task spawner.
    pub fn spawner(mut self, spawner: TokioSpawner) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Builds the `AppState`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing field.
    pub fn build(self) -> MpdWebResult<AppState> {
        fn required<T>(value: Option<T>, name: &str) -> MpdWebResult<T> {
            value.ok_or_else(|| MpdWebError::Configuration(format!("{name} is required")))
        }

        Ok(AppState {
            daemon: required(self.daemon, "daemon")?,
            broker: required(self.broker, "broker")?,
            sessions: required(self.sessions, "sessions")?,
            covers: required(self.covers, "covers")?,
            config: required(self.config, "config")?,
            spawner: required(self.spawner, "spawner")?,
        })
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Serves the API on `port` until `shutdown` is cancelled.
///
/// Cancelling `shutdown` stops accepting connections; the future resolves
/// once every open response has finished. Callers bound that wait.
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { port, source })?;

    log::info!("Server listening on http://{}", addr);
    let app = http::create_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled_owned().await })
        .await?;
    log::info!("[Server] HTTP server stopped");
    Ok(())
}

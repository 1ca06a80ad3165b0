//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::artwork::CoverStore;
use crate::daemon::DaemonClient;
use crate::error::{MpdWebError, MpdWebResult};
use crate::events::{EventBroker, EventEmitter};
use crate::lifecycle::Lifecycle;
use crate::runtime::TokioSpawner;
use crate::services::ChangeWatcher;
use crate::session::SessionRegistry;
use crate::state::Config;

/// How a shutdown finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every task and session ended within the grace window.
    Clean,
    /// The grace window ran out; remaining sessions were force-closed.
    TimedOut,
}

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// It's consumed by `AppState` to build the final application state.
pub struct BootstrappedServices {
    /// Daemon connection used by the command proxy.
    pub daemon: Arc<dyn DaemonClient>,
    /// Fans player updates out to stream sessions.
    pub broker: EventBroker,
    /// Long-polls the daemon and publishes player updates.
    pub watcher: Arc<ChangeWatcher>,
    /// Tracks live SSE sessions.
    pub sessions: Arc<SessionRegistry>,
    /// Current cover image.
    pub covers: Arc<CoverStore>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Parent of the broker's and the watcher's cancellation tokens.
    pub cancel_token: CancellationToken,
    broker_task: Mutex<Option<JoinHandle<()>>>,
    watcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl BootstrappedServices {
    /// Builds the API state over these services.
    pub fn app_state(&self) -> AppState {
        AppState {
            daemon: Arc::clone(&self.daemon),
            broker: self.broker.clone(),
            sessions: Arc::clone(&self.sessions),
            covers: Arc::clone(&self.covers),
            config: Arc::clone(&self.config),
            spawner: self.spawner.clone(),
        }
    }

    /// Populates the cover and starts the change watcher.
    ///
    /// A watcher that loses the daemon reports through `lifecycle`.
    pub async fn start_background_tasks(&self, lifecycle: Arc<dyn Lifecycle>) {
        self.watcher.refresh_once().await;
        let task = Arc::clone(&self.watcher).start(&self.spawner, lifecycle);
        *self.watcher_task.lock() = Some(task);
        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown of all services, allowing `grace` to finish.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        self.shutdown_until(Instant::now() + grace).await
    }

    /// Shuts the services down and drains the HTTP server within one `grace`
    /// window shared by both.
    ///
    /// `http_shutdown` is cancelled right after the watcher and the broker are
    /// stopped. `server` is the task running [`start_server`](crate::start_server).
    pub async fn shutdown_with_server(
        &self,
        grace: Duration,
        http_shutdown: &CancellationToken,
        server: JoinHandle<()>,
    ) -> ShutdownOutcome {
        let deadline = Instant::now() + grace;
        let server_closed = async {
            http_shutdown.cancel();
            tokio::time::timeout_at(deadline, server).await.is_ok()
        };

        // `join!` polls in order, so the broker is stopped before the server.
        let (outcome, server_closed) = tokio::join!(self.shutdown_until(deadline), server_closed);

        if !server_closed {
            log::error!("[Bootstrap] HTTP server did not close within {:?}", grace);
            return ShutdownOutcome::TimedOut;
        }
        log::info!("[Bootstrap] HTTP server closed");
        outcome
    }

    /// Initiates graceful shutdown of all services.
    ///
    /// Order: stop the watcher, stop the broker (which closes every session
    /// mailbox), then wait until `deadline` for tasks and sessions to finish.
    /// Sessions still open after that are force-closed. The stored cover is
    /// removed either way.
    pub async fn shutdown_until(&self, deadline: Instant) -> ShutdownOutcome {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.watcher.shutdown();
        self.broker.stop();

        let watcher_task = self.watcher_task.lock().take();
        let broker_task = self.broker_task.lock().take();
        let drained = tokio::time::timeout_at(deadline, async {
            if let Some(task) = watcher_task {
                let _ = task.await;
            }
            if let Some(task) = broker_task {
                let _ = task.await;
            }
            self.sessions.wait_until_empty().await;
        })
        .await;

        let outcome = match drained {
            Ok(()) => ShutdownOutcome::Clean,
            Err(_) => {
                let closed = self.sessions.close_all();
                log::error!(
                    "[Bootstrap] Shutdown grace expired, force-closed {} session(s)",
                    closed
                );
                ShutdownOutcome::TimedOut
            }
        };
        self.cancel_token.cancel();

        if let Err(e) = self.covers.clear().await {
            log::warn!("[Bootstrap] Failed to remove cover file: {}", e);
        }

        log::info!("[Bootstrap] Shutdown complete ({:?})", outcome);
        outcome
    }
}

/// Bootstraps all application services with their dependencies.
///
/// This is the composition root where all services are instantiated and
/// wired together, in dependency order:
///
/// 1. Cancellation token (parent of every background task's token)
/// 2. Event broker (spawned immediately so subscriptions work at once)
/// 3. Change watcher (publishes into the broker)
/// 4. Session registry
///
/// The watcher is not started; call
/// [`BootstrappedServices::start_background_tasks`].
///
/// # Arguments
/// * `config` - Application configuration
/// * `daemon` - Daemon client for the command proxy
/// * `watch_daemon` - Daemon client the watcher long-polls on. The long-poll
///   holds its connection, so this should not be the proxy's connection.
/// * `covers` - Where the current cover is stored
///
/// # Errors
///
/// Returns a configuration error if `config` is invalid.
pub fn bootstrap_services(
    config: Config,
    daemon: Arc<dyn DaemonClient>,
    watch_daemon: Arc<dyn DaemonClient>,
    covers: Arc<CoverStore>,
) -> MpdWebResult<BootstrappedServices> {
    config.validate().map_err(MpdWebError::Configuration)?;
    let config = Arc::new(config);

    // Create task spawner from current runtime
    let spawner = TokioSpawner::current();

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let (broker, broker_task) =
        EventBroker::start(config.mailbox_capacity, &spawner, cancel_token.child_token());

    // The watcher only needs the emitting side of the broker
    let watcher = Arc::new(ChangeWatcher::new(
        watch_daemon,
        Arc::clone(&covers),
        Arc::new(broker.clone()) as Arc<dyn EventEmitter>,
        config.max_idle_failures,
        cancel_token.child_token(),
    ));

    let sessions = Arc::new(SessionRegistry::new());

    Ok(BootstrappedServices {
        daemon,
        broker,
        watcher,
        sessions,
        covers,
        config,
        spawner,
        cancel_token,
        broker_task: Mutex::new(Some(broker_task)),
        watcher_task: Mutex::new(None),
    })
}

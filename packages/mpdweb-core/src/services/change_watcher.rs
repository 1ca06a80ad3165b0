//! Daemon change watcher.
//!
//! Responsibilities:
//! - Long-polling the daemon for `player` subsystem changes
//! - Refreshing the stored cover image for the current song
//! - Publishing one player update per successful refresh
//! - Escalating to the process lifecycle when the daemon is lost

use std::ops::ControlFlow;
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artwork::{CoverError, CoverStore};
use crate::daemon::{DaemonClient, DaemonError};
use crate::events::{EventEmitter, PlayerEvent};
use crate::lifecycle::{Lifecycle, LoopState};
use crate::protocol_constants::MPD_SUBSYSTEM_PLAYER;
use crate::runtime::TaskSpawner;

/// A refresh step failed; the change is not announced.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("daemon: {0}")]
    Daemon(#[from] DaemonError),

    #[error("cover store: {0}")]
    Cover(#[from] CoverError),
}

/// Watches the daemon and turns player changes into [`PlayerEvent`]s.
pub struct ChangeWatcher {
    daemon: Arc<dyn DaemonClient>,
    covers: Arc<CoverStore>,
    /// Sink for player updates, normally the event broker.
    emitter: Arc<dyn EventEmitter>,
    /// Consecutive recoverable long-poll failures tolerated before giving up.
    max_idle_failures: u32,
    cancel_token: CancellationToken,
}

impl ChangeWatcher {
    /// Creates a new ChangeWatcher.
    ///
    /// # Arguments
    /// * `daemon` - Daemon connection used for both long-poll and refresh
    /// * `covers` - Where the current song's cover is stored
    /// * `emitter` - Receives one event per announced change
    /// * `max_idle_failures` - Recoverable long-poll failures tolerated in a row
    /// * `cancel_token` - Stops the watch loop when cancelled
    pub fn new(
        daemon: Arc<dyn DaemonClient>,
        covers: Arc<CoverStore>,
        emitter: Arc<dyn EventEmitter>,
        max_idle_failures: u32,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            daemon,
            covers,
            emitter,
            max_idle_failures: max_idle_failures.max(1),
            cancel_token,
        }
    }

    /// Stores the cover of the current song.
    ///
    /// Returns the song URI, or `None` when nothing is queued. A song without
    /// any embedded or folder artwork clears the stored cover; any other
    /// failure leaves the previous cover in place and is returned.
    pub async fn refresh_cover(&self) -> Result<Option<String>, RefreshError> {
        let song = self.daemon.request("currentsong").await?;
        let Some(uri) = song.get("file") else {
            log::debug!("[Watcher] No current song, clearing cover");
            self.covers.clear().await?;
            return Ok(None);
        };

        match self.daemon.download_cover(uri).await {
            Ok(image) => {
                self.covers.replace(&image).await?;
                log::debug!("[Watcher] Stored {} byte cover for {}", image.len(), uri);
            }
            Err(e) if e.is_not_found() => {
                log::debug!("[Watcher] No artwork for {}, clearing cover", uri);
                self.covers.clear().await?;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(uri.to_string()))
    }

    /// Refreshes the cover once without announcing anything.
    ///
    /// Used at startup so `/cover` is populated before the first change.
    pub async fn refresh_once(&self) {
        if let Err(e) = self.refresh_cover().await {
            log::warn!("[Watcher] Initial cover refresh failed: {}", e);
        }
    }

    /// Runs the watch loop until cancelled or the daemon is lost.
    ///
    /// Returns `Ok(())` on cancellation and the last long-poll error when the
    /// daemon can no longer be watched.
    pub async fn run(&self) -> Result<(), DaemonError> {
        log::info!("[Watcher] Watching daemon for player changes");
        let mut state = LoopState::Running;
        let mut failures = 0u32;
        let mut outcome = Ok(());

        while state.is_running() {
            if let ControlFlow::Break(result) = self.step(&mut failures).await {
                outcome = result;
                state = LoopState::Stopped;
            }
        }

        match &outcome {
            Ok(()) => log::info!("[Watcher] Shutting down watch loop"),
            Err(e) => log::error!("[Watcher] Giving up on daemon: {}", e),
        }
        outcome
    }

    /// One long-poll plus refresh.
    async fn step(&self, failures: &mut u32) -> ControlFlow<Result<(), DaemonError>> {
        let polled = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return ControlFlow::Break(Ok(())),
            polled = self.daemon.idle(&[MPD_SUBSYSTEM_PLAYER]) => polled,
        };

        let changed = match polled {
            Ok(changed) => {
                *failures = 0;
                changed
            }
            Err(e) if e.is_fatal() => return ControlFlow::Break(Err(e)),
            Err(e) => {
                *failures += 1;
                log::warn!(
                    "[Watcher] Long-poll failed ({}/{}): {}",
                    failures,
                    self.max_idle_failures,
                    e
                );
                if *failures >= self.max_idle_failures {
                    return ControlFlow::Break(Err(e));
                }
                return ControlFlow::Continue(());
            }
        };

        // A stop that raced the long-poll wins over the refresh.
        if self.cancel_token.is_cancelled() {
            return ControlFlow::Break(Ok(()));
        }

        match self.refresh_cover().await {
            // Stopped while refreshing: the change is not announced.
            Ok(_) if self.cancel_token.is_cancelled() => {
                return ControlFlow::Break(Ok(()));
            }
            Ok(song) => {
                log::debug!("[Watcher] Player changed: {:?} (song: {:?})", changed, song);
                self.emitter
                    .emit_player(PlayerEvent::player_update(changed, song));
            }
            Err(e) => {
                log::warn!("[Watcher] Cover refresh failed, change not announced: {}", e);
            }
        }
        ControlFlow::Continue(())
    }

    /// Starts the watch loop as a background task.
    ///
    /// A loop that ends with an error asks `lifecycle` to shut the process
    /// down; there is no way to keep serving events without the daemon.
    pub fn start(
        self: Arc<Self>,
        spawner: &impl TaskSpawner,
        lifecycle: Arc<dyn Lifecycle>,
    ) -> JoinHandle<()> {
        spawner.spawn(async move {
            if let Err(e) = self.run().await {
                lifecycle.request_shutdown(&format!("lost connection to the daemon: {e}"));
            }
        })
    }

    /// Stops the watch loop.
    pub fn shutdown(&self) {
        log::info!("[Watcher] Initiating shutdown");
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonReply, DaemonResult, ACK_ERROR_NO_EXIST};
    use crate::runtime::TokioSpawner;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Daemon that replays scripted long-poll and download results.
    ///
    /// Once the long-poll script runs out, `idle` blocks forever.
    #[derive(Default)]
    struct StubDaemon {
        idles: Mutex<VecDeque<DaemonResult<Vec<String>>>>,
        downloads: Mutex<VecDeque<DaemonResult<Bytes>>>,
        song: Option<String>,
        idle_calls: AtomicUsize,
        /// Cancelled from inside `download_cover`, as if a stop arrived mid-refresh.
        stop_during_download: Mutex<Option<CancellationToken>>,
    }

    impl StubDaemon {
        fn new(song: Option<&str>) -> Self {
            Self {
                song: song.map(String::from),
                ..Default::default()
            }
        }

        fn with_idle(self, result: DaemonResult<Vec<String>>) -> Self {
            self.idles.lock().push_back(result);
            self
        }

        fn with_download(self, result: DaemonResult<Bytes>) -> Self {
            self.downloads.lock().push_back(result);
            self
        }
    }

    #[async_trait]
    impl DaemonClient for StubDaemon {
        async fn request(&self, command: &str) -> DaemonResult<DaemonReply> {
            assert_eq!(command, "currentsong");
            let pairs = self
                .song
                .iter()
                .map(|uri| ("file".to_string(), uri.clone()))
                .collect();
            Ok(DaemonReply::new(pairs))
        }

        async fn idle(&self, subsystems: &[&str]) -> DaemonResult<Vec<String>> {
            assert_eq!(subsystems, [MPD_SUBSYSTEM_PLAYER]);
            self.idle_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.idles.lock().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        async fn download_cover(&self, _uri: &str) -> DaemonResult<Bytes> {
            if let Some(token) = self.stop_during_download.lock().take() {
                token.cancel();
            }
            self.downloads
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(Bytes::from_static(b"cover")))
        }
    }

    struct ChannelEmitter(mpsc::UnboundedSender<PlayerEvent>);

    impl EventEmitter for ChannelEmitter {
        fn emit_player(&self, event: PlayerEvent) {
            let _ = self.0.send(event);
        }
    }

    #[derive(Default)]
    struct RecordingLifecycle {
        reasons: Mutex<Vec<String>>,
    }

    impl Lifecycle for RecordingLifecycle {
        fn request_shutdown(&self, reason: &str) {
            self.reasons.lock().push(reason.to_string());
        }
    }

    fn changed() -> DaemonResult<Vec<String>> {
        Ok(vec!["player".to_string()])
    }

    fn ack(code: u32) -> DaemonError {
        DaemonError::Ack {
            code,
            command: "idle".into(),
            message: "nope".into(),
        }
    }

    struct Harness {
        watcher: Arc<ChangeWatcher>,
        daemon: Arc<StubDaemon>,
        events: mpsc::UnboundedReceiver<PlayerEvent>,
        covers: Arc<CoverStore>,
        _dir: tempfile::TempDir,
    }

    fn harness(daemon: StubDaemon, max_idle_failures: u32) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let covers = Arc::new(CoverStore::new(dir.path().join("cover")));
        let daemon = Arc::new(daemon);
        let (tx, events) = mpsc::unbounded_channel();
        let watcher = Arc::new(ChangeWatcher::new(
            Arc::clone(&daemon) as Arc<dyn DaemonClient>,
            Arc::clone(&covers),
            Arc::new(ChannelEmitter(tx)),
            max_idle_failures,
            CancellationToken::new(),
        ));
        Harness {
            watcher,
            daemon,
            events,
            covers,
            _dir: dir,
        }
    }

    async fn within<F: std::future::Future>(fut: F) -> F::Output {
        tokio::time::timeout(Duration::from_secs(1), fut)
            .await
            .expect("timed out")
    }

    #[tokio::test]
    async fn publishes_after_refresh_and_stores_cover() {
        let mut h = harness(
            StubDaemon::new(Some("a.flac"))
                .with_idle(changed())
                .with_download(Ok(Bytes::from_static(b"\x89PNG"))),
            10,
        );
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        let event = within(h.events.recv()).await.unwrap();
        assert_eq!(event.reason, "player update");
        assert_eq!(event.changed, vec!["player".to_string()]);
        assert_eq!(event.song.as_deref(), Some("a.flac"));
        assert_eq!(
            h.covers.read().await.unwrap().as_deref(),
            Some(&b"\x89PNG"[..])
        );

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn recovers_from_one_failed_long_poll() {
        let mut h = harness(
            StubDaemon::new(Some("a.flac")).with_idle(Err(ack(5))).with_idle(changed()),
            10,
        );
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        within(h.events.recv()).await.unwrap();
        assert_eq!(h.daemon.idle_calls.load(Ordering::SeqCst), 3);

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn fatal_long_poll_error_ends_loop_and_escalates() {
        let h = harness(
            StubDaemon::new(Some("a.flac")).with_idle(Err(DaemonError::ConnectionClosed)),
            10,
        );
        let lifecycle = Arc::new(RecordingLifecycle::default());

        let task = Arc::clone(&h.watcher).start(
            &TokioSpawner::current(),
            Arc::clone(&lifecycle) as Arc<dyn Lifecycle>,
        );
        within(task).await.unwrap();

        let reasons = lifecycle.reasons.lock();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("Connection closed"));
    }

    #[tokio::test]
    async fn repeated_recoverable_failures_escalate() {
        let daemon = (0..3).fold(StubDaemon::new(None), |d, _| d.with_idle(Err(ack(5))));
        let h = harness(daemon, 3);

        let result = within(h.watcher.run()).await;

        assert!(matches!(result, Err(DaemonError::Ack { code: 5, .. })));
        assert_eq!(h.daemon.idle_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn failed_download_suppresses_only_that_event() {
        let mut h = harness(
            StubDaemon::new(Some("a.flac"))
                .with_idle(changed())
                .with_idle(changed())
                .with_download(Err(DaemonError::Protocol("garbled".into())))
                .with_download(Ok(Bytes::from_static(b"GIF89a"))),
            10,
        );
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        within(h.events.recv()).await.unwrap();
        // Both long-polls completed, the third is blocked.
        assert_eq!(h.daemon.idle_calls.load(Ordering::SeqCst), 3);
        assert!(h.events.try_recv().is_err());
        assert_eq!(
            h.covers.read().await.unwrap().as_deref(),
            Some(&b"GIF89a"[..])
        );

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn missing_artwork_clears_cover_and_still_publishes() {
        let mut h = harness(
            StubDaemon::new(Some("b.flac"))
                .with_idle(changed())
                .with_download(Err(ack(ACK_ERROR_NO_EXIST))),
            10,
        );
        h.covers.replace(b"stale").await.unwrap();
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        let event = within(h.events.recv()).await.unwrap();
        assert_eq!(event.song.as_deref(), Some("b.flac"));
        assert!(h.covers.read().await.unwrap().is_none());

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn empty_picture_reply_counts_as_missing_artwork() {
        let mut h = harness(
            StubDaemon::new(Some("c.flac"))
                .with_idle(changed())
                .with_download(Err(DaemonError::MissingField("binary"))),
            10,
        );
        h.covers.replace(b"stale").await.unwrap();
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        let event = within(h.events.recv()).await.unwrap();
        assert_eq!(event.song.as_deref(), Some("c.flac"));
        assert!(h.covers.read().await.unwrap().is_none());

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn empty_queue_clears_cover_and_publishes_without_song() {
        let mut h = harness(StubDaemon::new(None).with_idle(changed()), 10);
        h.covers.replace(b"stale").await.unwrap();
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });

        let event = within(h.events.recv()).await.unwrap();
        assert!(event.song.is_none());
        assert!(h.covers.read().await.unwrap().is_none());

        h.watcher.shutdown();
        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_interrupts_blocked_long_poll() {
        let h = harness(StubDaemon::new(None), 10);
        let run = tokio::spawn({
            let watcher = Arc::clone(&h.watcher);
            async move { watcher.run().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!run.is_finished());

        h.watcher.shutdown();

        assert!(within(run).await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn stop_during_refresh_suppresses_publish() {
        let mut h = harness(StubDaemon::new(Some("d.flac")).with_idle(changed()), 10);
        *h.daemon.stop_during_download.lock() = Some(h.watcher.cancel_token.clone());

        let result = within(h.watcher.run()).await;

        assert!(result.is_ok());
        assert_eq!(h.daemon.idle_calls.load(Ordering::SeqCst), 1);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_once_populates_cover_without_publishing() {
        let mut h = harness(StubDaemon::new(Some("c.flac")), 10);

        h.watcher.refresh_once().await;

        assert_eq!(
            h.covers.read().await.unwrap().as_deref(),
            Some(&b"cover"[..])
        );
        assert!(h.events.try_recv().is_err());
    }
}

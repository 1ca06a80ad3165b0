//! Actor-style event broker.
//!
//! A single task owns the subscriber set. Every operation that touches it
//! (subscribe, unsubscribe, publish, stats) is a message on one unbounded
//! command channel, so the set is never read or written from two call paths
//! and no lock is needed. Callers never await the broker except for
//! [`EventBroker::stats`].
//!
//! Each subscriber gets a bounded mailbox. Fan-out uses `try_send`: when a
//! mailbox is full the *new* event is dropped for that subscriber only
//! (drop-newest) and its drop counter is incremented. The publisher and the
//! other subscribers are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::emitter::EventEmitter;
use super::PlayerEvent;
use crate::lifecycle::LoopState;
use crate::protocol_constants::COMMAND_BACKLOG_WARN;
use crate::runtime::TaskSpawner;

/// Identifier assigned to each subscription. Never reused.
pub type SubscriberId = u64;

enum BrokerCommand {
    Register {
        id: SubscriberId,
        mailbox: mpsc::Sender<PlayerEvent>,
    },
    Unregister {
        id: SubscriberId,
    },
    Publish(PlayerEvent),
    Stats(oneshot::Sender<BrokerStats>),
}

/// Occupancy and counters for one subscriber mailbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailboxStats {
    pub id: SubscriberId,
    /// Events waiting to be read.
    pub pending: usize,
    pub capacity: usize,
    pub delivered: u64,
    /// Events discarded because the mailbox was full.
    pub dropped: u64,
}

/// Snapshot of broker state, for spotting chronic backpressure.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub subscribers: usize,
    /// Commands waiting in the broker's queue when the snapshot was taken.
    pub queued: usize,
    /// Deepest command backlog seen since start.
    pub peak_queued: usize,
    pub registered: u64,
    pub unregistered: u64,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub mailboxes: Vec<MailboxStats>,
}

struct Mailbox {
    tx: mpsc::Sender<PlayerEvent>,
    delivered: u64,
    dropped: u64,
}

struct BrokerInner {
    tx: mpsc::UnboundedSender<BrokerCommand>,
    next_id: AtomicU64,
    capacity: usize,
    cancel: CancellationToken,
}

/// Handle to the broker task.
///
/// Cheap to clone; all clones talk to the same task.
#[derive(Clone)]
pub struct EventBroker {
    inner: Arc<BrokerInner>,
}

impl EventBroker {
    /// Creates a broker handle and the task that serves it.
    ///
    /// The task does nothing until [`BrokerTask::run`] is polled; most callers
    /// want [`EventBroker::start`] instead.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (`mpsc::channel` rejects it).
    pub fn new(capacity: usize, cancel: CancellationToken) -> (Self, BrokerTask) {
        assert!(capacity > 0, "mailbox capacity must be >= 1");
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = Self {
            inner: Arc::new(BrokerInner {
                tx,
                next_id: AtomicU64::new(1),
                capacity,
                cancel: cancel.clone(),
            }),
        };
        let task = BrokerTask {
            rx,
            cancel,
            capacity,
            state: LoopState::Running,
            subscribers: HashMap::new(),
            stats: BrokerStats::default(),
        };
        (broker, task)
    }

    /// Creates a broker and spawns its task.
    pub fn start(
        capacity: usize,
        spawner: &impl TaskSpawner,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (broker, task) = Self::new(capacity, cancel);
        let handle = spawner.spawn(task.run());
        (broker, handle)
    }

    /// Registers a new subscriber and returns its handle.
    ///
    /// Registration is processed by the broker task, in order with every
    /// other command. After [`stop`](Self::stop) the returned subscription is
    /// already closed.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        // On failure the command (and with it the only sender) is dropped,
        // which leaves `rx` closed.
        if self
            .inner
            .tx
            .send(BrokerCommand::Register { id, mailbox: tx })
            .is_err()
        {
            log::debug!("[Broker] Subscribe after stop, returning closed subscription");
        }
        Subscription {
            id,
            rx,
            stopped: self.inner.cancel.child_token(),
            broker: self.clone(),
            released: false,
        }
    }

    /// Removes a subscriber. Unknown ids and calls after stop are ignored.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.inner.tx.send(BrokerCommand::Unregister { id });
    }

    /// Queues `event` for fan-out to every current subscriber. Never blocks.
    pub fn publish(&self, event: PlayerEvent) {
        if self.inner.tx.send(BrokerCommand::Publish(event)).is_err() {
            log::trace!("[Broker] Publish after stop ignored");
        }
    }

    /// Returns a snapshot of broker state, or `None` once the broker stopped.
    pub async fn stats(&self) -> Option<BrokerStats> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner.tx.send(BrokerCommand::Stats(reply_tx)).ok()?;
        reply_rx.await.ok()
    }

    /// Stops the broker task. Every live subscription observes a close.
    ///
    /// Safe to call more than once and from any context.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

impl EventEmitter for EventBroker {
    fn emit_player(&self, event: PlayerEvent) {
        self.publish(event);
    }
}

/// The broker's serialized control loop. Sole owner of the subscriber set.
pub struct BrokerTask {
    rx: mpsc::UnboundedReceiver<BrokerCommand>,
    cancel: CancellationToken,
    capacity: usize,
    state: LoopState,
    subscribers: HashMap<SubscriberId, Mailbox>,
    stats: BrokerStats,
}

impl BrokerTask {
    /// Processes commands until the broker is stopped or every handle is gone.
    pub async fn run(mut self) {
        log::info!("[Broker] Started (mailbox capacity {})", self.capacity);

        while self.state.is_running() {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                command = self.rx.recv() => command,
            };
            match command {
                Some(command) => {
                    self.track_backlog();
                    self.handle(command);
                }
                None => self.state = LoopState::Stopped,
            }
        }

        // Dropping the senders is the close signal for every subscriber.
        let closed = self.subscribers.len();
        self.subscribers.clear();
        self.rx.close();
        log::info!(
            "[Broker] Stopped, closed {} subscriber(s) (published: {}, dropped: {})",
            closed,
            self.stats.published,
            self.stats.dropped
        );
    }

    fn track_backlog(&mut self) {
        let depth = self.rx.len();
        if depth <= self.stats.peak_queued {
            return;
        }
        if depth >= COMMAND_BACKLOG_WARN && self.stats.peak_queued < COMMAND_BACKLOG_WARN {
            log::warn!("[Broker] Command backlog reached {} and is growing", depth);
        }
        self.stats.peak_queued = depth;
    }

    fn handle(&mut self, command: BrokerCommand) {
        match command {
            BrokerCommand::Register { id, mailbox } => self.register(id, mailbox),
            BrokerCommand::Unregister { id } => self.unregister(id),
            BrokerCommand::Publish(event) => self.publish(event),
            BrokerCommand::Stats(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn register(&mut self, id: SubscriberId, tx: mpsc::Sender<PlayerEvent>) {
        if self.subscribers.contains_key(&id) {
            log::warn!("[Broker] Subscriber {} already registered, ignoring", id);
            return;
        }
        self.subscribers.insert(
            id,
            Mailbox {
                tx,
                delivered: 0,
                dropped: 0,
            },
        );
        self.stats.registered += 1;
        log::debug!(
            "[Broker] Subscriber {} registered (total: {})",
            id,
            self.subscribers.len()
        );
    }

    fn unregister(&mut self, id: SubscriberId) {
        if let Some(mailbox) = self.subscribers.remove(&id) {
            self.stats.unregistered += 1;
            log::debug!(
                "[Broker] Subscriber {} unregistered (delivered: {}, dropped: {}, remaining: {})",
                id,
                mailbox.delivered,
                mailbox.dropped,
                self.subscribers.len()
            );
        }
    }

    fn publish(&mut self, event: PlayerEvent) {
        self.stats.published += 1;
        let mut gone = Vec::new();

        for (id, mailbox) in self.subscribers.iter_mut() {
            match mailbox.tx.try_send(event.clone()) {
                Ok(()) => {
                    mailbox.delivered += 1;
                    self.stats.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    mailbox.dropped += 1;
                    self.stats.dropped += 1;
                    log::trace!(
                        "[Broker] Mailbox {} full, dropped event ({} dropped so far)",
                        id,
                        mailbox.dropped
                    );
                }
                Err(TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        // Receiver dropped without unsubscribing first; its Unregister is
        // still on the way and will be a no-op.
        for id in gone {
            if self.subscribers.remove(&id).is_some() {
                self.stats.unregistered += 1;
                log::debug!("[Broker] Pruned closed subscriber {}", id);
            }
        }
    }

    fn snapshot(&self) -> BrokerStats {
        let mut mailboxes: Vec<MailboxStats> = self
            .subscribers
            .iter()
            .map(|(id, mailbox)| MailboxStats {
                id: *id,
                pending: mailbox.tx.max_capacity() - mailbox.tx.capacity(),
                capacity: mailbox.tx.max_capacity(),
                delivered: mailbox.delivered,
                dropped: mailbox.dropped,
            })
            .collect();
        mailboxes.sort_by_key(|m| m.id);

        BrokerStats {
            subscribers: self.subscribers.len(),
            queued: self.rx.len(),
            mailboxes,
            ..self.stats.clone()
        }
    }
}

/// A registered subscriber: the receiving end of one mailbox.
///
/// Unsubscribes exactly once, either through [`unsubscribe`](Self::unsubscribe)
/// or on drop, whichever comes first. This makes the subscription a scoped
/// resource: every exit path of its owner releases it, including panics.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<PlayerEvent>,
    stopped: CancellationToken,
    broker: EventBroker,
    released: bool,
}

impl Subscription {
    /// Returns the subscriber id.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the broker closed the
    /// mailbox (stop) and every queued event has been read.
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        self.rx.recv().await
    }

    /// Returns a queued event without waiting.
    pub fn try_recv(&mut self) -> Option<PlayerEvent> {
        self.rx.try_recv().ok()
    }

    /// Resolves once the broker has been stopped.
    ///
    /// Unlike [`recv`](Self::recv) this does not need the mailbox, so an owner
    /// busy with a previous event can still race it.
    pub async fn closed(&self) {
        self.stopped.cancelled().await
    }

    /// Unregisters from the broker. Further calls do nothing.
    pub fn unsubscribe(&mut self) {
        if !self.released {
            self.released = true;
            self.broker.unsubscribe(self.id);
        }
    }

    /// Returns `true` once this subscription has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use std::time::Duration;

    const CAPACITY: usize = 5;

    fn start_broker() -> (EventBroker, JoinHandle<()>) {
        EventBroker::start(CAPACITY, &TokioSpawner::current(), CancellationToken::new())
    }

    fn event(reason: &str) -> PlayerEvent {
        PlayerEvent::marker(reason)
    }

    async fn recv_within(sub: &mut Subscription) -> Option<PlayerEvent> {
        tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for mailbox")
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber_once() {
        let (broker, _task) = start_broker();
        let mut subs: Vec<_> = (0..3).map(|_| broker.subscribe()).collect();

        broker.publish(event("update"));
        broker.stats().await.unwrap();

        for sub in &mut subs {
            assert_eq!(sub.try_recv().map(|e| e.reason).as_deref(), Some("update"));
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let (broker, _task) = start_broker();
        let mut sub = broker.subscribe();

        for reason in ["a", "b", "c"] {
            broker.publish(event(reason));
        }

        for expected in ["a", "b", "c"] {
            assert_eq!(recv_within(&mut sub).await.unwrap().reason, expected);
        }
    }

    #[tokio::test]
    async fn full_mailbox_keeps_oldest_and_drops_newest() {
        let (broker, _task) = start_broker();
        let mut sub = broker.subscribe();

        for i in 0..6 {
            broker.publish(event(&format!("e{i}")));
        }
        let stats = broker.stats().await.unwrap();

        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.mailboxes[0].pending, CAPACITY);
        assert_eq!(stats.mailboxes[0].dropped, 1);
        let held: Vec<_> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| e.reason)
            .collect();
        assert_eq!(held, ["e0", "e1", "e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_delay_others() {
        let (broker, _task) = start_broker();
        let _stalled = broker.subscribe();
        let mut active = broker.subscribe();

        for i in 0..20 {
            broker.publish(event(&format!("e{i}")));
            let received = recv_within(&mut active).await.unwrap();
            assert_eq!(received.reason, format!("e{i}"));
        }

        let stats = broker.stats().await.unwrap();
        assert_eq!(stats.published, 20);
        assert_eq!(stats.dropped, 20 - CAPACITY as u64);
    }

    #[tokio::test]
    async fn unsubscribe_twice_is_a_noop() {
        let (broker, _task) = start_broker();
        let mut sub = broker.subscribe();
        let id = sub.id();

        sub.unsubscribe();
        sub.unsubscribe();
        broker.unsubscribe(id);
        let stats = broker.stats().await.unwrap();

        assert!(sub.is_released());
        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.unregistered, 1);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unregisters_it() {
        let (broker, _task) = start_broker();
        let sub = broker.subscribe();

        drop(sub);
        let stats = broker.stats().await.unwrap();

        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.unregistered, 1);
    }

    #[tokio::test]
    async fn stop_closes_every_subscription() {
        let (broker, task) = start_broker();
        let mut subs: Vec<_> = (0..3).map(|_| broker.subscribe()).collect();
        broker.stats().await.unwrap();

        broker.stop();

        for sub in &mut subs {
            assert!(recv_within(sub).await.is_none());
        }
        task.await.unwrap();
        assert!(broker.is_stopped());
    }

    #[tokio::test]
    async fn closed_resolves_on_stop_with_events_still_queued() {
        let (broker, _task) = start_broker();
        let sub = broker.subscribe();
        broker.publish(event("queued"));
        broker.stats().await.unwrap();

        broker.stop();

        tokio::time::timeout(Duration::from_secs(1), sub.closed())
            .await
            .expect("stop not observed");
        assert!(broker.subscribe().stopped.is_cancelled());
    }

    #[tokio::test]
    async fn calls_after_stop_do_not_panic() {
        let (broker, task) = start_broker();
        let mut sub = broker.subscribe();
        broker.stop();
        broker.stop();
        task.await.unwrap();

        sub.unsubscribe();
        sub.unsubscribe();
        broker.unsubscribe(sub.id());
        broker.publish(event("late"));

        assert!(broker.stats().await.is_none());
        assert!(recv_within(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_stop_is_closed() {
        let (broker, task) = start_broker();
        broker.stop();
        task.await.unwrap();

        let mut sub = broker.subscribe();

        assert!(recv_within(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn receiver_gone_is_pruned_on_publish() {
        // Queue everything before the task runs so the publish is processed
        // after the receiver is gone but before its Unregister.
        let (broker, task) = EventBroker::new(CAPACITY, CancellationToken::new());
        let sub = broker.subscribe();
        broker.publish(event("x"));
        drop(sub);
        let handle = tokio::spawn(task.run());

        let stats = broker.stats().await.unwrap();

        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.unregistered, 1);
        broker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn stats_report_command_backlog() {
        let (broker, task) = EventBroker::new(CAPACITY, CancellationToken::new());
        for i in 0..10 {
            broker.publish(event(&format!("e{i}")));
        }
        let handle = tokio::spawn(task.run());

        // Ten publishes and the stats request were queued before the task ran.
        let stats = broker.stats().await.unwrap();

        assert_eq!(stats.peak_queued, 10);
        assert_eq!(stats.queued, 0);
        broker.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn broker_is_an_event_emitter() {
        let (broker, _task) = start_broker();
        let mut sub = broker.subscribe();
        let emitter: Arc<dyn EventEmitter> = Arc::new(broker.clone());

        emitter.emit_player(event("via trait"));

        assert_eq!(recv_within(&mut sub).await.unwrap().reason, "via trait");
    }
}

//! Stream sessions: one broker subscription bound to one client connection.
//!
//! A [`StreamSession`] acquires a broker [`Subscription`] and a
//! [`SessionGuard`] when it is opened and forwards every mailbox event to an
//! [`EventSink`] until the mailbox closes (broker stopped), the peer goes away,
//! or the session is force-closed. Both resources release on drop, so the
//! broker sees exactly one unsubscribe per session on every exit path.

mod registry;

pub use registry::{SessionGuard, SessionRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::events::{EventBroker, PlayerEvent, Subscription};

/// The peer behind a sink is gone.
#[derive(Debug, Error)]
#[error("Peer disconnected")]
pub struct SinkClosed;

/// Outbound transport of one session, in the transport's own framing.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Writes one event. An error means the peer disconnected.
    async fn send(&mut self, event: &PlayerEvent) -> Result<(), SinkClosed>;

    /// Resolves once the peer is known to be gone.
    ///
    /// Lets an idle session notice a disconnect without waiting for the next
    /// event. Transports that cannot tell never resolve.
    async fn closed(&self) {
        std::future::pending::<()>().await
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEnd {
    /// The broker stopped and closed the mailbox.
    BrokerClosed,
    /// The transport reported the peer gone.
    PeerDisconnected,
    /// The session was force-closed through the registry.
    Cancelled,
}

/// One client's stream session.
pub struct StreamSession<S: EventSink> {
    guard: SessionGuard,
    subscription: Subscription,
    sink: S,
}

impl<S: EventSink> StreamSession<S> {
    /// Registers the session and subscribes it to the broker.
    pub fn open(registry: &Arc<SessionRegistry>, broker: &EventBroker, sink: S) -> Self {
        let guard = registry.register();
        let subscription = broker.subscribe();
        log::debug!(
            "[SSE] Session {} subscribed as {}",
            guard.id(),
            subscription.id()
        );
        Self {
            guard,
            subscription,
            sink,
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &str {
        self.guard.id()
    }

    /// Forwards events until the session ends, then releases the subscription.
    pub async fn run(mut self) -> SessionEnd {
        let cancel = self.guard.cancel_token().clone();

        let end = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = self.sink.closed() => break SessionEnd::PeerDisconnected,
                event = self.subscription.recv() => event,
            };
            let Some(event) = event else {
                break SessionEnd::BrokerClosed;
            };
            // A stalled peer must not hold the session past a broker stop.
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = self.subscription.closed() => break SessionEnd::BrokerClosed,
                sent = self.sink.send(&event) => sent,
            };
            if sent.is_err() {
                break SessionEnd::PeerDisconnected;
            }
        };

        self.subscription.unsubscribe();
        log::info!("[SSE] Session {} ended: {:?}", self.guard.id(), end);
        end
    }
}

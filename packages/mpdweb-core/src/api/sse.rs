//! Server-sent events transport for stream sessions.
//!
//! Each `/sse` request opens a [`StreamSession`] running in its own task. The
//! session writes into a capacity-1 channel whose receiver is the response
//! body, so a slow client holds back only its own session. When the client
//! goes away axum drops the body, the channel closes and the session ends.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::api::AppState;
use crate::events::PlayerEvent;
use crate::protocol_constants::SSE_EVENT_NAME;
use crate::runtime::TaskSpawner;
use crate::session::{EventSink, SinkClosed, StreamSession};

/// Frames written to one SSE response body.
type SseFrame = Result<Event, Infallible>;

/// [`EventSink`] that frames events as SSE `message` events.
pub struct SseSink {
    tx: mpsc::Sender<SseFrame>,
}

impl SseSink {
    /// Creates a sink and the stream to use as the response body.
    pub fn channel() -> (Self, ReceiverStream<SseFrame>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, ReceiverStream::new(rx))
    }
}

#[async_trait]
impl EventSink for SseSink {
    async fn send(&mut self, event: &PlayerEvent) -> Result<(), SinkClosed> {
        let frame = match Event::default().event(SSE_EVENT_NAME).json_data(event) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[SSE] Failed to encode event, skipping: {}", e);
                return Ok(());
            }
        };
        self.tx.send(Ok(frame)).await.map_err(|_| SinkClosed)
    }

    async fn closed(&self) {
        self.tx.closed().await
    }
}

/// `GET /sse`: streams player updates until the client or the server goes away.
pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = SseFrame>> {
    let (sink, body) = SseSink::channel();
    let session = StreamSession::open(&state.sessions, &state.broker, sink);
    log::info!("[SSE] Client connected: {}", session.id());
    state.spawner.spawn(session.run());

    Sse::new(body).keep_alive(KeepAlive::new().interval(state.config.sse_keep_alive()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn frames_events_and_reports_dropped_body() {
        let (mut sink, mut body) = SseSink::channel();

        sink.send(&PlayerEvent::marker("player update")).await.unwrap();
        assert!(body.next().await.unwrap().is_ok());

        drop(body);
        sink.closed().await;
        assert!(sink.send(&PlayerEvent::marker("late")).await.is_err());
    }
}

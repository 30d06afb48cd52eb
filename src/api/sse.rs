//! Server-Sent Events support

use super::types::ReadyEvent;
use crate::router::OutboundEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert a target's broadcast receiver into an SSE stream
pub fn sse_stream(
    ready: ReadyEvent,
    receiver: broadcast::Receiver<OutboundEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(event_stream(ready, receiver)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// The `ready` event followed by every event sent to the target. A reader
/// that lags has lost events, possibly a terminal one, so its stream ends
/// there; the frontend reconnects and reloads state.
fn event_stream(
    ready: ReadyEvent,
    receiver: broadcast::Receiver<OutboundEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let target = ready.target.clone();
    let init = futures::stream::once(async move { Ok(json_event("ready", &ready)) });

    let events = BroadcastStream::new(receiver).map_while(move |result| match result {
        Ok(event) => Some(Ok(json_event(event.action(), &event))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(target_id = %target, skipped, "Event stream lagged, closing it");
            None
        }
    });

    init.chain(events)
}

fn json_event<T: serde::Serialize>(name: &str, payload: &T) -> Event {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Event::default().event(name).data(data)
}

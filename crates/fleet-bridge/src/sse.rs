//! SSE endpoint wrapper: turns an [`EventBus`] subscription into an Axum
//! `text/event-stream` response with per-connection backpressure.
//!
//! The bus itself fans out unboundedly (it trusts the ring for replay); this
//! module is where a slow consumer's queue is capped. Draining is pull-based
//! — there is no background task, so the subscription (and its ring/filter
//! registration) is dropped the moment the client disconnects and Axum stops
//! polling the stream.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::Serialize;

use crate::event_bus::{BusEvent, Subscription};

/// Outbound buffer cap per connection. Past this, the oldest queued event is
/// evicted in favor of the newest; the number dropped is reported once the
/// backlog clears.
const CONNECTION_BUFFER_CAP: usize = 64;

struct ConnState<T> {
    subscription: Subscription<T>,
    queue: VecDeque<T>,
    dropped: u64,
}

/// The bounded, pull-based event stream backing an SSE connection, without
/// the `Sse`/keep-alive wrapping — exposed separately so it can be driven
/// directly in tests.
fn connection_stream<T: BusEvent>(subscription: Subscription<T>) -> impl Stream<Item = ConnEvent<T>> {
    let state = ConnState {
        subscription,
        queue: VecDeque::with_capacity(CONNECTION_BUFFER_CAP),
        dropped: 0,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            while let Ok(event) = state.subscription.stream.try_recv() {
                if state.queue.len() >= CONNECTION_BUFFER_CAP {
                    state.queue.pop_front();
                    state.dropped += 1;
                }
                state.queue.push_back(event);
            }

            if let Some(event) = state.queue.pop_front() {
                return Some((ConnEvent::Item(event), state));
            }

            if state.dropped > 0 {
                let dropped = state.dropped;
                state.dropped = 0;
                return Some((ConnEvent::Dropped(dropped), state));
            }

            match state.subscription.stream.recv_async().await {
                Ok(event) => state.queue.push_back(event),
                Err(_) => return None,
            }
        }
    })
}

enum ConnEvent<T> {
    Item(T),
    Dropped(u64),
}

pub fn sse_response<T>(subscription: Subscription<T>) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    T: BusEvent + Serialize,
{
    use futures_util::StreamExt;

    let events = connection_stream(subscription).map(|e| Ok(to_event(e)));
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(20)).text("keepalive"))
}

fn to_event<T: BusEvent + Serialize>(event: ConnEvent<T>) -> Event {
    match event {
        ConnEvent::Item(event) => {
            let mut e = Event::default().id(event.event_id());
            match serde_json::to_string(&event) {
                Ok(json) => e = e.data(json),
                Err(_) => e = e.comment("serialization error"),
            }
            e
        }
        ConnEvent::Dropped(n) => Event::default().comment(format!("dropped {n} events")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::types::FeedEvent;
    use futures_util::StreamExt;

    fn event(id: &str) -> FeedEvent {
        FeedEvent {
            id: id.into(),
            agent: "a1".into(),
            kind: "note".into(),
            summary: "hi".into(),
            detail: None,
            metadata: None,
            timestamp: fleet_core::ids::now_iso(),
        }
    }

    #[tokio::test]
    async fn stream_yields_events_in_publish_order() {
        let bus: crate::event_bus::EventBus<FeedEvent> = crate::event_bus::EventBus::new(100);
        let sub = bus.subscribe(|_| true, None);
        bus.publish(event("e1"));
        bus.publish(event("e2"));

        let mut stream = Box::pin(connection_stream(sub));
        let first = stream.next().await.unwrap();
        let second = stream.next().await.unwrap();
        assert!(matches!(first, ConnEvent::Item(e) if e.id == "e1"));
        assert!(matches!(second, ConnEvent::Item(e) if e.id == "e2"));
    }

    #[tokio::test]
    async fn overflow_past_cap_drops_oldest_and_reports_count() {
        let bus: crate::event_bus::EventBus<FeedEvent> = crate::event_bus::EventBus::new(200);
        let sub = bus.subscribe(|_| true, None);
        for i in 0..(CONNECTION_BUFFER_CAP + 5) {
            bus.publish(event(&format!("e{i:04}")));
        }
        // give publish a moment to land in the subscriber's flume channel
        tokio::task::yield_now().await;

        let mut stream = Box::pin(connection_stream(sub));
        let first = stream.next().await.unwrap();
        // the oldest 5 of the first batch were evicted before this pull ever ran
        assert!(matches!(first, ConnEvent::Item(e) if e.id == "e0005"));
    }

    #[tokio::test]
    async fn stream_ends_once_subscription_is_cancelled() {
        let bus: crate::event_bus::EventBus<FeedEvent> = crate::event_bus::EventBus::new(10);
        let sub = bus.subscribe(|_| true, None);
        sub.cancel();
        let mut stream = Box::pin(connection_stream(sub));
        assert!(stream.next().await.is_none());
    }
}

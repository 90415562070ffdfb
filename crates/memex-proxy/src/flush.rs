//! Response flush control.
//!
//! With a zero interval every upstream chunk goes to the client as soon as it
//! arrives. Otherwise chunks are coalesced and released at most once per
//! interval, plus a final release when the upstream ends.

use async_stream::stream;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

const EVENT_STREAM: &str = "text/event-stream";

/// Server-sent events are never batched.
pub fn effective_interval(configured: Duration, content_type: Option<&str>) -> Duration {
    let is_event_stream = content_type
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(EVENT_STREAM));

    if is_event_stream {
        Duration::ZERO
    } else {
        configured
    }
}

enum Event<T> {
    Chunk(Option<T>),
    Tick,
}

pub fn coalesce<S, E>(upstream: S, interval: Duration) -> BoxStream<'static, Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    if interval.is_zero() {
        return upstream.boxed();
    }

    stream! {
        let mut upstream = Box::pin(upstream);
        let mut pending = BytesMut::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            let event = tokio::select! {
                chunk = upstream.next() => Event::Chunk(chunk),
                _ = ticker.tick() => Event::Tick,
            };

            match event {
                Event::Chunk(Some(Ok(bytes))) => pending.extend_from_slice(&bytes),
                Event::Chunk(Some(Err(e))) => {
                    if !pending.is_empty() {
                        yield Ok(pending.split().freeze());
                    }
                    yield Err(e);
                    break;
                }
                Event::Chunk(None) => {
                    if !pending.is_empty() {
                        yield Ok(pending.split().freeze());
                    }
                    break;
                }
                Event::Tick => {
                    if !pending.is_empty() {
                        yield Ok(pending.split().freeze());
                    }
                }
            }
        }
    }
    .boxed()
}

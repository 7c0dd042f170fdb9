//! Server-Sent Events stream of session lifecycle events.
//!
//! Replays recent events for late joiners, then forwards live ones.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};

use crate::context::AppContext;

/// GET /api/events
pub async fn events_handler(
    State(ctx): State<AppContext>,
) -> Sse<impl futures_core::Stream<Item = Result<Event, Infallible>>> {
    let recent = ctx.event_bus.recent_events(50);
    let mut rx = ctx.event_bus.subscribe();

    let stream = async_stream::stream! {
        for event in recent.into_iter().rev() {
            if let Ok(data) = serde_json::to_string(&event) {
                yield Ok(Event::default().data(data));
            }
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(data) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("SSE client lagged by {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

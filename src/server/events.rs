use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::AppState;
use crate::bus;

/// Streams store changes and notifications to the presentation layer.
pub async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New SSE connection established");

    let mut rx = state.conversation.manager().event_bus().subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Event::default()
                        .event(event_name(&event))
                        .json_data(&event)
                        .map_err(axum::BoxError::from);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Clients re-read /api/state on resync
                    warn!("SSE client lagged, skipped {} events", skipped);
                    yield Ok(Event::default().event("resync").data("{}"));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn event_name(event: &bus::Event) -> &'static str {
    match event {
        bus::Event::MessageAdded { .. } => "message_added",
        bus::Event::StateChanged { .. } => "state_changed",
        bus::Event::SystemNotification { .. } => "notification",
    }
}

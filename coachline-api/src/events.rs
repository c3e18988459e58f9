use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/trips/{trip_id}/events", get(trip_events))
}

/// Live reservation events of one trip. Each SSE message is named after the
/// event kind and carries the event as JSON.
async fn trip_events(
    State(state): State<AppState>,
    Path(trip_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    state.engine.trip(trip_id).await?;

    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| async move {
        match result {
            Ok(event) if event.trip_id() == trip_id => Event::default()
                .event(event.kind())
                .json_data(&event)
                .ok()
                .map(Ok),
            // Other trips, or a slow client that missed some events.
            _ => None,
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

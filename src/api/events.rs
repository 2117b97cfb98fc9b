// Server-sent event streams
//
// Each SSE event carries the bus event name (`output-line`, `run-completed`)
// and its JSON payload. A per-run stream ends after the completion event.

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::time::Duration;

use super::error::ApiError;
use crate::app::Nser;
use crate::engine::{RunEvent, RunSubscription};

fn to_sse(event: RunEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(&event)
}

fn sse_stream(
    subscription: RunSubscription,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    Sse::new(subscription.into_stream().map(to_sse)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// `GET /api/runs/{id}/events`
pub(crate) async fn run_events(
    State(app): State<Nser>,
    Path(run_id): Path<i64>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    // Subscribe first so nothing published after the existence check is lost
    let subscription = app.subscribe(run_id);
    app.get_run(run_id).await?;
    Ok(sse_stream(subscription))
}

/// `GET /api/events`
pub(crate) async fn all_events(
    State(app): State<Nser>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    sse_stream(app.subscribe_all())
}

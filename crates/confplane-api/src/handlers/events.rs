//! `GET /events` — server-sent-event stream (spec.md §4.7, §6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::events::{events_for_change, log_lagged};
use crate::project_resolver::AuthenticatedProject;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub environment: Uuid,
}

pub async fn stream_events(
    State(state): State<AppState>,
    AuthenticatedProject(project_id): AuthenticatedProject,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe(project_id);
    let replica = state.replica.clone();
    let environment_id = query.environment;

    let stream = BroadcastStream::new(receiver).flat_map(move |item| {
        let events = match item {
            Ok(change) => events_for_change(&replica, &change, project_id, environment_id),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                log_lagged(skipped);
                Vec::new()
            }
        };
        stream::iter(events.into_iter().map(|event| {
            Ok(Event::default()
                .json_data(event)
                .unwrap_or_else(|_| Event::default().data("malformed event, dropped")))
        }))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_millis(state.stream_heartbeat_ms)))
}

//! `/events/stream`: Server-Sent Events bridge over the broadcast event bus.

use axum::{
    extract::State,
    http::{Request, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use crate::auth;
use crate::events::EventMessage;
use crate::AppState;

pub async fn stream_events(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
) -> Response {
    let Some(token) = auth::extract_presented_token(&request) else {
        return (StatusCode::UNAUTHORIZED, "missing X-GoHook-Key token").into_response();
    };
    if auth::authenticate(&state.config.auth.tokens, &token).is_none() {
        return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
    }

    let receiver = state.event_bus.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(into_sse_event);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
        .into_response()
}

/// Drops lag notifications from the SSE stream rather than surfacing them
/// as an error event — a client that falls behind just resumes from the
/// next message, same as any other subscriber.
fn into_sse_event(
    item: Result<EventMessage, tokio_stream::wrappers::errors::BroadcastStreamRecvError>,
) -> Option<Result<Event, Infallible>> {
    let msg = item.ok()?;
    let payload = msg.envelope();
    Some(Ok(Event::default().event("message").json_data(payload).unwrap_or_else(|_| Event::default())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lagged_notifications_are_dropped_not_surfaced() {
        let err = tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(3);
        assert!(into_sse_event(Err(err)).is_none());
    }

    #[test]
    fn a_message_becomes_one_sse_event() {
        let msg = EventMessage::ProjectManaged {
            project_name: "alpha".to_string(),
            action: "add-project".to_string(),
            actor: "alice".to_string(),
            at: chrono::Utc::now(),
        };
        assert!(into_sse_event(Ok(msg)).is_some());
    }
}

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use std::convert::Infallible;
use tracing::debug;

use crate::state::AppState;

/// `GET /api/v1/progress/{session_id}`
///
/// Server-sent events carrying upload progress for one session. The
/// session is registered for as long as the client stays connected, and the
/// stream ends after reaching 100%.
pub async fn progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!(session_id = %session_id, "progress subscriber connected");
    let subscription = state.progress.subscribe(session_id);

    let events = futures::stream::unfold(Some(subscription), |subscription| async move {
        let mut subscription = subscription?;
        let percentage = subscription.recv().await?;
        let event = Event::default()
            .event("progress")
            .data(format!("{percentage:.2}"));
        let next = (percentage < 100.0).then_some(subscription);
        Some((Ok(event), next))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

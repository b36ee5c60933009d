//! Live progress streaming over server-sent events.
//!
//! The engine's subscriber channel is adapted into an SSE response; when
//! the client disconnects, the receiver drops and the broadcaster cleans
//! the subscription up on its next publish.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use tracing::{error, info};

use crate::state::AppState;

/// SSE stream of a campaign's progress events.
pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("Progress subscriber connected for campaign {}", id);
    let rx = state.engine().subscribe(&id);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        let sse_event = Event::default().json_data(&event).unwrap_or_else(|e| {
            error!("Failed to serialize progress event: {}", e);
            Event::default().data("{}")
        });
        Some((Ok::<_, Infallible>(sse_event), rx))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

//! Server-Sent Events support

use super::types::SessionView;
use crate::conversation::ConversationState;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

/// Stream every session snapshot, starting with the current one.
///
/// Snapshots published faster than the client reads are coalesced; only the
/// latest is sent.
pub fn snapshot_stream(
    snapshots: watch::Receiver<Arc<ConversationState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = WatchStream::new(snapshots).filter_map(|state| {
        match serde_json::to_string(&SessionView::from(state.as_ref())) {
            Ok(data) => Some(Ok(Event::default().event("snapshot").data(data))),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize snapshot");
                None
            }
        }
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;

use crate::auth::Session;
use crate::services::live::{DeviceBoard, LiveHub};
use crate::state::AppState;

const BOARD_EVENT: &str = "board";

fn board_event(board: &DeviceBoard) -> Event {
    Event::default()
        .event(BOARD_EVENT)
        .id(board.version.to_string())
        .json_data(board)
        .unwrap_or_else(|err| Event::default().event("error").data(err.to_string()))
}

#[utoipa::path(
    get,
    path = "/api/devices/board",
    tag = "devices",
    responses(
        (status = 200, description = "Current device status board", body = DeviceBoard),
        (status = 401, description = "Missing bearer token")
    )
)]
pub(crate) async fn get_board(
    State(live): State<Arc<LiveHub>>,
    _session: Session,
) -> Json<DeviceBoard> {
    Json(live.current().as_ref().clone())
}

#[utoipa::path(
    get,
    path = "/api/devices/stream",
    tag = "devices",
    responses(
        (status = 200, description = "Server-sent `board` events: the current board, then every update", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Missing bearer token")
    )
)]
pub(crate) async fn stream_board(
    State(live): State<Arc<LiveHub>>,
    _session: Session,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Only the newest board matters to a client, so a slow reader skips intermediate ones.
    let (tx, rx) = watch::channel::<Option<Arc<DeviceBoard>>>(None);
    let subscription = live.subscribe(move |board| {
        tx.send_replace(Some(board));
    });

    let events = stream::unfold((rx, subscription), |(mut rx, subscription)| async move {
        loop {
            rx.changed().await.ok()?;
            let latest = rx.borrow_and_update().clone();
            if let Some(board) = latest {
                return Some((Ok(board_event(&board)), (rx, subscription)));
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/devices/board", get(get_board))
        .route("/devices/stream", get(stream_board))
}

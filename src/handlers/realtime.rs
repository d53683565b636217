use axum::{
    extract::{
        Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    error::Result,
    middleware_layer::auth::authenticate_token,
    realtime::EventStream,
    state::AppState,
};

/// The query parameters for opening a realtime socket.
#[derive(Deserialize, Debug)]
pub struct ConnectQuery {
    pub token: String,
}

/// Upgrades to a WebSocket bound to the caller's room.
///
/// Browsers cannot set headers on the upgrade request, so the access token
/// travels in the query string.
pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    query: std::result::Result<Query<ConnectQuery>, QueryRejection>,
) -> Result<Response> {
    let Query(query) = query?;
    let user = authenticate_token(&state, &query.token).await?;
    let events = state.broadcaster.subscribe(user.id).await?;

    tracing::info!("🔌 Realtime connection opened for {}", user.id);
    Ok(ws.on_upgrade(move |socket| forward_events(socket, user.id, events)))
}

/// Pushes room events to the socket until either side goes away.
async fn forward_events(socket: WebSocket, user_id: Uuid, mut events: EventStream) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                let frame = match sonic_rs::to_string(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("⚠️ Could not encode event '{}': {}", event.event, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::info!("🔌 Realtime connection closed for {}", user_id);
}

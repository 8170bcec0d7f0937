//! WebSocket transport for the batch upload protocol.
//!
//! Each connection is served by one loop that alternates between client
//! messages and status updates from the hub. A client message is handled
//! and its replies written before the next update is forwarded, so acks
//! always precede the pushes they cause.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Extension,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use curator_core::{ClientMessage, GatewaySession, Identity, ServerMessage};

use crate::metrics::{
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_RECEIVED,
    WS_MESSAGES_SENT,
};
use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the first message so no update is missed
    let mut updates = state.hub().subscribe();
    let mut session = GatewaySession::new(state.gateway().clone(), identity);
    let user = session.identity().user_id.clone();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();
    info!(user = %user, "Client connected");

    loop {
        let replies = tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => handle_text(&mut session, text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(user = %user, "Client closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pings are answered by axum, binary frames are ignored
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(user = %user, error = %e, "Receive error");
                        break;
                    }
                }
            }
            update = updates.recv() => {
                match update {
                    Ok(update) => session.on_update(update),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(user = %user, skipped = n, "Client lagged, resyncing subscriptions");
                        WS_LAG_EVENTS.inc();
                        session.resync()
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Update hub closed");
                        break;
                    }
                }
            }
        };

        if send_all(&mut sender, replies).await.is_err() {
            debug!(user = %user, "Send failed, client disconnected");
            break;
        }
    }

    WS_CONNECTIONS_ACTIVE.dec();
    info!(
        user = %user,
        subscriptions = session.subscriptions().len(),
        "Client disconnected"
    );
}

async fn handle_text(session: &mut GatewaySession, text: &str) -> Vec<ServerMessage> {
    match ClientMessage::parse(text) {
        Ok(message) => {
            WS_MESSAGES_RECEIVED
                .with_label_values(&[message.kind()])
                .inc();
            session.handle(message).await
        }
        Err(e) => {
            WS_MESSAGES_RECEIVED.with_label_values(&["invalid"]).inc();
            vec![ServerMessage::error(e.to_string())]
        }
    }
}

async fn send_all(
    sender: &mut SplitSink<WebSocket, Message>,
    messages: Vec<ServerMessage>,
) -> Result<(), axum::Error> {
    for message in messages {
        match serde_json::to_string(&message) {
            Ok(json) => {
                WS_MESSAGES_SENT
                    .with_label_values(&[message.kind()])
                    .inc();
                sender.send(Message::Text(json.into())).await?;
            }
            Err(e) => {
                error!(message = message.kind(), error = %e, "Failed to serialize message");
            }
        }
    }
    Ok(())
}
